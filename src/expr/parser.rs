//! Recursive-descent parser over the token stream from `lexer`, producing
//! the typed AST in `ast`. Precedence (low to high): or, and, not,
//! comparison, additive, multiplicative, unary, primary.

use chrono::{DateTime, Utc};

use super::ast::{ArithOp, CompareOp, Expr, LambdaKind, LogicalOp, Value};
use super::functions::is_known_function;
use super::lexer::{LexError, Lexer, Token};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("unexpected token: {0:?}")]
    UnexpectedToken(Token),
    #[error("unbalanced parentheses")]
    UnbalancedParentheses,
    #[error("invalid literal: {0}")]
    InvalidLiteral(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("lambda 'any'/'all' requires a collection-valued navigation path")]
    LambdaOnNonCollection,
    #[error("expression is too complex ({0} nodes, limit {1})")]
    TooComplex(usize, usize),
}

pub const MAX_AST_NODES: usize = 400;

pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    parser.expect_eof()?;
    let n = expr.count_nodes();
    if n > MAX_AST_NODES {
        return Err(ParseError::TooComplex(n, MAX_AST_NODES));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        match self.peek() {
            Token::Eof => Ok(()),
            Token::RParen => Err(ParseError::UnbalancedParentheses),
            other => Err(ParseError::UnexpectedToken(other.clone())),
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Identifier(id) if id.eq_ignore_ascii_case(kw))
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.at_keyword("or") {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Logical(Box::new(lhs), LogicalOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.at_keyword("and") {
            self.bump();
            let rhs = self.parse_not()?;
            lhs = Expr::Logical(Box::new(lhs), LogicalOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.at_keyword("not") {
            self.bump();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Token::Identifier(id) if id.eq_ignore_ascii_case("eq") => Some(CompareOp::Eq),
            Token::Identifier(id) if id.eq_ignore_ascii_case("ne") => Some(CompareOp::Ne),
            Token::Identifier(id) if id.eq_ignore_ascii_case("gt") => Some(CompareOp::Gt),
            Token::Identifier(id) if id.eq_ignore_ascii_case("ge") => Some(CompareOp::Ge),
            Token::Identifier(id) if id.eq_ignore_ascii_case("lt") => Some(CompareOp::Lt),
            Token::Identifier(id) if id.eq_ignore_ascii_case("le") => Some(CompareOp::Le),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let rhs = self.parse_additive()?;
            return Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)));
        }
        if self.at_keyword("in") {
            self.bump();
            let items = self.parse_in_list()?;
            return Ok(Expr::In(Box::new(lhs), items));
        }
        Ok(lhs)
    }

    fn parse_in_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        match self.bump() {
            Token::LParen => {}
            other => return Err(ParseError::UnexpectedToken(other)),
        }
        let mut items = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            loop {
                items.push(self.parse_additive()?);
                if matches!(self.peek(), Token::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        match self.bump() {
            Token::RParen => {}
            _ => return Err(ParseError::UnbalancedParentheses),
        }
        Ok(items)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Identifier(id) if id.eq_ignore_ascii_case("add") => Some(ArithOp::Add),
                Token::Identifier(id) if id.eq_ignore_ascii_case("sub") => Some(ArithOp::Sub),
                _ => None,
            };
            let Some(op) = op else { break };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Arith(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Identifier(id) if id.eq_ignore_ascii_case("mul") => Some(ArithOp::Mul),
                Token::Identifier(id) if id.eq_ignore_ascii_case("div") => Some(ArithOp::Div),
                Token::Identifier(id) if id.eq_ignore_ascii_case("mod") => Some(ArithOp::Mod),
                _ => None,
            };
            let Some(op) = op else { break };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Arith(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Token::Identifier(id) if id == "-") {
            self.bump();
            let inner = self.parse_unary()?;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.bump() {
            Token::LParen => {
                let inner = self.parse_or()?;
                match self.bump() {
                    Token::RParen => Ok(inner),
                    _ => Err(ParseError::UnbalancedParentheses),
                }
            }
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Decimal(d) => Ok(Expr::Literal(Value::Decimal(d))),
            Token::String(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Guid(g) => Ok(Expr::Literal(Value::Guid(g))),
            Token::DateTime(text) => {
                let dt: DateTime<Utc> = text
                    .parse()
                    .map_err(|_| ParseError::InvalidLiteral(text.clone()))?;
                Ok(Expr::Literal(Value::DateTime(dt)))
            }
            Token::Identifier(id) => self.parse_identifier_led(id),
            other => Err(ParseError::UnexpectedToken(other)),
        }
    }

    fn parse_identifier_led(&mut self, id: String) -> Result<Expr, ParseError> {
        if id.eq_ignore_ascii_case("true") {
            return Ok(Expr::Literal(Value::Bool(true)));
        }
        if id.eq_ignore_ascii_case("false") {
            return Ok(Expr::Literal(Value::Bool(false)));
        }
        if id.eq_ignore_ascii_case("null") {
            return Ok(Expr::Literal(Value::Null));
        }

        if matches!(self.peek(), Token::LParen) {
            if !is_known_function(&id) {
                return Err(ParseError::UnknownFunction(id));
            }
            self.bump();
            let mut args = Vec::new();
            if !matches!(self.peek(), Token::RParen) {
                loop {
                    args.push(self.parse_or()?);
                    if matches!(self.peek(), Token::Comma) {
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
            match self.bump() {
                Token::RParen => {}
                _ => return Err(ParseError::UnbalancedParentheses),
            }
            return Ok(Expr::Call(id, args));
        }

        let mut path = vec![id];
        while matches!(self.peek(), Token::Slash) {
            self.bump();
            match self.bump() {
                Token::Identifier(next) if next.eq_ignore_ascii_case("any") || next.eq_ignore_ascii_case("all") => {
                    return self.parse_lambda(path, next);
                }
                Token::Identifier(next) => path.push(next),
                other => return Err(ParseError::UnexpectedToken(other)),
            }
        }
        Ok(Expr::Property(path))
    }

    fn parse_lambda(&mut self, collection: Vec<String>, kw: String) -> Result<Expr, ParseError> {
        let kind = if kw.eq_ignore_ascii_case("any") {
            LambdaKind::Any
        } else {
            LambdaKind::All
        };
        match self.bump() {
            Token::LParen => {}
            other => return Err(ParseError::UnexpectedToken(other)),
        }
        if matches!(self.peek(), Token::RParen) {
            self.bump();
            return Ok(Expr::Lambda {
                collection,
                kind,
                range_var: None,
                predicate: Box::new(Expr::Literal(Value::Bool(true))),
            });
        }
        let range_var = match self.bump() {
            Token::Identifier(v) => v,
            other => return Err(ParseError::UnexpectedToken(other)),
        };
        match self.bump() {
            Token::Colon => {}
            other => return Err(ParseError::UnexpectedToken(other)),
        }
        let predicate = self.parse_or()?;
        match self.bump() {
            Token::RParen => {}
            _ => return Err(ParseError::UnbalancedParentheses),
        }
        Ok(Expr::Lambda {
            collection,
            kind,
            range_var: Some(range_var),
            predicate: Box::new(predicate),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_precedence_correctly() {
        let expr = parse_expression("Price gt 100 and not (Category eq 'Books') or contains(Name,'Mouse')").unwrap();
        matches!(expr, Expr::Logical(_, LogicalOp::Or, _));
    }

    #[test]
    fn parses_lambda_any() {
        let expr = parse_expression("Items/any(i:i/Price gt 10)").unwrap();
        match expr {
            Expr::Lambda { collection, kind, range_var, .. } => {
                assert_eq!(collection, vec!["Items".to_string()]);
                assert_eq!(kind, LambdaKind::Any);
                assert_eq!(range_var, Some("i".to_string()));
            }
            _ => panic!("expected lambda"),
        }
    }

    #[test]
    fn rejects_unknown_function() {
        assert!(matches!(
            parse_expression("bogus(Name,'x')"),
            Err(ParseError::UnknownFunction(_))
        ));
    }

    #[test]
    fn rejects_unbalanced_parens() {
        assert!(matches!(
            parse_expression("(Price gt 100"),
            Err(ParseError::UnbalancedParentheses)
        ));
    }

    #[test]
    fn property_to_property_comparison_parses() {
        let expr = parse_expression("Price gt Cost").unwrap();
        match expr {
            Expr::Compare(l, CompareOp::Gt, r) => {
                assert!(matches!(*l, Expr::Property(_)));
                assert!(matches!(*r, Expr::Property(_)));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn parses_in_list() {
        let expr = parse_expression("Category in ('Books','Toys')").unwrap();
        assert!(matches!(expr, Expr::In(_, items) if items.len() == 2));
    }
}
