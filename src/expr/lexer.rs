//! Hand-rolled lexer for the `$filter`/`$orderby`/`$apply` expression
//! grammar. One token type per lexical category; no published crate
//! covers OData's specific grammar, so tokenizing and parsing are
//! split into their own modules the way a hand-rolled query-language
//! front end normally is.

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    Int(i64),
    Decimal(f64),
    String(String),
    DateTime(String),
    Guid(String),
    LParen,
    RParen,
    Comma,
    Slash,
    Colon,
    Eof,
}

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
}

pub struct Lexer<'a> {
    chars: std::str::CharIndices<'a>,
    input: &'a str,
    peeked: Option<(usize, char)>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices(),
            input,
            peeked: None,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        if let Some(p) = self.peeked.take() {
            return Some(p);
        }
        self.chars.next()
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let Some((start, c)) = self.bump() else {
                tokens.push(Token::Eof);
                break;
            };
            match c {
                '(' => tokens.push(Token::LParen),
                ')' => tokens.push(Token::RParen),
                ',' => tokens.push(Token::Comma),
                '/' => tokens.push(Token::Slash),
                ':' => tokens.push(Token::Colon),
                '\'' => tokens.push(self.lex_string()?),
                c if c.is_ascii_digit() || (c == '-' && self.next_is_digit()) => {
                    tokens.push(self.lex_number(start, c));
                }
                c if c.is_alphabetic() || c == '_' || c == '$' => {
                    tokens.push(self.lex_word(start));
                }
                other => return Err(LexError::UnexpectedChar(other)),
            }
        }
        Ok(tokens)
    }

    fn next_is_digit(&mut self) -> bool {
        matches!(self.peek(), Some((_, c)) if c.is_ascii_digit())
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some((_, c)) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn lex_string(&mut self) -> Result<Token, LexError> {
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(LexError::UnterminatedString),
                Some((_, '\'')) => {
                    if matches!(self.peek(), Some((_, '\''))) {
                        self.bump();
                        s.push('\'');
                    } else {
                        return Ok(Token::String(s));
                    }
                }
                Some((_, c)) => s.push(c),
            }
        }
    }

    fn lex_number(&mut self, start: usize, first: char) -> Token {
        let mut end = start + first.len_utf8();
        let mut is_decimal = false;
        while let Some((idx, c)) = self.peek() {
            if c.is_ascii_digit() {
                end = idx + c.len_utf8();
                self.bump();
            } else if c == '.' && !is_decimal {
                is_decimal = true;
                end = idx + c.len_utf8();
                self.bump();
            } else if (c == 'T' || c == ':' || c == '-' || c == 'Z' || c == '+') && looks_like_datetime(&self.input[start..end]) {
                end = idx + c.len_utf8();
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.input[start..end];
        if text.contains('T') || (text.matches('-').count() >= 2) {
            return Token::DateTime(text.to_string());
        }
        if is_decimal {
            Token::Decimal(text.parse().unwrap_or(0.0))
        } else {
            match text.parse::<i64>() {
                Ok(n) => Token::Int(n),
                Err(_) => Token::Decimal(text.parse().unwrap_or(0.0)),
            }
        }
    }

    fn lex_word(&mut self, start: usize) -> Token {
        let mut end = start + self.input[start..].chars().next().unwrap().len_utf8();
        while let Some((idx, c)) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
                end = idx + c.len_utf8();
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.input[start..end];
        if is_guid_text(text) {
            return Token::Guid(text.to_string());
        }
        Token::Identifier(text.to_string())
    }
}

fn looks_like_datetime(prefix: &str) -> bool {
    prefix.len() >= 4 && prefix.chars().take(4).all(|c| c.is_ascii_digit())
}

fn is_guid_text(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 5
        && [8, 4, 4, 4, 12]
            .iter()
            .zip(parts.iter())
            .all(|(len, p)| p.len() == *len && p.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_comparison() {
        let toks = Lexer::new("Price gt 100").tokenize().unwrap();
        assert_eq!(
            toks,
            vec![
                Token::Identifier("Price".into()),
                Token::Identifier("gt".into()),
                Token::Int(100),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn unescapes_doubled_quotes() {
        let toks = Lexer::new("'O''Brien'").tokenize().unwrap();
        assert_eq!(toks, vec![Token::String("O'Brien".into()), Token::Eof]);
    }

    #[test]
    fn recognizes_guid_literal() {
        let toks = Lexer::new("11111111-2222-3333-4444-555555555555").tokenize().unwrap();
        assert_eq!(
            toks,
            vec![
                Token::Guid("11111111-2222-3333-4444-555555555555".into()),
                Token::Eof
            ]
        );
    }
}
