//! Lowers `$search` into a disjunction of case-insensitive LIKE probes
//! over every property flagged `searchable`, honoring `AND`/`OR`/`NOT`
//! between terms and double-quoted literal phrases.

use crate::metadata::EntityDescription;
use crate::plan::SqlValue;

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Word(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Vec<Term> {
    let mut terms = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '(' => {
                chars.next();
                terms.push(Term::LParen);
            }
            ')' => {
                chars.next();
                terms.push(Term::RParen);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                for ch in chars.by_ref() {
                    if ch == '"' {
                        break;
                    }
                    s.push(ch);
                }
                terms.push(Term::Word(s));
            }
            _ => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == ' ' || ch == '(' || ch == ')' {
                        break;
                    }
                    s.push(ch);
                    chars.next();
                }
                match s.as_str() {
                    "AND" => terms.push(Term::And),
                    "OR" => terms.push(Term::Or),
                    "NOT" => terms.push(Term::Not),
                    _ => terms.push(Term::Word(s)),
                }
            }
        }
    }
    terms
}

/// Builds `(<field LIKE ? OR field2 LIKE ? ...>)` for a single search word
/// across every searchable property of the entity.
fn word_predicate(entity: &EntityDescription, alias: &str, word: &str) -> (String, Vec<SqlValue>) {
    let like_value = format!("%{}%", escape_like(word));
    let fields: Vec<&str> = entity.searchable_properties().map(|p| p.physical_name.as_str()).collect();
    if fields.is_empty() {
        return ("0".to_string(), Vec::new());
    }
    let mut params = Vec::new();
    let clauses: Vec<String> = fields
        .iter()
        .map(|f| {
            params.push(SqlValue::Text(like_value.clone()));
            format!("{alias}.{f} LIKE ? ESCAPE '\\'")
        })
        .collect();
    (format!("({})", clauses.join(" OR ")), params)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Simple left-to-right boolean combinator over search terms (no operator
/// precedence distinctions between AND/OR beyond left-to-right grouping,
/// matching the informal boolean term grammar `$search` specifies).
pub fn lower_search(entity: &EntityDescription, alias: &str, raw: &str) -> (Option<String>, Vec<SqlValue>) {
    let terms = tokenize(raw);
    if terms.is_empty() {
        return (None, Vec::new());
    }

    let mut sql = String::new();
    let mut params = Vec::new();
    let mut pending_not = false;

    for term in terms {
        match term {
            Term::And => sql.push_str(" AND "),
            Term::Or => sql.push_str(" OR "),
            Term::Not => pending_not = true,
            Term::LParen => sql.push('('),
            Term::RParen => sql.push(')'),
            Term::Word(w) => {
                let (frag, p) = word_predicate(entity, alias, &w);
                if pending_not {
                    sql.push_str(&format!("NOT {frag}"));
                    pending_not = false;
                } else {
                    sql.push_str(&frag);
                }
                params.extend(p);
            }
        }
    }
    (Some(format!("({sql})")), params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EdmType, EntityTypeBuilder, PropertyBuilder};

    fn sample_entity() -> EntityDescription {
        EntityTypeBuilder::new("Ns.Product")
            .property(PropertyBuilder::new("Id", EdmType::Int64).key())
            .property(PropertyBuilder::new("Name", EdmType::String).searchable())
            .build()
            .unwrap()
    }

    #[test]
    fn single_word_search_lowers_to_like() {
        let entity = sample_entity();
        let (sql, params) = lower_search(&entity, "t0", "mouse");
        assert!(sql.unwrap().contains("LIKE"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn boolean_operators_are_honored() {
        let entity = sample_entity();
        let (sql, _) = lower_search(&entity, "t0", "mouse NOT wireless");
        let sql = sql.unwrap();
        assert!(sql.contains("NOT"));
    }
}
