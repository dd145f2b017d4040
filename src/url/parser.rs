//! Parses the request path + raw query string into a structural
//! description of what is being addressed, before any expression grammar
//! or metadata lookup runs.

use std::collections::HashMap;

use crate::error::ODataError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLiteral {
    Int(i64),
    String(String),
    Guid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyBody {
    None,
    Positional(KeyLiteral),
    Named(Vec<(String, KeyLiteral)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    None,
    Value,
    Count,
    Ref,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub key: KeyBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestShape {
    ServiceDocument,
    Metadata,
    Batch,
    Resource {
        segments: Vec<Segment>,
        terminal: Terminal,
    },
}

#[derive(Debug, Clone)]
pub struct ParsedUrl {
    pub shape: RequestShape,
    pub system_options: HashMap<String, String>,
    pub custom_options: HashMap<String, String>,
}

impl ParsedUrl {
    pub fn option(&self, name: &str) -> Option<&str> {
        self.system_options.get(name).map(|s| s.as_str())
    }
}

pub fn parse_url(path: &str, query: Option<&str>) -> Result<ParsedUrl, ODataError> {
    let (system_options, custom_options) = parse_query(query)?;

    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(ParsedUrl {
            shape: RequestShape::ServiceDocument,
            system_options,
            custom_options,
        });
    }

    let raw_segments: Vec<&str> = trimmed.split('/').collect();

    if raw_segments.len() == 1 && raw_segments[0] == "$metadata" {
        return Ok(ParsedUrl {
            shape: RequestShape::Metadata,
            system_options,
            custom_options,
        });
    }
    if raw_segments.len() == 1 && raw_segments[0] == "$batch" {
        return Ok(ParsedUrl {
            shape: RequestShape::Batch,
            system_options,
            custom_options,
        });
    }

    let mut terminal = Terminal::None;
    let mut segment_strs = raw_segments;
    if let Some(last) = segment_strs.last().copied() {
        let (stripped, t) = match last {
            "$value" => (None, Terminal::Value),
            "$count" => (None, Terminal::Count),
            "$ref" => (None, Terminal::Ref),
            _ => (Some(last), Terminal::None),
        };
        if stripped.is_none() {
            segment_strs.pop();
            terminal = t;
        }
    }

    let mut segments = Vec::with_capacity(segment_strs.len());
    for raw in segment_strs {
        segments.push(parse_segment(raw)?);
    }

    if segments.is_empty() {
        return Err(ODataError::malformed("empty path segment"));
    }

    Ok(ParsedUrl {
        shape: RequestShape::Resource { segments, terminal },
        system_options,
        custom_options,
    })
}

fn parse_segment(raw: &str) -> Result<Segment, ODataError> {
    match raw.find('(') {
        None => Ok(Segment {
            name: raw.to_string(),
            key: KeyBody::None,
        }),
        Some(open) => {
            if !raw.ends_with(')') {
                return Err(ODataError::malformed(format!("unbalanced parentheses in segment '{raw}'")));
            }
            let name = raw[..open].to_string();
            let body = &raw[open + 1..raw.len() - 1];
            Ok(Segment {
                name,
                key: parse_key_body(body)?,
            })
        }
    }
}

fn parse_key_body(body: &str) -> Result<KeyBody, ODataError> {
    if body.is_empty() {
        return Ok(KeyBody::None);
    }
    if body.contains('=') && !body.starts_with('\'') {
        let mut pairs = Vec::new();
        for part in split_top_level_commas(body) {
            let eq = part
                .find('=')
                .ok_or_else(|| ODataError::malformed(format!("malformed key segment '{part}'")))?;
            let name = part[..eq].trim().to_string();
            let literal = parse_key_literal(part[eq + 1..].trim())?;
            pairs.push((name, literal));
        }
        Ok(KeyBody::Named(pairs))
    } else {
        Ok(KeyBody::Positional(parse_key_literal(body.trim())?))
    }
}

fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] as char {
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&s[start..]);
    parts
}

fn parse_key_literal(text: &str) -> Result<KeyLiteral, ODataError> {
    if let Some(inner) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        return Ok(KeyLiteral::String(unescape_quotes(inner)));
    }
    if let Ok(n) = text.parse::<i64>() {
        return Ok(KeyLiteral::Int(n));
    }
    if is_guid_text(text) {
        return Ok(KeyLiteral::Guid(text.to_string()));
    }
    Err(ODataError::malformed(format!("invalid key literal '{text}'")))
}

fn unescape_quotes(s: &str) -> String {
    s.replace("''", "'")
}

fn is_guid_text(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 5
        && [8, 4, 4, 4, 12]
            .iter()
            .zip(parts.iter())
            .all(|(len, p)| p.len() == *len && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn parse_query(query: Option<&str>) -> Result<(HashMap<String, String>, HashMap<String, String>), ODataError> {
    let mut system_options = HashMap::new();
    let mut custom_options = HashMap::new();
    let Some(query) = query else {
        return Ok((system_options, custom_options));
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = urlencoding::decode(key)
            .map_err(|_| ODataError::malformed("invalid percent-encoding in query string"))?
            .into_owned();
        let value = urlencoding::decode(value)
            .map_err(|_| ODataError::malformed("invalid percent-encoding in query string"))?
            .into_owned();
        if key.starts_with('$') {
            if !is_known_system_option(&key) {
                return Err(ODataError::malformed(format!("unknown system query option '{key}'")));
            }
            system_options.insert(key, value);
        } else {
            custom_options.insert(key, value);
        }
    }
    Ok((system_options, custom_options))
}

fn is_known_system_option(key: &str) -> bool {
    matches!(
        key,
        "$filter"
            | "$select"
            | "$expand"
            | "$orderby"
            | "$top"
            | "$skip"
            | "$count"
            | "$search"
            | "$apply"
            | "$format"
            | "$skiptoken"
            | "$deltatoken"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_collection() {
        let parsed = parse_url("/Products", Some("$top=5&$count=true")).unwrap();
        match parsed.shape {
            RequestShape::Resource { segments, terminal } => {
                assert_eq!(segments.len(), 1);
                assert_eq!(segments[0].name, "Products");
                assert_eq!(segments[0].key, KeyBody::None);
                assert_eq!(terminal, Terminal::None);
            }
            _ => panic!("expected Resource"),
        }
        assert_eq!(parsed.option("$top"), Some("5"));
    }

    #[test]
    fn parses_positional_int_key() {
        let parsed = parse_url("/Products(1)", None).unwrap();
        match parsed.shape {
            RequestShape::Resource { segments, .. } => {
                assert_eq!(segments[0].key, KeyBody::Positional(KeyLiteral::Int(1)));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn parses_quoted_string_key_with_escaped_quote() {
        let parsed = parse_url("/Authors('O''Brien')", None).unwrap();
        match parsed.shape {
            RequestShape::Resource { segments, .. } => {
                assert_eq!(
                    segments[0].key,
                    KeyBody::Positional(KeyLiteral::String("O'Brien".to_string()))
                );
            }
            _ => panic!(),
        }
    }

    #[test]
    fn parses_composite_named_key() {
        let parsed = parse_url("/OrderLines(orderId=1,lineNo=2)", None).unwrap();
        match parsed.shape {
            RequestShape::Resource { segments, .. } => match &segments[0].key {
                KeyBody::Named(pairs) => {
                    assert_eq!(pairs.len(), 2);
                    assert_eq!(pairs[0].0, "orderId");
                }
                _ => panic!("expected named key"),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn recognizes_value_terminal() {
        let parsed = parse_url("/Products(1)/Name/$value", None).unwrap();
        match parsed.shape {
            RequestShape::Resource { segments, terminal } => {
                assert_eq!(segments.len(), 2);
                assert_eq!(terminal, Terminal::Value);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn recognizes_metadata_and_batch() {
        assert_eq!(parse_url("/$metadata", None).unwrap().shape, RequestShape::Metadata);
        assert_eq!(parse_url("/$batch", None).unwrap().shape, RequestShape::Batch);
        assert_eq!(parse_url("/", None).unwrap().shape, RequestShape::ServiceDocument);
    }

    #[test]
    fn rejects_unknown_system_option() {
        assert!(parse_url("/Products", Some("$bogus=1")).is_err());
    }

    #[test]
    fn rejects_unbalanced_parens() {
        assert!(parse_url("/Products(1", None).is_err());
    }
}
