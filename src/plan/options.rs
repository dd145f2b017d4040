//! Parses system query option strings (already separated out by the URL
//! parser) into structured option values the planner consumes.

use crate::error::ODataError;
use crate::expr::{Expr, parse_expression};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub path: Vec<String>,
    pub dir: SortDir,
}

#[derive(Debug, Clone)]
pub struct ExpandItem {
    pub nav: String,
    pub nested: Box<QueryOptions>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filter: Option<Expr>,
    pub select: Option<Vec<String>>,
    pub expand: Vec<ExpandItem>,
    pub orderby: Vec<OrderItem>,
    pub top: Option<u32>,
    pub skip: Option<u32>,
    pub count: bool,
    pub search: Option<String>,
    pub apply: Option<String>,
    pub skiptoken: Option<String>,
}

impl QueryOptions {
    pub fn from_raw(
        filter: Option<&str>,
        select: Option<&str>,
        expand: Option<&str>,
        orderby: Option<&str>,
        top: Option<&str>,
        skip: Option<&str>,
        count: Option<&str>,
        search: Option<&str>,
        apply: Option<&str>,
        skiptoken: Option<&str>,
    ) -> Result<Self, ODataError> {
        let filter = filter.map(|f| parse_expression(f)).transpose().map_err(|e| {
            ODataError::malformed(format!("$filter: {e}"))
        })?;

        let select = select.map(|s| {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        });

        let expand = match expand {
            Some(s) => parse_expand(s)?,
            None => Vec::new(),
        };

        let orderby = match orderby {
            Some(s) => parse_orderby(s)?,
            None => Vec::new(),
        };

        let top = top
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|_| ODataError::malformed("$top must be a non-negative integer"))?;
        let skip = skip
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|_| ODataError::malformed("$skip must be a non-negative integer"))?;
        let count = matches!(count, Some("true"));

        Ok(Self {
            filter,
            select,
            expand,
            orderby,
            top,
            skip,
            count,
            search: search.map(str::to_string),
            apply: apply.map(str::to_string),
            skiptoken: skiptoken.map(str::to_string),
        })
    }
}

fn parse_orderby(raw: &str) -> Result<Vec<OrderItem>, ODataError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|clause| {
            let mut parts = clause.split_whitespace();
            let path_str = parts
                .next()
                .ok_or_else(|| ODataError::malformed("empty $orderby clause"))?;
            let dir = match parts.next() {
                None | Some("asc") => SortDir::Asc,
                Some("desc") => SortDir::Desc,
                Some(other) => {
                    return Err(ODataError::malformed(format!(
                        "invalid $orderby direction '{other}'"
                    )));
                }
            };
            Ok(OrderItem {
                path: path_str.split('/').map(str::to_string).collect(),
                dir,
            })
        })
        .collect()
}

/// Parses `$expand=Nav1($select=A,B;$filter=...),Nav2` into nested `QueryOptions`
/// trees. Nested options inside `(...)` are separated with `;`, each using the
/// same `$name=value` shape as the top-level query string.
fn parse_expand(raw: &str) -> Result<Vec<ExpandItem>, ODataError> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes = raw.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] as char {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(parse_one_expand(raw[start..i].trim())?);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < raw.len() {
        items.push(parse_one_expand(raw[start..].trim())?);
    }
    Ok(items)
}

fn parse_one_expand(clause: &str) -> Result<ExpandItem, ODataError> {
    if clause.is_empty() {
        return Err(ODataError::malformed("empty $expand clause"));
    }
    match clause.find('(') {
        None => Ok(ExpandItem {
            nav: clause.to_string(),
            nested: Box::new(QueryOptions::default()),
        }),
        Some(open) => {
            if !clause.ends_with(')') {
                return Err(ODataError::malformed(format!(
                    "unbalanced parentheses in $expand clause '{clause}'"
                )));
            }
            let nav = clause[..open].to_string();
            let body = &clause[open + 1..clause.len() - 1];
            let mut filter = None;
            let mut select = None;
            let mut expand = None;
            let mut orderby = None;
            let mut top = None;
            let mut skip = None;
            let mut count = None;
            for sub in split_top_level(body, ';') {
                let (k, v) = sub
                    .split_once('=')
                    .ok_or_else(|| ODataError::malformed(format!("malformed nested option '{sub}'")))?;
                match k.trim() {
                    "$filter" => filter = Some(v.to_string()),
                    "$select" => select = Some(v.to_string()),
                    "$expand" => expand = Some(v.to_string()),
                    "$orderby" => orderby = Some(v.to_string()),
                    "$top" => top = Some(v.to_string()),
                    "$skip" => skip = Some(v.to_string()),
                    "$count" => count = Some(v.to_string()),
                    other => {
                        return Err(ODataError::malformed(format!(
                            "unknown nested $expand option '{other}'"
                        )));
                    }
                }
            }
            let nested = QueryOptions::from_raw(
                filter.as_deref(),
                select.as_deref(),
                expand.as_deref(),
                orderby.as_deref(),
                top.as_deref(),
                skip.as_deref(),
                count.as_deref(),
                None,
                None,
                None,
            )?;
            Ok(ExpandItem {
                nav,
                nested: Box::new(nested),
            })
        }
    }
}

fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_orderby() {
        let items = parse_orderby("Name desc, Id").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].dir, SortDir::Desc);
        assert_eq!(items[1].dir, SortDir::Asc);
    }

    #[test]
    fn parses_nested_expand_with_filter_and_select() {
        let items = parse_expand("Orders($select=Id,Total;$filter=Total gt 10),Category").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].nav, "Orders");
        assert!(items[0].nested.filter.is_some());
        assert_eq!(items[0].nested.select.as_ref().unwrap().len(), 2);
        assert_eq!(items[1].nav, "Category");
    }
}
