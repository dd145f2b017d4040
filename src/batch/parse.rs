//! Hand-rolled `multipart/mixed` batch envelope parser. The grammar
//! batch bodies use is narrow enough (no transfer encodings beyond binary,
//! no nested attachments) that reaching for a generic multipart crate
//! would buy nothing a few dozen lines of splitting doesn't already do,
//! matching how this crate hand-rolls its other narrow-grammar parsers.

use std::collections::HashMap;

use crate::batch::model::{BatchPart, SubRequest};
use crate::error::ODataError;

pub fn extract_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let part = part.trim();
        part.strip_prefix("boundary=").map(|b| b.trim_matches('"').to_string())
    })
}

/// Splits a multipart body on `--boundary` markers, returning each part's
/// raw bytes (headers + blank line + content). Stops at the closing
/// `--boundary--` marker; ignores any preamble/epilogue.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let marker = format!("--{boundary}");
    let marker_bytes = marker.as_bytes();
    let mut parts = Vec::new();
    let mut pos = 0;

    // Find the first marker to skip any preamble.
    let Some(first) = find(body, marker_bytes, 0) else { return parts };
    pos = first + marker_bytes.len();

    loop {
        if body[pos..].starts_with(b"--") {
            break; // closing delimiter
        }
        let next = match find(body, marker_bytes, pos) {
            Some(n) => n,
            None => break,
        };
        let mut chunk = &body[pos..next];
        chunk = trim_crlf_edges(chunk);
        if !chunk.is_empty() {
            parts.push(chunk);
        }
        pos = next + marker_bytes.len();
    }
    parts
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..].windows(needle.len()).position(|w| w == needle).map(|p| p + from)
}

fn trim_crlf_edges(mut chunk: &[u8]) -> &[u8] {
    while chunk.starts_with(b"\r\n") {
        chunk = &chunk[2..];
    }
    while chunk.starts_with(b"\n") {
        chunk = &chunk[1..];
    }
    while chunk.ends_with(b"\r\n") {
        chunk = &chunk[..chunk.len() - 2];
    }
    while chunk.ends_with(b"\n") {
        chunk = &chunk[..chunk.len() - 1];
    }
    chunk
}

/// Splits a chunk into its header block and body at the first blank line.
fn split_headers(chunk: &[u8]) -> (HashMap<String, String>, &[u8]) {
    let text = String::from_utf8_lossy(chunk);
    let mut headers = HashMap::new();
    let mut consumed = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        consumed += line.len();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    (headers, &chunk[consumed.min(chunk.len())..])
}

fn parse_http_subrequest(part_headers: &HashMap<String, String>, raw: &[u8]) -> Result<SubRequest, ODataError> {
    let raw = trim_crlf_edges(raw);
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.splitn(2, '\n');
    let start_line = lines.next().unwrap_or("").trim_end_matches('\r');
    let rest = lines.next().unwrap_or("");

    let mut start_parts = start_line.split_whitespace();
    let method = start_parts
        .next()
        .ok_or_else(|| ODataError::malformed("batch sub-request missing HTTP method"))?
        .to_string();
    let path = start_parts
        .next()
        .ok_or_else(|| ODataError::malformed("batch sub-request missing request path"))?
        .to_string();

    let (headers, body) = split_headers(rest.as_bytes());
    let content_id = part_headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("Content-ID")).map(|(_, v)| v.clone());

    Ok(SubRequest { content_id, method, path, headers, body: body.to_vec() })
}

/// Parses a top-level `multipart/mixed` batch body into its parts.
pub fn parse_batch(body: &[u8], content_type: &str) -> Result<Vec<BatchPart>, ODataError> {
    let boundary = extract_boundary(content_type)
        .ok_or_else(|| ODataError::malformed("batch request missing multipart boundary"))?;

    let mut parts = Vec::new();
    for chunk in split_parts(body, &boundary) {
        let (part_headers, rest) = split_headers(chunk);
        let part_content_type = part_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Type"))
            .map(|(_, v)| v.as_str())
            .unwrap_or("");

        if part_content_type.starts_with("multipart/mixed") {
            let nested_boundary = extract_boundary(part_content_type)
                .ok_or_else(|| ODataError::malformed("changeset part missing nested boundary"))?;
            let mut subs = Vec::new();
            for nested_chunk in split_parts(rest, &nested_boundary) {
                let (nested_headers, nested_rest) = split_headers(nested_chunk);
                let nested_content_type = nested_headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("Content-Type"))
                    .map(|(_, v)| v.as_str())
                    .unwrap_or("");
                if nested_content_type.starts_with("multipart/mixed") {
                    return Err(ODataError::malformed("nested changesets are not supported"));
                }
                subs.push(parse_http_subrequest(&nested_headers, nested_rest)?);
            }
            parts.push(BatchPart::ChangeSet(subs));
        } else if part_content_type.starts_with("application/http") {
            parts.push(BatchPart::Http(parse_http_subrequest(&part_headers, rest)?));
        } else {
            return Err(ODataError::malformed(format!("unsupported batch part content-type '{part_content_type}'")));
        }
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_http_part() {
        let body = b"--batch_1\r\nContent-Type: application/http\r\nContent-ID: 1\r\n\r\nGET /Products(1) HTTP/1.1\r\nAccept: application/json\r\n\r\n\r\n--batch_1--";
        let parts = parse_batch(body, "multipart/mixed; boundary=batch_1").unwrap();
        assert_eq!(parts.len(), 1);
        match &parts[0] {
            BatchPart::Http(sub) => {
                assert_eq!(sub.method, "GET");
                assert_eq!(sub.path, "/Products(1)");
                assert_eq!(sub.content_id.as_deref(), Some("1"));
            }
            _ => panic!("expected an Http part"),
        }
    }

    #[test]
    fn parses_nested_changeset() {
        let body = b"--batch_1\r\n\
Content-Type: multipart/mixed; boundary=changeset_1\r\n\r\n\
--changeset_1\r\n\
Content-Type: application/http\r\n\
Content-ID: 1\r\n\r\n\
POST /Products HTTP/1.1\r\n\
Content-Type: application/json\r\n\r\n\
{\"Name\":\"Widget\"}\r\n\
--changeset_1--\r\n\
--batch_1--";
        let parts = parse_batch(body, "multipart/mixed; boundary=batch_1").unwrap();
        assert_eq!(parts.len(), 1);
        match &parts[0] {
            BatchPart::ChangeSet(subs) => {
                assert_eq!(subs.len(), 1);
                assert_eq!(subs[0].method, "POST");
                assert_eq!(subs[0].path, "/Products");
                assert!(subs[0].body.starts_with(b"{\"Name\""));
            }
            _ => panic!("expected a ChangeSet part"),
        }
    }
}
