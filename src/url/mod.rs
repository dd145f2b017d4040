pub mod key;
pub mod parser;

pub use key::{entity_id, key_literal_to_sql, render_key_segment, resolve_key};
pub use parser::{KeyBody, KeyLiteral, ParsedUrl, RequestShape, Segment, Terminal, parse_url};
