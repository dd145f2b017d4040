//! Top-level response envelopes: entity collections, single entities,
//! structural properties, and `$value` raw scalars.

use serde_json::{Map, Value};

use crate::serialize::context::ServiceRoot;
use crate::serialize::entity::{EntityNode, entity_to_json};
use crate::serialize::level::MetadataLevel;

pub struct CollectionResponse {
    pub body: Value,
    pub content_type: String,
}

/// `{ "@odata.context": ..., "@odata.count": ..., "value": [...], "@odata.nextLink": ... }`
pub fn serialize_collection(
    set_name: &str,
    nodes: &[EntityNode],
    select: Option<&[String]>,
    level: MetadataLevel,
    root: &ServiceRoot,
    count: Option<i64>,
    next_link: Option<String>,
) -> CollectionResponse {
    let mut body = Map::new();
    if level.includes_context() {
        body.insert("@odata.context".to_string(), Value::from(root.context_url(set_name)));
    }
    if let Some(count) = count {
        body.insert("@odata.count".to_string(), Value::from(count));
    }
    let values: Vec<Value> = nodes.iter().map(|n| Value::Object(entity_to_json(n, select, level, root))).collect();
    body.insert("value".to_string(), Value::Array(values));
    if let Some(link) = next_link {
        body.insert("@odata.nextLink".to_string(), Value::from(link));
    }
    CollectionResponse { body: Value::Object(body), content_type: level.content_type() }
}

pub struct EntityResponse {
    pub body: Value,
    pub content_type: String,
    pub etag: Option<String>,
}

/// `{ "@odata.context": "...#Set/$entity", ...fields }`
pub fn serialize_entity(
    set_name: &str,
    node: &EntityNode,
    select: Option<&[String]>,
    level: MetadataLevel,
    root: &ServiceRoot,
) -> EntityResponse {
    let mut fields = entity_to_json(node, select, level, root);
    if level.includes_context() {
        let mut with_context = Map::new();
        with_context.insert("@odata.context".to_string(), Value::from(root.context_url(&format!("{set_name}/$entity"))));
        with_context.append(&mut fields);
        fields = with_context;
    }
    let etag = node
        .entity
        .etag_property()
        .map(|p| format!("\"{}\"", crate::write::concurrency::render_etag(&node.row, &p.physical_name)));
    EntityResponse { body: Value::Object(fields), content_type: level.content_type(), etag }
}

/// Structural-property read: `{ "@odata.context": "...#Set(k)/Prop", "value": X }`.
pub fn serialize_property(context_suffix: &str, value: Value, level: MetadataLevel, root: &ServiceRoot) -> Value {
    let mut body = Map::new();
    if level.includes_context() {
        body.insert("@odata.context".to_string(), Value::from(root.context_url(context_suffix)));
    }
    body.insert("value".to_string(), value);
    Value::Object(body)
}

/// `$value` read: the raw scalar rendered as `text/plain`, never JSON.
pub fn serialize_raw_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
