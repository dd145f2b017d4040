//! Delta (change-tracking) response shaping.

use serde_json::{Map, Value};

use crate::journal::{ChangeKind, JournaledEvent};
use crate::journal::DeltaToken;
use crate::serialize::context::ServiceRoot;
use crate::serialize::level::MetadataLevel;

/// Renders a window of journaled events into the `value` array of a delta
/// response: created/updated entities appear as their full snapshot,
/// deleted ones as the `id`-only shape agreed in the design notes.
pub fn serialize_delta(
    set_name: &str,
    events: &[JournaledEvent],
    level: MetadataLevel,
    root: &ServiceRoot,
    next_token: &DeltaToken,
) -> Value {
    let mut body = Map::new();
    if level.includes_context() {
        body.insert("@odata.context".to_string(), Value::from(root.context_url(&format!("{set_name}/$delta"))));
    }

    let values: Vec<Value> = events
        .iter()
        .map(|journaled| match journaled.event.kind {
            ChangeKind::Deleted => {
                let mut deleted = Map::new();
                deleted.insert(
                    "@odata.context".to_string(),
                    Value::from(root.context_url(&format!("{set_name}/$deletedEntity"))),
                );
                deleted.insert("id".to_string(), Value::from(root.resource_url(&journaled.event.entity_id)));
                Value::Object(deleted)
            }
            ChangeKind::Created | ChangeKind::Updated => {
                journaled.event.snapshot.clone().unwrap_or(Value::Null)
            }
        })
        .collect();
    body.insert("value".to_string(), Value::Array(values));
    body.insert(
        "@odata.deltaLink".to_string(),
        Value::from(root.resource_url(&format!("{set_name}?$deltatoken={}", next_token.encode()))),
    );
    Value::Object(body)
}

/// First response in a change-tracking sequence: the current snapshot plus
/// a fresh `@odata.deltaLink` marking "everything from here forward".
pub fn attach_delta_link(mut body: Value, set_name: &str, root: &ServiceRoot, token: &DeltaToken) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert(
            "@odata.deltaLink".to_string(),
            Value::from(root.resource_url(&format!("{set_name}?$deltatoken={}", token.encode()))),
        );
    }
    body
}
