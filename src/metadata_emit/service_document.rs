//! Service document rendering for `GET /`.

use serde_json::{Value, json};

use crate::metadata::MetadataRegistry;
use crate::serialize::ServiceRoot;

pub fn render_service_document(registry: &MetadataRegistry, root: &ServiceRoot) -> Value {
    let mut values = Vec::new();

    let mut set_names: Vec<&String> = registry.entity_sets.keys().collect();
    set_names.sort();
    for set_name in set_names {
        values.push(json!({ "name": set_name, "kind": "EntitySet", "url": set_name }));
    }

    let mut singleton_names: Vec<&String> = registry.singletons.keys().collect();
    singleton_names.sort();
    for name in singleton_names {
        values.push(json!({ "name": name, "kind": "Singleton", "url": name }));
    }

    json!({
        "@odata.context": root.metadata_url(),
        "value": values,
    })
}
