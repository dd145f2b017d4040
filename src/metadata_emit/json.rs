//! CSDL JSON rendering for `/$metadata?$format=json`.

use serde_json::{Map, Value, json};

use crate::dispatch::ODataVersion;
use crate::metadata::{Cardinality, MetadataRegistry};

pub fn render_csdl_json(registry: &MetadataRegistry, version: ODataVersion) -> Value {
    let mut namespace_body = Map::new();

    let mut type_names: Vec<&String> = registry.entity_types.keys().collect();
    type_names.sort();
    for qualified_name in &type_names {
        let entity = &registry.entity_types[*qualified_name];
        let mut type_def = Map::new();
        type_def.insert("$Kind".to_string(), Value::from("EntityType"));

        let keys: Vec<Value> = entity.key_properties().map(|p| Value::from(p.logical_name.clone())).collect();
        type_def.insert("$Key".to_string(), Value::Array(keys));

        for prop in entity.properties.iter().filter(|p| !p.is_excluded) {
            let mut prop_def = Map::new();
            prop_def.insert("$Type".to_string(), Value::from(prop.edm_type.qualified_name()));
            if !prop.nullable {
                prop_def.insert("$Nullable".to_string(), Value::from(false));
            }
            if let Some(max_len) = prop.max_length {
                prop_def.insert("$MaxLength".to_string(), Value::from(max_len));
            }
            if let Some((precision, scale)) = prop.precision {
                prop_def.insert("$Precision".to_string(), Value::from(precision));
                prop_def.insert("$Scale".to_string(), Value::from(scale));
            }
            type_def.insert(prop.logical_name.clone(), Value::Object(prop_def));
        }

        for nav in &entity.navigations {
            let mut nav_def = Map::new();
            nav_def.insert("$Kind".to_string(), Value::from("NavigationProperty"));
            nav_def.insert("$Type".to_string(), Value::from(nav.target_type.clone()));
            if nav.cardinality == Cardinality::Collection {
                nav_def.insert("$Collection".to_string(), Value::from(true));
            } else {
                nav_def.insert("$Nullable".to_string(), Value::from(true));
            }
            type_def.insert(nav.logical_name.clone(), Value::Object(nav_def));
        }

        namespace_body.insert(entity.type_name().to_string(), Value::Object(type_def));
    }

    let mut container_body = Map::new();
    let mut set_names: Vec<&String> = registry.entity_sets.keys().collect();
    set_names.sort();
    for set_name in &set_names {
        let set = &registry.entity_sets[*set_name];
        container_body.insert(
            set.name.clone(),
            json!({ "$Collection": true, "$Type": set.entity_type }),
        );
    }
    let mut singleton_names: Vec<&String> = registry.singletons.keys().collect();
    singleton_names.sort();
    for name in &singleton_names {
        let singleton = &registry.singletons[*name];
        container_body.insert(singleton.name.clone(), json!({ "$Type": singleton.entity_type }));
    }

    let mut container_def = Map::new();
    container_def.insert("$Kind".to_string(), Value::from("EntityContainer"));
    for (k, v) in container_body {
        container_def.insert(k, v);
    }
    namespace_body.insert(registry.container_name.clone(), Value::Object(container_def));

    let mut top = Map::new();
    top.insert("$Version".to_string(), Value::from(version.as_str()));
    top.insert(
        "$EntityContainer".to_string(),
        Value::from(format!("{}.{}", registry.namespace, registry.container_name)),
    );
    top.insert(registry.namespace.clone(), Value::Object(namespace_body));
    Value::Object(top)
}
