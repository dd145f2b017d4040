//! Shapes a single entity (and, recursively, its `$expand`ed navigations)
//! into the annotated JSON object the wire format requires.

use serde_json::{Map, Value};

use crate::metadata::EntityDescription;
use crate::serialize::context::ServiceRoot;
use crate::serialize::level::MetadataLevel;
use crate::store::Row;
use crate::url::{KeyLiteral, entity_id, key_literal_to_sql, render_key_segment};
use crate::write::convert::sql_to_json;

/// The result of resolving one navigation property for one parent row,
/// built by whatever already queried the nested rows (the dispatch layer).
/// Absent means the navigation was not `$expand`ed.
pub enum Expansion {
    Collection(Vec<EntityNode>),
    Single(Option<Box<EntityNode>>),
}

/// One entity's row, its own type description, plus whichever of its
/// navigations were expanded. Carrying `entity` on the node (rather than
/// threading a registry through the recursion) keeps a nested expansion
/// self-describing regardless of how many levels deep it sits.
pub struct EntityNode {
    pub set_name: String,
    pub entity: EntityDescription,
    pub row: Row,
    pub expansions: std::collections::HashMap<String, Expansion>,
}

impl EntityNode {
    pub fn new(set_name: impl Into<String>, entity: EntityDescription, row: Row) -> Self {
        Self { set_name: set_name.into(), entity, row, expansions: std::collections::HashMap::new() }
    }

    pub fn with_expansion(mut self, nav: impl Into<String>, expansion: Expansion) -> Self {
        self.expansions.insert(nav.into(), expansion);
        self
    }
}

fn key_literal_from_sql(value: &crate::plan::SqlValue) -> Option<KeyLiteral> {
    match value {
        crate::plan::SqlValue::Int(n) => Some(KeyLiteral::Int(*n)),
        crate::plan::SqlValue::Text(s) => Some(KeyLiteral::String(s.clone())),
        _ => None,
    }
}

/// Re-derives the key literal pairs a row carries, for building `@odata.id`
/// and navigation-link URLs without a second round-trip to the store.
pub fn row_key_pairs(
    row: &Row,
    entity: &EntityDescription,
) -> Vec<(crate::metadata::PropertyDescriptor, KeyLiteral)> {
    entity
        .key_properties()
        .filter_map(|p| {
            let value = row.get(&p.physical_name)?;
            key_literal_from_sql(value).map(|lit| (p.clone(), lit))
        })
        .collect()
}

/// Renders one entity node into its JSON object, honoring `$select` and the
/// negotiated metadata level. `select` of `None` means "every non-excluded
/// property", matching the planner's own default.
pub fn entity_to_json(
    node: &EntityNode,
    select: Option<&[String]>,
    level: MetadataLevel,
    root: &ServiceRoot,
) -> Map<String, Value> {
    let entity = &node.entity;
    let mut out = Map::new();
    let key_pairs = row_key_pairs(&node.row, entity);
    let id = entity_id(&node.set_name, &key_pairs);

    if level.includes_type_annotations() {
        out.insert("@odata.type".to_string(), Value::from(format!("#{}", entity.qualified_name)));
        out.insert("@odata.id".to_string(), Value::from(root.resource_url(&id)));
    }

    for prop in &entity.properties {
        if prop.is_excluded {
            continue;
        }
        let include = prop.is_key
            || match select {
                Some(s) => s.iter().any(|n| n == &prop.logical_name),
                None => true,
            };
        if !include {
            continue;
        }
        let value = node.row.get(&prop.physical_name).map(sql_to_json).unwrap_or(Value::Null);
        out.insert(prop.logical_name.clone(), value);
    }

    for nav in &entity.navigations {
        match node.expansions.get(&nav.logical_name) {
            Some(Expansion::Collection(items)) => {
                let rendered: Vec<Value> =
                    items.iter().map(|child| Value::Object(entity_to_json(child, None, level, root))).collect();
                out.insert(nav.logical_name.clone(), Value::Array(rendered));
            }
            Some(Expansion::Single(Some(child))) => {
                out.insert(nav.logical_name.clone(), Value::Object(entity_to_json(child, None, level, root)));
            }
            Some(Expansion::Single(None)) => {
                out.insert(nav.logical_name.clone(), Value::Null);
            }
            None if level.includes_type_annotations() => {
                out.insert(
                    format!("{}@odata.navigationLink", nav.logical_name),
                    Value::from(root.resource_url(&format!("{id}/{}", nav.logical_name))),
                );
            }
            None => {}
        }
    }

    out
}

pub fn key_segment_for_row(row: &Row, entity: &EntityDescription) -> String {
    let pairs = row_key_pairs(row, entity);
    render_key_segment(&pairs)
}

pub fn key_sql_values(row: &Row, entity: &EntityDescription) -> Vec<crate::plan::SqlValue> {
    let pairs = row_key_pairs(row, entity);
    pairs.iter().map(|(_, lit)| key_literal_to_sql(lit)).collect()
}
