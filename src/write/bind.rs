//! Resolves `X@odata.bind` pairs against an existing row in the target
//! navigation's entity set.

use serde_json::{Map, Value};

use crate::error::ODataError;
use crate::metadata::{Cardinality, EntityDescription, MetadataRegistry};
use crate::plan::SqlValue;
use crate::store::sqlite::SqliteStore;
use crate::url::{self, RequestShape};

pub struct ResolvedBinding {
    pub nav_logical_name: String,
    pub foreign_key_column: String,
    pub foreign_key_value: SqlValue,
}

/// Pulls every `X@odata.bind` entry out of `body`, validating that `X`
/// names a navigation on `entity` and that the bound path addresses an
/// existing row in the navigation's target set.
pub fn extract_and_resolve(
    store: &SqliteStore,
    registry: &MetadataRegistry,
    entity: &EntityDescription,
    body: &mut Map<String, Value>,
) -> Result<Vec<ResolvedBinding>, ODataError> {
    let bind_keys: Vec<String> = body
        .keys()
        .filter(|k| k.ends_with("@odata.bind"))
        .cloned()
        .collect();

    let mut resolved = Vec::with_capacity(bind_keys.len());
    for key in bind_keys {
        let nav_name = key.trim_end_matches("@odata.bind");
        let value = body
            .remove(&key)
            .ok_or_else(|| ODataError::internal("bind key vanished during extraction"))?;
        let path_text = value
            .as_str()
            .ok_or_else(|| ODataError::malformed(format!("'{key}' must be a string @odata.id reference")))?;

        let nav = entity
            .navigation(nav_name)
            .ok_or_else(|| ODataError::malformed(format!("'{nav_name}' is not a navigation property")))?;
        if nav.cardinality != Cardinality::Single || !nav.owns_foreign_key {
            return Err(ODataError::malformed(format!(
                "'{nav_name}' cannot be bound directly; it is not a single-valued owning navigation"
            )));
        }

        let trimmed = path_text.trim_start_matches('/');
        let parsed = url::parse_url(&format!("/{trimmed}"), None)?;
        let RequestShape::Resource { segments, terminal } = parsed.shape else {
            return Err(ODataError::malformed(format!("'{path_text}' is not a valid entity reference")));
        };
        if segments.len() != 1 || terminal != crate::url::Terminal::None {
            return Err(ODataError::malformed(format!("'{path_text}' is not a single-entity reference")));
        }
        let segment = &segments[0];
        if segment.name != nav.target_set {
            return Err(ODataError::malformed(format!(
                "'{nav_name}' binds to set '{}', got '{}'",
                nav.target_set, segment.name
            )));
        }

        let target_entity = registry
            .entity_types
            .get(&nav.target_type)
            .ok_or_else(|| ODataError::internal("dangling navigation target type"))?;
        let pairs = url::resolve_key(target_entity, &segment.key)?;
        let target_set = registry
            .entity_set(&nav.target_set)
            .ok_or_else(|| ODataError::internal("dangling navigation target set"))?;

        let where_sql: Vec<String> = pairs
            .iter()
            .enumerate()
            .map(|(i, (p, _))| format!("{} = ?{}", p.physical_name, i + 1))
            .collect();
        let params: Vec<SqlValue> = pairs.iter().map(|(_, lit)| url::key_literal_to_sql(lit)).collect();
        let count = store.count_sync(
            &format!("SELECT COUNT(*) FROM {} WHERE {}", target_set.table_name, where_sql.join(" AND ")),
            &params,
        )?;
        if count == 0 {
            return Err(ODataError::malformed(format!("'{path_text}' does not reference an existing row")));
        }

        let fk = nav
            .foreign_key
            .clone()
            .ok_or_else(|| ODataError::internal("owning navigation missing foreign_key"))?;
        let fk_column = entity
            .property(&fk)
            .map(|p| p.physical_name.clone())
            .unwrap_or(fk);
        resolved.push(ResolvedBinding {
            nav_logical_name: nav_name.to_string(),
            foreign_key_column: fk_column,
            foreign_key_value: params.into_iter().next().unwrap_or(SqlValue::Null),
        });
    }
    Ok(resolved)
}
