//! `POST|PUT|DELETE /Set(k)/Nav/$ref` reference operations.

use serde_json::Value;

use crate::error::ODataError;
use crate::metadata::MetadataRegistry;
use crate::plan::SqlValue;
use crate::store::sqlite::SqliteStore;
use crate::url::{self, KeyBody, RequestShape};

fn resolve_target_key(
    registry: &MetadataRegistry,
    target_set_name: &str,
    odata_id: &str,
) -> Result<Vec<(crate::metadata::PropertyDescriptor, crate::url::KeyLiteral)>, ODataError> {
    let trimmed = odata_id.trim_start_matches('/');
    let parsed = url::parse_url(&format!("/{trimmed}"), None)?;
    let RequestShape::Resource { segments, terminal } = parsed.shape else {
        return Err(ODataError::malformed(format!("'{odata_id}' is not a valid entity reference")));
    };
    if segments.len() != 1 || terminal != crate::url::Terminal::None {
        return Err(ODataError::malformed(format!("'{odata_id}' is not a single-entity reference")));
    }
    if segments[0].name != target_set_name {
        return Err(ODataError::malformed(format!(
            "reference targets '{}', expected '{target_set_name}'",
            segments[0].name
        )));
    }
    let target_entity = registry
        .entity_type_for_set(target_set_name)
        .ok_or_else(|| ODataError::internal("dangling navigation target set"))?;
    url::resolve_key(target_entity, &segments[0].key)
}

/// `POST /Set(k)/Nav/$ref` — attach to a collection-valued navigation, or
/// `PUT /Set(k)/Nav/$ref` — replace a single-valued navigation. Both set
/// the partner's foreign-key column, since every navigation modeled here
/// either owns its FK (`belongs_to`) or has the partner own it
/// (`has_many`/`has_one`); attaching always writes on the owning side.
pub fn attach(
    store: &SqliteStore,
    registry: &MetadataRegistry,
    set_name: &str,
    key: &KeyBody,
    nav_name: &str,
    body: Value,
) -> Result<(), ODataError> {
    let set = registry
        .entity_set(set_name)
        .ok_or_else(|| ODataError::not_found(format!("no entity set named '{set_name}'")))?;
    let entity = registry
        .entity_type_for_set(set_name)
        .ok_or_else(|| ODataError::internal("dangling entity set -> entity type reference"))?;
    let key_pairs = url::resolve_key(entity, key)?;

    let nav = entity
        .navigation(nav_name)
        .ok_or_else(|| ODataError::malformed(format!("'{nav_name}' is not a navigation property")))?;
    let odata_id = body
        .get("@odata.id")
        .and_then(Value::as_str)
        .ok_or_else(|| ODataError::malformed("reference body must carry '@odata.id'"))?;

    if nav.owns_foreign_key {
        // This side owns the FK: updating it means updating our own row.
        let target_pairs = resolve_target_key(registry, &nav.target_set, odata_id)?;
        let fk = nav.foreign_key.clone().unwrap_or_default();
        let fk_column = entity.property(&fk).map(|p| p.physical_name.clone()).unwrap_or(fk);
        let value = url::key_literal_to_sql(&target_pairs[0].1);
        let where_clauses: Vec<String> = key_pairs
            .iter()
            .enumerate()
            .map(|(i, (p, _))| format!("{} = ?{}", p.physical_name, i + 2))
            .collect();
        let mut params = vec![value];
        params.extend(key_pairs.iter().map(|(_, lit)| url::key_literal_to_sql(lit)));
        store.execute_sync(
            &format!("UPDATE {} SET {} = ?1 WHERE {}", set.table_name, fk_column, where_clauses.join(" AND ")),
            &params,
        )?;
    } else {
        // Partner owns the FK: updating the partner's row to point at us.
        let target_set = registry
            .entity_set(&nav.target_set)
            .ok_or_else(|| ODataError::internal("dangling navigation target set"))?;
        let target_entity = registry
            .entity_types
            .get(&nav.target_type)
            .ok_or_else(|| ODataError::internal("dangling navigation target type"))?;
        let target_pairs = resolve_target_key(registry, &nav.target_set, odata_id)?;
        let fk = nav.foreign_key.clone().unwrap_or_default();
        let fk_column = target_entity.property(&fk).map(|p| p.physical_name.clone()).unwrap_or(fk);
        let own_key_value = url::key_literal_to_sql(&key_pairs[0].1);

        let where_clauses: Vec<String> = target_pairs
            .iter()
            .enumerate()
            .map(|(i, (p, _))| format!("{} = ?{}", p.physical_name, i + 2))
            .collect();
        let mut params = vec![own_key_value];
        params.extend(target_pairs.iter().map(|(_, lit)| url::key_literal_to_sql(lit)));
        store.execute_sync(
            &format!("UPDATE {} SET {} = ?1 WHERE {}", target_set.table_name, fk_column, where_clauses.join(" AND ")),
            &params,
        )?;
    }
    Ok(())
}

/// `DELETE /Set(k)/Nav/$ref?$id=/OtherSet(k)` — detach a specific target by
/// nulling out the foreign key that bound it.
pub fn detach(
    store: &SqliteStore,
    registry: &MetadataRegistry,
    set_name: &str,
    key: &KeyBody,
    nav_name: &str,
    target_odata_id: &str,
) -> Result<(), ODataError> {
    let set = registry
        .entity_set(set_name)
        .ok_or_else(|| ODataError::not_found(format!("no entity set named '{set_name}'")))?;
    let entity = registry
        .entity_type_for_set(set_name)
        .ok_or_else(|| ODataError::internal("dangling entity set -> entity type reference"))?;
    let key_pairs = url::resolve_key(entity, key)?;
    let nav = entity
        .navigation(nav_name)
        .ok_or_else(|| ODataError::malformed(format!("'{nav_name}' is not a navigation property")))?;

    if nav.owns_foreign_key {
        let fk = nav.foreign_key.clone().unwrap_or_default();
        let fk_column = entity.property(&fk).map(|p| p.physical_name.clone()).unwrap_or(fk);
        let where_clauses: Vec<String> = key_pairs
            .iter()
            .enumerate()
            .map(|(i, (p, _))| format!("{} = ?{}", p.physical_name, i + 1))
            .collect();
        let params: Vec<SqlValue> = key_pairs.iter().map(|(_, lit)| url::key_literal_to_sql(lit)).collect();
        store.execute_sync(
            &format!("UPDATE {} SET {fk_column} = NULL WHERE {}", set.table_name, where_clauses.join(" AND ")),
            &params,
        )?;
    } else {
        let target_set = registry
            .entity_set(&nav.target_set)
            .ok_or_else(|| ODataError::internal("dangling navigation target set"))?;
        let target_entity = registry
            .entity_types
            .get(&nav.target_type)
            .ok_or_else(|| ODataError::internal("dangling navigation target type"))?;
        let target_pairs = resolve_target_key(registry, &nav.target_set, target_odata_id)?;
        let fk = nav.foreign_key.clone().unwrap_or_default();
        let fk_column = target_entity.property(&fk).map(|p| p.physical_name.clone()).unwrap_or(fk);
        let where_clauses: Vec<String> = target_pairs
            .iter()
            .enumerate()
            .map(|(i, (p, _))| format!("{} = ?{}", p.physical_name, i + 1))
            .collect();
        let params: Vec<SqlValue> = target_pairs.iter().map(|(_, lit)| url::key_literal_to_sql(lit)).collect();
        store.execute_sync(
            &format!("UPDATE {} SET {fk_column} = NULL WHERE {}", target_set.table_name, where_clauses.join(" AND ")),
            &params,
        )?;
    }
    Ok(())
}
