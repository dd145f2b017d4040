use serde_json::{Map, Value};

use crate::error::ODataError;
use crate::journal::{ChangeEvent, ChangeKind, Journal};
use crate::metadata::{EntityDescription, MetadataRegistry};
use crate::plan::SqlValue;
use crate::store::Row;
use crate::store::sqlite::SqliteStore;
use crate::url::{self, KeyBody, KeyLiteral};
use crate::write::bind;
use crate::write::concurrency::check_if_match;
use crate::write::convert::{json_to_sql, sql_to_json, zero_value};
use crate::write::hooks::HookRegistry;

pub struct UpdateOutcome {
    pub entity_id: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// PATCH: only the supplied columns are written.
    Patch,
    /// PUT: every non-key column is written; omitted fields are cleared.
    Replace,
}

/// Everything needed to run the UPDATE, already validated against the
/// entity model and the row's current ETag. See [`crate::write::create::PreparedCreate`].
pub(crate) struct PreparedUpdate {
    pub entity: EntityDescription,
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub key_pairs: Vec<(crate::metadata::PropertyDescriptor, KeyLiteral)>,
    pub map: Map<String, Value>,
    pub current: Row,
    pub next_etag: Option<i64>,
    pub tracked: bool,
    pub set_name: String,
    pub entity_id: String,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn prepare_update(
    store: &SqliteStore,
    registry: &MetadataRegistry,
    hooks: &HookRegistry,
    set_name: &str,
    key: &KeyBody,
    body: Value,
    if_match: Option<&str>,
    mode: WriteMode,
) -> Result<PreparedUpdate, ODataError> {
    let set = registry
        .entity_set(set_name)
        .ok_or_else(|| ODataError::not_found(format!("no entity set named '{set_name}'")))?;
    let entity = registry
        .entity_types
        .get(&set.entity_type)
        .ok_or_else(|| ODataError::internal("dangling entity set -> entity type reference"))?;

    let key_pairs = url::resolve_key(entity, key)?;
    let current = load_row(store, &set.table_name, entity, &key_pairs)?
        .ok_or_else(|| ODataError::not_found(format!("{} not found", url::entity_id(set_name, &key_pairs))))?;
    check_if_match(entity, &current, if_match)?;

    let mut map = body
        .as_object()
        .cloned()
        .ok_or_else(|| ODataError::malformed("request body must be a JSON object"))?;

    for key_prop in entity.key_properties() {
        if map.contains_key(&key_prop.logical_name) {
            return Err(ODataError::malformed(format!(
                "'{}' is a key property and may not be changed",
                key_prop.logical_name
            )));
        }
    }
    for (field, _) in map.iter().filter(|(k, _)| !k.ends_with("@odata.bind")) {
        let Some(prop) = entity.property(field) else {
            return Err(ODataError::malformed(format!("'{field}' is not a property of {}", entity.type_name())));
        };
        if prop.is_immutable {
            return Err(ODataError::malformed(format!("'{field}' is immutable and may not be changed")));
        }
    }

    let bindings = bind::extract_and_resolve(store, registry, entity, &mut map)?;
    if let Some(hook) = hooks.before_update(&entity.qualified_name) {
        hook.call(&entity.qualified_name, &key_pairs.iter().map(|(_, l)| l.clone()).collect::<Vec<_>>(), &mut map)?;
    }

    let mut set_clauses: Vec<String> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    for prop in &entity.properties {
        if prop.is_key || prop.is_excluded {
            continue;
        }
        if let Some(binding) = bindings.iter().find(|b| {
            entity
                .navigation(&b.nav_logical_name)
                .and_then(|n| n.foreign_key.as_ref())
                .map(|fk| entity.property(fk).map(|p| p.physical_name.clone()))
                == Some(Some(prop.physical_name.clone()))
        }) {
            set_clauses.push(format!("{} = ?{}", prop.physical_name, set_clauses.len() + 1));
            params.push(binding.foreign_key_value.clone());
            continue;
        }
        if prop.is_etag {
            continue; // bumped separately below
        }
        if let Some(v) = map.get(&prop.logical_name) {
            set_clauses.push(format!("{} = ?{}", prop.physical_name, set_clauses.len() + 1));
            params.push(json_to_sql(v, prop.edm_type, &prop.logical_name)?);
        } else if mode == WriteMode::Replace {
            set_clauses.push(format!("{} = ?{}", prop.physical_name, set_clauses.len() + 1));
            params.push(zero_value(prop.edm_type));
        }
    }

    let next_etag = entity.etag_property().map(|p| match current.get(&p.physical_name) {
        Some(SqlValue::Int(n)) => n + 1,
        _ => 1,
    });
    if let (Some(etag_prop), Some(value)) = (entity.etag_property(), next_etag) {
        set_clauses.push(format!("{} = ?{}", etag_prop.physical_name, set_clauses.len() + 1));
        params.push(SqlValue::Int(value));
    }

    let where_start = set_clauses.len() + 1;
    let where_clauses: Vec<String> = key_pairs
        .iter()
        .enumerate()
        .map(|(i, (p, _))| format!("{} = ?{}", p.physical_name, where_start + i))
        .collect();
    for (_, lit) in &key_pairs {
        params.push(url::key_literal_to_sql(lit));
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        set.table_name,
        set_clauses.join(", "),
        where_clauses.join(" AND ")
    );

    let entity_id = url::entity_id(set_name, &key_pairs);
    Ok(PreparedUpdate {
        entity: entity.clone(),
        sql,
        params,
        key_pairs,
        map,
        current,
        next_etag,
        tracked: registry.is_tracked(set_name),
        set_name: set_name.to_string(),
        entity_id,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn update(
    store: &SqliteStore,
    registry: &MetadataRegistry,
    journal: &Journal,
    hooks: &HookRegistry,
    set_name: &str,
    key: &KeyBody,
    body: Value,
    if_match: Option<&str>,
    mode: WriteMode,
) -> Result<UpdateOutcome, ODataError> {
    let prepared = prepare_update(store, registry, hooks, set_name, key, body, if_match, mode)?;

    let event = store.with_transaction(|tx| {
        run_update(
            tx,
            journal,
            &prepared.sql,
            &prepared.params,
            &prepared.entity,
            &prepared.key_pairs,
            &prepared.map,
            prepared.next_etag,
            prepared.tracked,
            &prepared.set_name,
            &prepared.entity_id,
        )
    })?;

    if let Some(event) = event.clone() {
        journal.commit_after_tx(vec![event]);
    }

    Ok(finalize_update(&prepared))
}

pub(crate) fn finalize_update(prepared: &PreparedUpdate) -> UpdateOutcome {
    let mut fields = Map::new();
    for (k, v) in prepared.current.0.iter() {
        if let Some(prop) = prepared.entity.properties.iter().find(|p| &p.physical_name == k) {
            fields.insert(prop.logical_name.clone(), sql_to_json(v));
        }
    }
    for (k, v) in &prepared.map {
        fields.insert(k.clone(), v.clone());
    }
    if let Some(etag_prop) = prepared.entity.etag_property() {
        if let Some(value) = prepared.next_etag {
            fields.insert(etag_prop.logical_name.clone(), Value::from(value));
        }
    }
    UpdateOutcome { entity_id: prepared.entity_id.clone(), fields }
}

/// Runs the UPDATE and journal write against an already-open transaction;
/// see [`crate::write::create::run_insert`] for why this is split out.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_update(
    tx: &rusqlite::Transaction,
    journal: &Journal,
    sql: &str,
    params: &[SqlValue],
    entity: &EntityDescription,
    key_pairs: &[(crate::metadata::PropertyDescriptor, KeyLiteral)],
    map: &Map<String, Value>,
    next_etag: Option<i64>,
    tracked: bool,
    set_name: &str,
    entity_id: &str,
) -> Result<Option<ChangeEvent>, ODataError> {
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
    tx.execute(sql, params_refs.as_slice())
        .map_err(|e| ODataError::internal(format!("update failed: {e}")))?;

    if !tracked {
        return Ok(None);
    }
    let mut snapshot = map.clone();
    for (p, lit) in key_pairs {
        snapshot.insert(p.logical_name.clone(), crate::write::create::key_literal_to_json(lit));
    }
    if let (Some(etag_prop), Some(value)) = (entity.etag_property(), next_etag) {
        snapshot.insert(etag_prop.logical_name.clone(), Value::from(value));
    }
    let ev = ChangeEvent {
        set_name: set_name.to_string(),
        entity_id: entity_id.to_string(),
        kind: ChangeKind::Updated,
        snapshot: Some(Value::Object(snapshot)),
    };
    journal.write_in_tx(tx, &ev)?;
    Ok(Some(ev))
}

pub(crate) fn load_row(
    store: &SqliteStore,
    table_name: &str,
    entity: &EntityDescription,
    key_pairs: &[(crate::metadata::PropertyDescriptor, KeyLiteral)],
) -> Result<Option<Row>, ODataError> {
    let where_clauses: Vec<String> = key_pairs
        .iter()
        .enumerate()
        .map(|(i, (p, _))| format!("{} = ?{}", p.physical_name, i + 1))
        .collect();
    let params: Vec<SqlValue> = key_pairs.iter().map(|(_, lit)| url::key_literal_to_sql(lit)).collect();
    let columns: Vec<String> = entity
        .properties
        .iter()
        .filter(|p| !p.is_excluded)
        .map(|p| p.physical_name.clone())
        .collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        columns.join(", "),
        table_name,
        where_clauses.join(" AND ")
    );
    let mut rows = store.query_sync(&sql, &params)?;
    Ok(rows.pop())
}
