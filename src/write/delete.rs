use crate::error::ODataError;
use crate::journal::{ChangeEvent, ChangeKind, Journal};
use crate::metadata::MetadataRegistry;
use crate::plan::SqlValue;
use crate::store::sqlite::SqliteStore;
use crate::url::{self, KeyBody};
use crate::write::concurrency::check_if_match;
use crate::write::hooks::HookRegistry;
use crate::write::update::load_row;

/// Everything needed to run the DELETE, already validated against the
/// entity model and the row's current ETag. See [`crate::write::create::PreparedCreate`].
pub(crate) struct PreparedDelete {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub tracked: bool,
    pub set_name: String,
    pub entity_id: String,
}

pub(crate) fn prepare_delete(
    store: &SqliteStore,
    registry: &MetadataRegistry,
    hooks: &HookRegistry,
    set_name: &str,
    key: &KeyBody,
    if_match: Option<&str>,
) -> Result<PreparedDelete, ODataError> {
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

    if let Some(hook) = hooks.before_delete(&entity.qualified_name) {
        let keys: Vec<_> = key_pairs.iter().map(|(_, l)| l.clone()).collect();
        hook.call(&entity.qualified_name, &keys)?;
    }

    let where_clauses: Vec<String> = key_pairs
        .iter()
        .enumerate()
        .map(|(i, (p, _))| format!("{} = ?{}", p.physical_name, i + 1))
        .collect();
    let params: Vec<SqlValue> = key_pairs.iter().map(|(_, lit)| url::key_literal_to_sql(lit)).collect();
    let sql = format!("DELETE FROM {} WHERE {}", set.table_name, where_clauses.join(" AND "));

    Ok(PreparedDelete {
        sql,
        params,
        tracked: registry.is_tracked(set_name),
        set_name: set_name.to_string(),
        entity_id: url::entity_id(set_name, &key_pairs),
    })
}

pub fn delete(
    store: &SqliteStore,
    registry: &MetadataRegistry,
    journal: &Journal,
    hooks: &HookRegistry,
    set_name: &str,
    key: &KeyBody,
    if_match: Option<&str>,
) -> Result<(), ODataError> {
    let prepared = prepare_delete(store, registry, hooks, set_name, key, if_match)?;

    let event: Option<ChangeEvent> = store.with_transaction(|tx| {
        run_delete(tx, journal, &prepared.sql, &prepared.params, prepared.tracked, &prepared.set_name, &prepared.entity_id)
    })?;

    if let Some(event) = event {
        journal.commit_after_tx(vec![event]);
    }

    Ok(())
}

/// Runs the DELETE and journal write against an already-open transaction;
/// see [`crate::write::create::run_insert`] for why this is split out.
pub(crate) fn run_delete(
    tx: &rusqlite::Transaction,
    journal: &Journal,
    sql: &str,
    params: &[SqlValue],
    tracked: bool,
    set_name: &str,
    entity_id: &str,
) -> Result<Option<ChangeEvent>, ODataError> {
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
    tx.execute(sql, params_refs.as_slice())
        .map_err(|e| ODataError::internal(format!("delete failed: {e}")))?;

    if !tracked {
        return Ok(None);
    }
    let ev = ChangeEvent {
        set_name: set_name.to_string(),
        entity_id: entity_id.to_string(),
        kind: ChangeKind::Deleted,
        snapshot: None,
    };
    journal.write_in_tx(tx, &ev)?;
    Ok(Some(ev))
}
