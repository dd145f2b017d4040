use serde_json::{Map, Value};

use crate::error::ODataError;
use crate::journal::{ChangeEvent, ChangeKind, Journal};
use crate::metadata::{EntityDescription, MetadataRegistry};
use crate::plan::SqlValue;
use crate::store::sqlite::SqliteStore;
use crate::url::{self, KeyLiteral};
use crate::write::bind;
use crate::write::convert::json_to_sql;
use crate::write::hooks::HookRegistry;

pub struct CreateOutcome {
    pub entity_id: String,
    pub fields: Map<String, Value>,
}

/// Everything needed to run the INSERT, already validated against the
/// entity model. Split from [`create`] so the batch engine can prepare
/// several creates up front and run them all inside one changeset
/// transaction (see `batch::engine`).
pub(crate) struct PreparedCreate {
    pub entity: EntityDescription,
    pub sql: String,
    pub values: Vec<SqlValue>,
    pub hook_row: Map<String, Value>,
    pub tracked: bool,
    pub set_name: String,
}

pub(crate) fn prepare_create(
    store: &SqliteStore,
    registry: &MetadataRegistry,
    hooks: &HookRegistry,
    set_name: &str,
    body: Value,
) -> Result<PreparedCreate, ODataError> {
    let set = registry
        .entity_set(set_name)
        .ok_or_else(|| ODataError::not_found(format!("no entity set named '{set_name}'")))?;
    let entity = registry
        .entity_types
        .get(&set.entity_type)
        .ok_or_else(|| ODataError::internal("dangling entity set -> entity type reference"))?;

    let mut map = body
        .as_object()
        .cloned()
        .ok_or_else(|| ODataError::malformed("request body must be a JSON object"))?;

    for (key, _) in map.iter().filter(|(k, _)| !k.ends_with("@odata.bind")) {
        let Some(prop) = entity.property(key) else {
            return Err(ODataError::malformed(format!("'{key}' is not a property of {}", entity.type_name())));
        };
        if prop.is_auto {
            return Err(ODataError::malformed(format!(
                "{key} is an auto field and may not be set by the client"
            )));
        }
    }

    let bindings = bind::extract_and_resolve(store, registry, entity, &mut map)?;

    let mut hook_row = map.clone();
    if let Some(hook) = hooks.before_create(&entity.qualified_name) {
        hook.call(&entity.qualified_name, &mut hook_row)?;
    }

    let mut columns: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    for prop in &entity.properties {
        if prop.is_excluded {
            continue;
        }
        if let Some(binding) = bindings.iter().find(|b| {
            entity
                .navigation(&b.nav_logical_name)
                .and_then(|n| n.foreign_key.as_ref())
                .map(|fk| entity.property(fk).map(|p| p.physical_name.clone()))
                == Some(Some(prop.physical_name.clone()))
        }) {
            columns.push(prop.physical_name.clone());
            values.push(binding.foreign_key_value.clone());
            continue;
        }
        if let Some(v) = hook_row.get(&prop.logical_name) {
            columns.push(prop.physical_name.clone());
            values.push(json_to_sql(v, prop.edm_type, &prop.logical_name)?);
        } else if prop.is_key {
            if !prop.is_auto {
                return Err(ODataError::malformed(format!("'{}' is required", prop.logical_name)));
            }
            // left out of the INSERT; SQLite AUTOINCREMENT supplies it
        } else if prop.is_etag {
            columns.push(prop.physical_name.clone());
            values.push(SqlValue::Int(1));
        } else if prop.is_required {
            return Err(ODataError::malformed(format!("'{}' is required", prop.logical_name)));
        }
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        set.table_name,
        columns.join(", "),
        placeholders.join(", ")
    );

    Ok(PreparedCreate {
        entity: entity.clone(),
        sql,
        values,
        hook_row,
        tracked: registry.is_tracked(set_name),
        set_name: set_name.to_string(),
    })
}

pub fn create(
    store: &SqliteStore,
    registry: &MetadataRegistry,
    journal: &Journal,
    hooks: &HookRegistry,
    set_name: &str,
    body: Value,
) -> Result<CreateOutcome, ODataError> {
    let prepared = prepare_create(store, registry, hooks, set_name, body)?;

    let tx_result: TxResult = store.with_transaction(|tx| {
        run_insert(
            tx,
            &prepared.entity,
            journal,
            &prepared.sql,
            &prepared.values,
            &prepared.hook_row,
            prepared.tracked,
            &prepared.set_name,
        )
    })?;

    if let Some(event) = tx_result.event.clone() {
        journal.commit_after_tx(vec![event]);
    }

    Ok(finalize_create(&prepared, &tx_result))
}

pub(crate) fn finalize_create(prepared: &PreparedCreate, tx_result: &TxResult) -> CreateOutcome {
    let entity_id = url::entity_id(&prepared.set_name, &tx_result.key_pairs);
    let mut fields = prepared.hook_row.clone();
    for (p, lit) in &tx_result.key_pairs {
        fields.insert(p.logical_name.clone(), key_literal_to_json(lit));
    }
    if let Some(etag_prop) = prepared.entity.etag_property() {
        fields.entry(etag_prop.logical_name.clone()).or_insert(Value::from(1));
    }
    CreateOutcome { entity_id, fields }
}

pub(crate) struct TxResult {
    pub key_pairs: Vec<(crate::metadata::PropertyDescriptor, KeyLiteral)>,
    pub event: Option<ChangeEvent>,
}

/// Runs the INSERT and journal write against an already-open transaction.
/// Factored out of [`create`] so the batch engine can run several of these
/// against one shared changeset transaction instead of nesting
/// `with_transaction` calls (which would deadlock on the connection lock).
pub(crate) fn run_insert(
    tx: &rusqlite::Transaction,
    entity: &EntityDescription,
    journal: &Journal,
    sql: &str,
    values: &[SqlValue],
    hook_row: &Map<String, Value>,
    tracked: bool,
    set_name: &str,
) -> Result<TxResult, ODataError> {
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
    tx.execute(sql, params_refs.as_slice())
        .map_err(|e| ODataError::internal(format!("insert failed: {e}")))?;
    let rowid = tx.last_insert_rowid();

    let mut key_pairs = Vec::new();
    for key_prop in entity.key_properties() {
        if let Some(v) = hook_row.get(&key_prop.logical_name) {
            let sql_val = json_to_sql(v, key_prop.edm_type, &key_prop.logical_name)?;
            let lit = match sql_val {
                SqlValue::Int(n) => KeyLiteral::Int(n),
                SqlValue::Text(s) => KeyLiteral::String(s),
                _ => return Err(ODataError::malformed(format!("'{}' has an invalid key value", key_prop.logical_name))),
            };
            key_pairs.push((key_prop.clone(), lit));
        } else if key_prop.is_auto {
            key_pairs.push((key_prop.clone(), KeyLiteral::Int(rowid)));
        } else {
            return Err(ODataError::malformed(format!("'{}' is required", key_prop.logical_name)));
        }
    }

    let entity_id = url::entity_id(set_name, &key_pairs);
    let event = if tracked {
        let mut snapshot = hook_row.clone();
        for (p, lit) in &key_pairs {
            snapshot.insert(p.logical_name.clone(), key_literal_to_json(lit));
        }
        let ev = ChangeEvent {
            set_name: set_name.to_string(),
            entity_id: entity_id.clone(),
            kind: ChangeKind::Created,
            snapshot: Some(Value::Object(snapshot)),
        };
        journal.write_in_tx(tx, &ev)?;
        Some(ev)
    } else {
        None
    };

    Ok(TxResult { key_pairs, event })
}

pub(crate) fn key_literal_to_json(lit: &KeyLiteral) -> Value {
    match lit {
        KeyLiteral::Int(n) => Value::from(*n),
        KeyLiteral::String(s) | KeyLiteral::Guid(s) => Value::from(s.clone()),
    }
}
