//! Batch request orchestration: enforces `MaxBatchSize`, runs each
//! changeset inside one shared transaction via the write module's
//! prepare/run split, and routes everything else through a caller-supplied
//! dispatcher standing in for the library's own HTTP entry point (or a
//! `SetBatchSubRequestHandler` hook, when the embedding service configures
//! one).

use tokio_util::sync::CancellationToken;

use crate::batch::model::{BatchPart, SubRequest, SubResponse};
use crate::dispatch::{self, AccessKind, Root};
use crate::error::ODataError;
use crate::journal::Journal;
use crate::metadata::MetadataRegistry;
use crate::store::sqlite::SqliteStore;
use crate::write::hooks::HookRegistry;
use crate::write::{self, WriteMode};

/// Anything that can turn a parsed sub-request into a response. The batch
/// engine hands every GET, `$ref`, and non-CRUD sub-request to this rather
/// than reimplementing request dispatch; an embedding service plugs in its
/// own handler (or its `SetBatchSubRequestHandler` hook) here.
pub trait SubRequestDispatcher {
    fn dispatch(&self, req: &SubRequest) -> SubResponse;
}

impl<F> SubRequestDispatcher for F
where
    F: Fn(&SubRequest) -> SubResponse,
{
    fn dispatch(&self, req: &SubRequest) -> SubResponse {
        self(req)
    }
}

pub struct BatchConfig {
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_batch_size: 100 }
    }
}

/// A rendered batch response part, mirroring [`BatchPart`]'s shape so a
/// future multipart-bytes writer can serialize it back out the same way
/// the parser split it apart.
pub enum RenderedPart {
    Http(SubResponse),
    ChangeSet(Vec<SubResponse>),
}

fn count_sub_requests(parts: &[BatchPart]) -> usize {
    parts.iter().map(BatchPart::sub_request_count).sum()
}

pub fn execute_batch(
    parts: Vec<BatchPart>,
    config: &BatchConfig,
    store: &SqliteStore,
    registry: &MetadataRegistry,
    journal: &Journal,
    hooks: &HookRegistry,
    dispatcher: &dyn SubRequestDispatcher,
    cancel: &CancellationToken,
) -> Result<Vec<RenderedPart>, ODataError> {
    let total = count_sub_requests(&parts);
    if total > config.max_batch_size {
        return Err(ODataError::PayloadTooLarge {
            message: format!(
                "batch request contains {total} sub-requests. Maximum allowed: {}",
                config.max_batch_size
            ),
        });
    }

    let mut rendered = Vec::with_capacity(parts.len());
    for part in parts {
        if cancel.is_cancelled() {
            return Err(ODataError::cancelled("batch request cancelled before completion"));
        }
        match part {
            BatchPart::Http(sub) => {
                let content_id = sub.content_id.clone();
                let mut resp = dispatcher.dispatch(&sub);
                resp.content_id = content_id;
                rendered.push(RenderedPart::Http(resp));
            }
            BatchPart::ChangeSet(subs) => {
                rendered.push(RenderedPart::ChangeSet(run_changeset(subs, store, registry, journal, hooks, dispatcher, cancel)));
            }
        }
    }
    Ok(rendered)
}

enum Planned {
    Create(write::PreparedCreate),
    Update(write::PreparedUpdate),
    Delete(write::PreparedDelete),
    Other,
}

/// Parses and classifies one changeset sub-request onto this crate's own
/// create/update/delete write paths. Returns `Ok(Planned::Other)` for
/// anything else (a `$ref`, a GET, a navigation write) so the caller can
/// route it through the dispatcher instead.
fn classify_write(
    sub: &SubRequest,
    store: &SqliteStore,
    registry: &MetadataRegistry,
    hooks: &HookRegistry,
) -> Result<Planned, ODataError> {
    let (path, query) = match sub.path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (sub.path.as_str(), None),
    };
    let parsed = crate::url::parse_url(path, query)?;
    let kind = dispatch::classify(&parsed, registry)?;
    let method = sub.method.to_ascii_uppercase();

    match (&method[..], &kind) {
        ("POST", AccessKind::Collection { root: Root::EntitySet(set_name) }) => {
            let prepared = write::prepare_create(store, registry, hooks, set_name, sub.json_body()?)?;
            Ok(Planned::Create(prepared))
        }
        ("PATCH", AccessKind::Single { root: Root::EntitySet(set_name), key: Some(key) }) => {
            let prepared = write::prepare_update(store, registry, hooks, set_name, key, sub.json_body()?, sub.header("If-Match"), WriteMode::Patch)?;
            Ok(Planned::Update(prepared))
        }
        ("PUT", AccessKind::Single { root: Root::EntitySet(set_name), key: Some(key) }) => {
            let prepared = write::prepare_update(store, registry, hooks, set_name, key, sub.json_body()?, sub.header("If-Match"), WriteMode::Replace)?;
            Ok(Planned::Update(prepared))
        }
        ("DELETE", AccessKind::Single { root: Root::EntitySet(set_name), key: Some(key) }) => {
            let prepared = write::prepare_delete(store, registry, hooks, set_name, key, sub.header("If-Match"))?;
            Ok(Planned::Delete(prepared))
        }
        _ => Ok(Planned::Other),
    }
}

/// Runs every sub-request of a changeset inside one transaction. Anything
/// that doesn't map onto create/update/delete (a `$ref`, a GET, a
/// navigation write) is dispatched outside that transaction, since it has
/// no `prepare`/`run` split of its own to fold in. A cancellation observed
/// before or during the transaction aborts the whole changeset and rolls
/// it back; one observed after commit only affects rendering the response.
fn run_changeset(
    subs: Vec<SubRequest>,
    store: &SqliteStore,
    registry: &MetadataRegistry,
    journal: &Journal,
    hooks: &HookRegistry,
    dispatcher: &dyn SubRequestDispatcher,
    cancel: &CancellationToken,
) -> Vec<SubResponse> {
    let mut planned = Vec::with_capacity(subs.len());
    for sub in &subs {
        if cancel.is_cancelled() {
            return vec![SubResponse::from_error(None, &ODataError::cancelled("changeset cancelled"))];
        }
        match classify_write(sub, store, registry, hooks) {
            Ok(p) => planned.push(p),
            Err(e) => return vec![SubResponse::from_error(sub.content_id.clone(), &e)],
        }
    }

    enum Settled {
        Create(write::CreateOutcome),
        Update(write::UpdateOutcome),
        Deleted,
        Other,
    }

    let tx_result: Result<Vec<Settled>, ODataError> = store.with_transaction(|tx| {
        let mut settled = Vec::with_capacity(planned.len());
        for p in &planned {
            if cancel.is_cancelled() {
                return Err(ODataError::cancelled("changeset cancelled mid-transaction"));
            }
            match p {
                Planned::Create(prepared) => {
                    let tx_res = write::run_insert(
                        tx,
                        &prepared.entity,
                        journal,
                        &prepared.sql,
                        &prepared.values,
                        &prepared.hook_row,
                        prepared.tracked,
                        &prepared.set_name,
                    )?;
                    settled.push(Settled::Create(write::finalize_create(prepared, &tx_res)));
                }
                Planned::Update(prepared) => {
                    write::run_update(
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
                    )?;
                    settled.push(Settled::Update(write::finalize_update(prepared)));
                }
                Planned::Delete(prepared) => {
                    write::run_delete(tx, journal, &prepared.sql, &prepared.params, prepared.tracked, &prepared.set_name, &prepared.entity_id)?;
                    settled.push(Settled::Deleted);
                }
                Planned::Other => settled.push(Settled::Other),
            }
        }
        Ok(settled)
    });

    let settled = match tx_result {
        Ok(s) => s,
        Err(e) => return vec![SubResponse::from_error(None, &e)],
    };

    subs.into_iter()
        .zip(settled.into_iter())
        .map(|(sub, outcome)| match outcome {
            Settled::Create(created) => {
                let mut fields = created.fields;
                fields.insert("@odata.id".to_string(), serde_json::Value::from(created.entity_id));
                SubResponse::json(sub.content_id, 201, &serde_json::Value::Object(fields))
            }
            Settled::Update(_) => SubResponse::empty(sub.content_id, 204),
            Settled::Deleted => SubResponse::empty(sub.content_id, 204),
            Settled::Other => {
                let mut resp = dispatcher.dispatch(&sub);
                resp.content_id = sub.content_id;
                resp
            }
        })
        .collect()
}
