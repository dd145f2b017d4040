//! Change-tracking journal backing `Prefer: odata.track-changes` delta
//! windows. Persistent mode stores events in the same relational store as
//! the data (so tokens survive a restart); non-persistent mode keeps them
//! in an in-process buffer. Either way, events become visible only once
//! the write transaction that produced them has committed.

pub mod delta_token;
pub mod event;

use std::sync::{Arc, Mutex};

pub use delta_token::DeltaToken;
pub use event::{ChangeEvent, ChangeKind};

use crate::error::ODataError;
use crate::store::sqlite::SqliteStore;

pub const JOURNAL_MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS __odata_journal (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    set_name TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    snapshot TEXT
);
CREATE INDEX IF NOT EXISTS idx_odata_journal_set ON __odata_journal(set_name, sequence);
"#;

#[derive(Debug, Clone)]
pub struct JournaledEvent {
    pub sequence: i64,
    pub event: ChangeEvent,
}

#[derive(Clone)]
pub enum Journal {
    Persistent,
    InMemory(Arc<Mutex<Vec<JournaledEvent>>>),
}

impl Journal {
    pub fn persistent() -> Self {
        Self::Persistent
    }

    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(Mutex::new(Vec::new())))
    }

    /// Writes the event inside the caller's still-open transaction. A
    /// no-op in non-persistent mode; see [`Journal::commit_after_tx`].
    pub fn write_in_tx(&self, tx: &rusqlite::Transaction, event: &ChangeEvent) -> Result<(), ODataError> {
        if matches!(self, Journal::Persistent) {
            let snapshot_text = event.snapshot.as_ref().map(|v| v.to_string());
            tx.execute(
                "INSERT INTO __odata_journal (set_name, entity_id, kind, snapshot) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![event.set_name, event.entity_id, event.kind.as_str(), snapshot_text],
            )
            .map_err(|e| ODataError::internal(format!("journal write failed: {e}")))?;
        }
        Ok(())
    }

    /// Called once the owning transaction has committed. Appends to the
    /// in-memory buffer in non-persistent mode; no-op in persistent mode
    /// since that write already happened inside the transaction.
    pub fn commit_after_tx(&self, events: Vec<ChangeEvent>) {
        if let Journal::InMemory(buf) = self {
            let mut guard = buf.lock().expect("journal mutex poisoned");
            for event in events {
                let sequence = guard.last().map(|e| e.sequence + 1).unwrap_or(1);
                guard.push(JournaledEvent { sequence, event });
            }
        }
    }

    /// The current high-water sequence for `set_name`, used to stamp a
    /// fresh `@odata.deltaLink` at the start of a tracking window.
    pub fn current_sequence(&self, store: &SqliteStore, set_name: &str) -> Result<i64, ODataError> {
        match self {
            Journal::Persistent => store.count_sync(
                "SELECT COALESCE(MAX(sequence), 0) FROM __odata_journal WHERE set_name = ?1",
                &[crate::plan::SqlValue::Text(set_name.to_string())],
            ),
            Journal::InMemory(buf) => {
                let guard = buf.lock().expect("journal mutex poisoned");
                Ok(guard
                    .iter()
                    .filter(|e| e.event.set_name == set_name)
                    .map(|e| e.sequence)
                    .max()
                    .unwrap_or(0))
            }
        }
    }

    pub fn changes_since(
        &self,
        store: &SqliteStore,
        set_name: &str,
        since_sequence: i64,
    ) -> Result<Vec<JournaledEvent>, ODataError> {
        match self {
            Journal::Persistent => {
                let rows = store.query_sync(
                    "SELECT sequence, entity_id, kind, snapshot FROM __odata_journal \
                     WHERE set_name = ?1 AND sequence > ?2 ORDER BY sequence ASC",
                    &[
                        crate::plan::SqlValue::Text(set_name.to_string()),
                        crate::plan::SqlValue::Int(since_sequence),
                    ],
                )?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    let sequence = match row.get("sequence") {
                        Some(crate::plan::SqlValue::Int(n)) => *n,
                        _ => continue,
                    };
                    let entity_id = match row.get("entity_id") {
                        Some(crate::plan::SqlValue::Text(s)) => s.clone(),
                        _ => continue,
                    };
                    let kind = match row.get("kind") {
                        Some(crate::plan::SqlValue::Text(s)) => ChangeKind::parse(s)
                            .ok_or_else(|| ODataError::internal("corrupt journal kind"))?,
                        _ => continue,
                    };
                    let snapshot = match row.get("snapshot") {
                        Some(crate::plan::SqlValue::Text(s)) => serde_json::from_str(s).ok(),
                        _ => None,
                    };
                    out.push(JournaledEvent {
                        sequence,
                        event: ChangeEvent {
                            set_name: set_name.to_string(),
                            entity_id,
                            kind,
                            snapshot,
                        },
                    });
                }
                Ok(out)
            }
            Journal::InMemory(buf) => {
                let guard = buf.lock().expect("journal mutex poisoned");
                Ok(guard
                    .iter()
                    .filter(|e| e.event.set_name == set_name && e.sequence > since_sequence)
                    .cloned()
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_journal_tracks_sequence_per_set() {
        let journal = Journal::in_memory();
        journal.commit_after_tx(vec![ChangeEvent {
            set_name: "Products".into(),
            entity_id: "Products(1)".into(),
            kind: ChangeKind::Created,
            snapshot: Some(serde_json::json!({"Id": 1})),
        }]);
        let store = SqliteStore::open(":memory:").unwrap();
        let seq = journal.current_sequence(&store, "Products").unwrap();
        assert_eq!(seq, 1);
        let changes = journal.changes_since(&store, "Products", 0).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].event.kind, ChangeKind::Created);
    }
}
