use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// One row written to (or read from) the change-tracking journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub set_name: String,
    /// The `Set(key)` addressing text, used verbatim as the deleted-entity
    /// `"id"` field and to build the entity's `@odata.id`.
    pub entity_id: String,
    pub kind: ChangeKind,
    /// Full entity body for `Created`/`Updated`; absent for `Deleted`.
    pub snapshot: Option<serde_json::Value>,
}
