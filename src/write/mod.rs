//! Mutating request handling: create, update, delete, and reference
//! operations, plus the supporting hooks/concurrency/coercion helpers
//! they share.

pub mod bind;
pub mod concurrency;
pub mod convert;
pub mod create;
pub mod delete;
pub mod hooks;
pub mod reference;
pub mod update;

pub use bind::{ResolvedBinding, extract_and_resolve};
pub use concurrency::check_if_match;
pub use convert::{json_to_sql, sql_to_json};
pub use create::{CreateOutcome, create};
pub use delete::delete;
pub use hooks::{BeforeCreate, BeforeDelete, BeforeUpdate, HookRegistry};
pub use reference::{attach, detach};
pub use update::{UpdateOutcome, WriteMode, update};

// Prepare/run/finalize triples used by the batch engine to fold several
// writes into one changeset transaction. Not part of the crate's public
// surface; `pub(crate)` items re-exported for `crate::batch`'s benefit.
pub(crate) use create::{PreparedCreate, finalize_create, key_literal_to_json, prepare_create, run_insert};
pub(crate) use delete::{PreparedDelete, prepare_delete, run_delete};
pub(crate) use update::{PreparedUpdate, finalize_update, prepare_update, run_update};
