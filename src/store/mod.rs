pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ODataError;
use crate::plan::SqlValue;

#[derive(Debug, Clone, Default)]
pub struct Row(pub HashMap<String, SqlValue>);

impl Row {
    pub fn get(&self, col: &str) -> Option<&SqlValue> {
        self.0.get(col)
    }
}

/// The seam a hosting application's relational driver plugs into. Only
/// read access needs to be object-safe; transactional writes are
/// exposed on the concrete `SqliteStore` (see its module docs) because a
/// generic transaction callback cannot be part of an object-safe trait.
#[async_trait]
pub trait Store: Send + Sync {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ODataError>;
    async fn count(&self, sql: &str, params: &[SqlValue]) -> Result<i64, ODataError>;
}
