pub mod apply;
pub mod cursor;
pub mod expr_lower;
pub mod options;
pub mod planner;
pub mod search;

pub use cursor::SkipTokenV1;
pub use options::{ExpandItem, OrderItem, QueryOptions, SortDir};
pub use planner::{CompiledQuery, JoinClause, JoinKind, PlanError, SelectColumn, compile_query};

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl rusqlite::types::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value};
        Ok(match self {
            SqlValue::Int(n) => ToSqlOutput::Owned(Value::Integer(*n)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
        })
    }
}
