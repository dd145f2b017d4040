//! JSON <-> `SqlValue` coercion for write bodies, keyed off the target
//! property's declared `EdmType`.

use serde_json::Value;

use crate::error::ODataError;
use crate::metadata::EdmType;
use crate::plan::SqlValue;

pub fn json_to_sql(value: &Value, edm: EdmType, field_name: &str) -> Result<SqlValue, ODataError> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    match edm {
        EdmType::Boolean => value
            .as_bool()
            .map(SqlValue::Bool)
            .ok_or_else(|| type_error(field_name, "Edm.Boolean")),
        EdmType::Int32 | EdmType::Int64 => value
            .as_i64()
            .map(SqlValue::Int)
            .ok_or_else(|| type_error(field_name, edm.qualified_name())),
        EdmType::Single | EdmType::Double | EdmType::Decimal => value
            .as_f64()
            .map(SqlValue::Real)
            .ok_or_else(|| type_error(field_name, edm.qualified_name())),
        EdmType::String | EdmType::DateTimeOffset | EdmType::Guid | EdmType::Binary => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(|| type_error(field_name, edm.qualified_name())),
    }
}

pub fn sql_to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Int(n) => Value::from(*n),
        SqlValue::Real(f) => Value::from(*f),
        SqlValue::Text(s) => Value::from(s.clone()),
        SqlValue::Bool(b) => Value::from(*b),
        SqlValue::Null => Value::Null,
    }
}

fn type_error(field_name: &str, expected: &str) -> ODataError {
    ODataError::malformed(format!("'{field_name}' must be a value of type {expected}"))
}

/// Zero value used by PUT/replace to clear an omitted nullable-but-not-null
/// field, or a required field's type zero value.
pub fn zero_value(edm: EdmType) -> SqlValue {
    match edm {
        EdmType::Boolean => SqlValue::Bool(false),
        EdmType::Int32 | EdmType::Int64 => SqlValue::Int(0),
        EdmType::Single | EdmType::Double | EdmType::Decimal => SqlValue::Real(0.0),
        EdmType::String | EdmType::DateTimeOffset | EdmType::Guid | EdmType::Binary => {
            SqlValue::Text(String::new())
        }
    }
}
