//! ETag precondition enforcement.

use crate::error::ODataError;
use crate::metadata::EntityDescription;
use crate::plan::SqlValue;
use crate::store::Row;

/// Checks `If-Match` against the entity's current ETag column, when the
/// entity type carries one. Entities without an `etag` property skip
/// concurrency enforcement entirely.
pub fn check_if_match(entity: &EntityDescription, current_row: &Row, if_match: Option<&str>) -> Result<(), ODataError> {
    let Some(etag_prop) = entity.etag_property() else {
        return Ok(());
    };
    let Some(if_match) = if_match else {
        return Err(ODataError::PreconditionRequired {
            message: format!("If-Match is required to modify {}", entity.type_name()),
        });
    };
    let current = render_etag(current_row, &etag_prop.physical_name);
    let expected = if_match.trim().trim_matches('"');
    if current != expected {
        return Err(ODataError::PreconditionFailed {
            message: "If-Match does not match the current ETag".to_string(),
        });
    }
    Ok(())
}

pub fn render_etag(row: &Row, column: &str) -> String {
    match row.get(column) {
        Some(SqlValue::Int(n)) => n.to_string(),
        Some(SqlValue::Text(s)) => s.clone(),
        Some(SqlValue::Real(f)) => f.to_string(),
        _ => String::new(),
    }
}

/// Computes the next ETag value for an integer version column.
pub fn next_etag_value(current_row: Option<&Row>, column: &str) -> i64 {
    match current_row.and_then(|r| r.get(column)) {
        Some(SqlValue::Int(n)) => n + 1,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EdmType, EntityTypeBuilder, PropertyBuilder};
    use std::collections::HashMap;

    fn entity_with_etag() -> EntityDescription {
        EntityTypeBuilder::new("Ns.Product")
            .property(PropertyBuilder::new("Id", EdmType::Int64).key())
            .property(PropertyBuilder::new("Version", EdmType::Int64).etag())
            .build()
            .unwrap()
    }

    #[test]
    fn missing_if_match_is_428() {
        let entity = entity_with_etag();
        let mut map = HashMap::new();
        map.insert("Version".to_string(), SqlValue::Int(3));
        let row = Row(map);
        let err = check_if_match(&entity, &row, None).unwrap_err();
        assert_eq!(err.status_code(), 428);
    }

    #[test]
    fn mismatched_if_match_is_412() {
        let entity = entity_with_etag();
        let mut map = HashMap::new();
        map.insert("Version".to_string(), SqlValue::Int(3));
        let row = Row(map);
        let err = check_if_match(&entity, &row, Some("\"7\"")).unwrap_err();
        assert_eq!(err.status_code(), 412);
    }

    #[test]
    fn matching_if_match_passes() {
        let entity = entity_with_etag();
        let mut map = HashMap::new();
        map.insert("Version".to_string(), SqlValue::Int(3));
        let row = Row(map);
        assert!(check_if_match(&entity, &row, Some("\"3\"")).is_ok());
    }
}
