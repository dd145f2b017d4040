//! Converts parsed key segments to/from SQL parameters and the
//! `Set(k1=v1,k2='v2')` addressing text used in `Location`,
//! `OData-EntityId`, and journal entity ids.

use crate::error::ODataError;
use crate::metadata::{EntityDescription, PropertyDescriptor};
use crate::plan::SqlValue;
use crate::url::{KeyBody, KeyLiteral};

pub fn key_literal_to_sql(lit: &KeyLiteral) -> SqlValue {
    match lit {
        KeyLiteral::Int(n) => SqlValue::Int(*n),
        KeyLiteral::String(s) => SqlValue::Text(s.clone()),
        KeyLiteral::Guid(s) => SqlValue::Text(s.clone()),
    }
}

fn render_key_value(lit: &KeyLiteral) -> String {
    match lit {
        KeyLiteral::Int(n) => n.to_string(),
        KeyLiteral::String(s) => format!("'{}'", s.replace('\'', "''")),
        KeyLiteral::Guid(s) => s.clone(),
    }
}

/// Resolves a parsed key segment against the entity's declared key
/// properties, in declaration order, erroring when the shape (single vs.
/// composite, named vs. positional) does not match.
pub fn resolve_key(entity: &EntityDescription, key: &KeyBody) -> Result<Vec<(PropertyDescriptor, KeyLiteral)>, ODataError> {
    let keys: Vec<&PropertyDescriptor> = entity.key_properties().collect();
    match key {
        KeyBody::None => Err(ODataError::malformed(format!(
            "{} requires a key segment",
            entity.type_name()
        ))),
        KeyBody::Positional(lit) => {
            if keys.len() != 1 {
                return Err(ODataError::malformed(format!(
                    "{} has a composite key; use the named key syntax",
                    entity.type_name()
                )));
            }
            Ok(vec![(keys[0].clone(), lit.clone())])
        }
        KeyBody::Named(pairs) => {
            if pairs.len() != keys.len() {
                return Err(ODataError::malformed(format!(
                    "key segment does not match the declared key shape of {}",
                    entity.type_name()
                )));
            }
            let mut out = Vec::with_capacity(pairs.len());
            for (name, lit) in pairs {
                let prop = keys
                    .iter()
                    .find(|p| &p.logical_name == name)
                    .ok_or_else(|| ODataError::malformed(format!("'{name}' is not a key property")))?;
                out.push(((*prop).clone(), lit.clone()));
            }
            Ok(out)
        }
    }
}

/// Renders `(1)` for a single key or `(k1=v1,k2='v2')` for a composite
/// one, matching byte-for-byte what the parser in this same module
/// accepts, so `Location`/`OData-EntityId` round-trip through it.
pub fn render_key_segment(pairs: &[(PropertyDescriptor, KeyLiteral)]) -> String {
    if pairs.len() == 1 {
        format!("({})", render_key_value(&pairs[0].1))
    } else {
        let parts: Vec<String> = pairs
            .iter()
            .map(|(p, l)| format!("{}={}", p.logical_name, render_key_value(l)))
            .collect();
        format!("({})", parts.join(","))
    }
}

pub fn entity_id(set_name: &str, pairs: &[(PropertyDescriptor, KeyLiteral)]) -> String {
    format!("{set_name}{}", render_key_segment(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EdmType, EntityTypeBuilder, PropertyBuilder};

    #[test]
    fn renders_single_key() {
        let entity = EntityTypeBuilder::new("Ns.Product")
            .property(PropertyBuilder::new("Id", EdmType::Int64).key())
            .build()
            .unwrap();
        let pairs = resolve_key(&entity, &KeyBody::Positional(KeyLiteral::Int(7))).unwrap();
        assert_eq!(entity_id("Products", &pairs), "Products(7)");
    }

    #[test]
    fn renders_composite_key() {
        let entity = EntityTypeBuilder::new("Ns.OrderLine")
            .property(PropertyBuilder::new("OrderId", EdmType::Int64).key())
            .property(PropertyBuilder::new("LineNo", EdmType::Int32).key())
            .build()
            .unwrap();
        let pairs = resolve_key(
            &entity,
            &KeyBody::Named(vec![
                ("OrderId".to_string(), KeyLiteral::Int(1)),
                ("LineNo".to_string(), KeyLiteral::Int(2)),
            ]),
        )
        .unwrap();
        assert_eq!(entity_id("OrderLines", &pairs), "OrderLines(OrderId=1,LineNo=2)");
    }
}
