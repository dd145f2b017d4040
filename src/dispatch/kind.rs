//! Classifies a parsed URL into an [`AccessKind`], the shape the write
//! pipeline, serializer and batch engine all dispatch on. Resolution walks
//! the segment list against the metadata registry the same way the query
//! planner walks a property path: navigations in the middle of the chain,
//! a structural property or final navigation at the end.

use crate::error::ODataError;
use crate::metadata::{Cardinality, MetadataRegistry};
use crate::url::{KeyBody, ParsedUrl, RequestShape, Segment, Terminal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    EntitySet(String),
    Singleton(String),
}

impl Root {
    pub fn name(&self) -> &str {
        match self {
            Self::EntitySet(n) | Self::Singleton(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessKind {
    ServiceDocument,
    Metadata,
    Batch,
    /// `/Set`
    Collection { root: Root },
    /// `/Set/$count`
    CollectionCount { root: Root },
    /// `/Set(key)` or `/Singleton`
    Single { root: Root, key: Option<KeyBody> },
    /// `/Set(key)/Prop` (and nested complex fields, since this registry
    /// does not model complex types separately from flat properties)
    StructuralProperty {
        root: Root,
        key: Option<KeyBody>,
        path: Vec<String>,
    },
    /// `/Set(key)/Prop/$value`
    RawValue {
        root: Root,
        key: Option<KeyBody>,
        path: Vec<String>,
    },
    /// `/Set(key)/Nav` where `Nav` is collection-valued
    NavigationCollection {
        root: Root,
        key: Option<KeyBody>,
        path: Vec<String>,
    },
    /// `/Set(key)/Nav` where `Nav` is single-valued
    NavigationSingle {
        root: Root,
        key: Option<KeyBody>,
        path: Vec<String>,
    },
    /// `/Set(key)/Nav/$ref`
    Reference {
        root: Root,
        key: Option<KeyBody>,
        path: Vec<String>,
    },
}

impl AccessKind {
    pub fn allowed_methods(&self) -> &'static [HttpMethod] {
        use HttpMethod::*;
        match self {
            AccessKind::ServiceDocument | AccessKind::Metadata => &[Get, Head, Options],
            AccessKind::Batch => &[Post],
            AccessKind::Collection { .. } => &[Get, Post, Head, Options],
            AccessKind::CollectionCount { .. } => &[Get, Options],
            AccessKind::Single { root: Root::Singleton(_), .. } => &[Get, Patch, Put, Head, Options],
            AccessKind::Single { root: Root::EntitySet(_), .. } => {
                &[Get, Patch, Put, Delete, Head, Options]
            }
            AccessKind::StructuralProperty { .. } | AccessKind::RawValue { .. } => {
                &[Get, Head, Options]
            }
            AccessKind::NavigationCollection { .. } => &[Get, Post, Head, Options],
            AccessKind::NavigationSingle { .. } => &[Get, Head, Options],
            AccessKind::Reference { .. } => &[Get, Post, Put, Delete],
        }
    }
}

pub fn classify(parsed: &ParsedUrl, registry: &MetadataRegistry) -> Result<AccessKind, ODataError> {
    match &parsed.shape {
        RequestShape::ServiceDocument => Ok(AccessKind::ServiceDocument),
        RequestShape::Metadata => Ok(AccessKind::Metadata),
        RequestShape::Batch => Ok(AccessKind::Batch),
        RequestShape::Resource { segments, terminal } => classify_resource(segments, terminal, registry),
    }
}

fn classify_resource(
    segments: &[Segment],
    terminal: &Terminal,
    registry: &MetadataRegistry,
) -> Result<AccessKind, ODataError> {
    let head = &segments[0];
    let (root, mut current_type_name, root_key) = if let Some(set) = registry.entity_set(&head.name) {
        (Root::EntitySet(head.name.clone()), set.entity_type.clone(), head.key.clone())
    } else if let Some(singleton) = registry.singleton(&head.name) {
        if head.key != KeyBody::None {
            return Err(ODataError::malformed(format!(
                "singleton '{}' does not accept a key",
                head.name
            )));
        }
        (Root::Singleton(head.name.clone()), singleton.entity_type.clone(), KeyBody::None)
    } else {
        return Err(ODataError::not_found(format!("no entity set or singleton named '{}'", head.name)));
    };
    let root_key_opt = match &root_key {
        KeyBody::None => None,
        other => Some(other.clone()),
    };

    if segments.len() == 1 {
        return match (&root, &root_key_opt, terminal) {
            (Root::EntitySet(_), None, Terminal::Count) => Ok(AccessKind::CollectionCount { root }),
            (Root::EntitySet(_), None, Terminal::None) => Ok(AccessKind::Collection { root }),
            (Root::EntitySet(_), Some(_), Terminal::None) => Ok(AccessKind::Single { root, key: root_key_opt }),
            (Root::Singleton(_), None, Terminal::None) => Ok(AccessKind::Single { root, key: None }),
            _ => Err(ODataError::malformed("unsupported combination of key and terminal on a root segment")),
        };
    }

    if matches!(root, Root::EntitySet(_)) && root_key_opt.is_none() {
        return Err(ODataError::malformed(format!(
            "'{}' must be addressed with a key before a nested segment",
            head.name
        )));
    }

    let mut path = Vec::new();
    let mid = &segments[1..segments.len() - 1];
    for seg in mid {
        let entity = registry
            .entity_types
            .get(&current_type_name)
            .ok_or_else(|| ODataError::internal("dangling entity type reference in registry"))?;
        let nav = entity
            .navigation(&seg.name)
            .ok_or_else(|| ODataError::not_found(format!("unknown navigation segment '{}'", seg.name)))?;
        if nav.cardinality != Cardinality::Single {
            return Err(ODataError::malformed(format!(
                "'{}' is collection-valued and cannot appear mid-path without a key",
                seg.name
            )));
        }
        path.push(seg.name.clone());
        current_type_name = nav.target_type.clone();
    }

    let last = &segments[segments.len() - 1];
    let entity = registry
        .entity_types
        .get(&current_type_name)
        .ok_or_else(|| ODataError::internal("dangling entity type reference in registry"))?;

    if let Some(nav) = entity.navigation(&last.name) {
        path.push(last.name.clone());
        let nav_key = match &last.key {
            KeyBody::None => None,
            other => Some(other.clone()),
        };
        return match (nav.cardinality, &nav_key, terminal) {
            (_, _, Terminal::Ref) => Ok(AccessKind::Reference { root, key: root_key_opt, path }),
            (Cardinality::Collection, None, Terminal::None) => {
                Ok(AccessKind::NavigationCollection { root, key: root_key_opt, path })
            }
            (Cardinality::Collection, Some(_), Terminal::None) => {
                // Set(key)/Nav(key2) addresses a single related entity directly.
                Ok(AccessKind::Single { root: Root::EntitySet(nav.target_set.clone()), key: nav_key })
            }
            (Cardinality::Single, None, Terminal::None) => {
                Ok(AccessKind::NavigationSingle { root, key: root_key_opt, path })
            }
            _ => Err(ODataError::malformed(format!(
                "unsupported combination of key and terminal on navigation '{}'",
                last.name
            ))),
        };
    }

    if let Some(prop) = entity.property(&last.name) {
        if last.key != KeyBody::None {
            return Err(ODataError::malformed(format!("'{}' is not a keyed resource", prop.logical_name)));
        }
        path.push(last.name.clone());
        return match terminal {
            Terminal::Value => Ok(AccessKind::RawValue { root, key: root_key_opt, path }),
            Terminal::None => Ok(AccessKind::StructuralProperty { root, key: root_key_opt, path }),
            _ => Err(ODataError::malformed(format!(
                "unsupported terminal on structural property '{}'",
                prop.logical_name
            ))),
        };
    }

    Err(ODataError::not_found(format!("unknown segment '{}'", last.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EdmType, EntitySetDescriptor, EntityTypeBuilder, MetadataRegistry, PropertyBuilder};
    use crate::url::parse_url;

    fn registry() -> MetadataRegistry {
        let mut reg = MetadataRegistry {
            namespace: "Ns".into(),
            container_name: "Container".into(),
            ..Default::default()
        };
        let order = EntityTypeBuilder::new("Ns.Order")
            .property(PropertyBuilder::new("Id", EdmType::Int64).key())
            .property(PropertyBuilder::new("Total", EdmType::Decimal))
            .navigation(crate::metadata::NavigationBuilder::has_many(
                "Lines", "Ns.Line", "Lines", "OrderId",
            ))
            .build()
            .unwrap();
        let line = EntityTypeBuilder::new("Ns.Line")
            .property(PropertyBuilder::new("Id", EdmType::Int64).key())
            .property(PropertyBuilder::new("OrderId", EdmType::Int64))
            .build()
            .unwrap();
        reg.entity_types.insert(order.qualified_name.clone(), order);
        reg.entity_types.insert(line.qualified_name.clone(), line);
        reg.entity_sets.insert(
            "Orders".into(),
            EntitySetDescriptor { name: "Orders".into(), entity_type: "Ns.Order".into(), table_name: "orders".into() },
        );
        reg.entity_sets.insert(
            "Lines".into(),
            EntitySetDescriptor { name: "Lines".into(), entity_type: "Ns.Line".into(), table_name: "lines".into() },
        );
        reg
    }

    #[test]
    fn classifies_bare_collection() {
        let reg = registry();
        let parsed = parse_url("/Orders", None).unwrap();
        assert_eq!(classify(&parsed, &reg).unwrap(), AccessKind::Collection { root: Root::EntitySet("Orders".into()) });
    }

    #[test]
    fn classifies_single_entity() {
        let reg = registry();
        let parsed = parse_url("/Orders(1)", None).unwrap();
        match classify(&parsed, &reg).unwrap() {
            AccessKind::Single { root: Root::EntitySet(name), key: Some(_) } => assert_eq!(name, "Orders"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classifies_navigation_collection() {
        let reg = registry();
        let parsed = parse_url("/Orders(1)/Lines", None).unwrap();
        assert!(matches!(classify(&parsed, &reg).unwrap(), AccessKind::NavigationCollection { .. }));
    }

    #[test]
    fn classifies_reference() {
        let reg = registry();
        let parsed = parse_url("/Orders(1)/Lines/$ref", None).unwrap();
        assert!(matches!(classify(&parsed, &reg).unwrap(), AccessKind::Reference { .. }));
    }

    #[test]
    fn classifies_raw_value() {
        let reg = registry();
        let parsed = parse_url("/Orders(1)/Total/$value", None).unwrap();
        assert!(matches!(classify(&parsed, &reg).unwrap(), AccessKind::RawValue { .. }));
    }

    #[test]
    fn rejects_unkeyed_collection_before_nested_segment() {
        let reg = registry();
        let parsed = parse_url("/Orders/Lines", None).unwrap();
        assert!(classify(&parsed, &reg).is_err());
    }
}
