//! Immutable, read-only-after-startup description of the entity model.
//!
//! Rust has no runtime reflection over tagged struct fields, so the
//! "tag vocabulary" a reflection-based registry would read off a struct
//! is instead supplied through an explicit builder (see `builder.rs`)
//! and consumed here into a plain data structure every other component
//! treats as a map.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdmType {
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    Boolean,
    DateTimeOffset,
    Guid,
    Binary,
}

impl EdmType {
    pub fn qualified_name(self) -> &'static str {
        match self {
            Self::Int32 => "Edm.Int32",
            Self::Int64 => "Edm.Int64",
            Self::Single => "Edm.Single",
            Self::Double => "Edm.Double",
            Self::Decimal => "Edm.Decimal",
            Self::String => "Edm.String",
            Self::Boolean => "Edm.Boolean",
            Self::DateTimeOffset => "Edm.DateTimeOffset",
            Self::Guid => "Edm.Guid",
            Self::Binary => "Edm.Binary",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Int32 | Self::Int64 | Self::Single | Self::Double | Self::Decimal
        )
    }
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// The name clients see in URLs and JSON bodies.
    pub logical_name: String,
    /// The column name issued into SQL text.
    pub physical_name: String,
    pub edm_type: EdmType,
    pub nullable: bool,
    pub max_length: Option<u32>,
    pub precision: Option<(u8, u8)>,
    pub is_key: bool,
    pub is_required: bool,
    pub is_auto: bool,
    pub is_immutable: bool,
    pub is_searchable: bool,
    pub is_etag: bool,
    pub is_excluded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Collection,
}

#[derive(Debug, Clone)]
pub struct NavigationDescriptor {
    pub logical_name: String,
    /// Fully qualified name of the partner entity type, e.g. `ODataService.Order`.
    pub target_type: String,
    pub target_set: String,
    pub cardinality: Cardinality,
    /// Property on *this* type holding the foreign key (belongs-to shape).
    pub foreign_key: Option<String>,
    /// Property on the *partner* type the foreign key points at. Defaults to
    /// the partner's primary key when unset.
    pub referenced_key: Option<String>,
    /// True when this side owns the foreign key column (belongs_to); false
    /// when the partner owns it (has_many / has_one).
    pub owns_foreign_key: bool,
}

#[derive(Debug, Clone)]
pub struct EntityDescription {
    pub qualified_name: String,
    pub properties: Vec<PropertyDescriptor>,
    pub navigations: Vec<NavigationDescriptor>,
}

impl EntityDescription {
    pub fn type_name(&self) -> &str {
        self.qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.qualified_name)
    }

    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_key)
    }

    pub fn property(&self, logical_name: &str) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.logical_name == logical_name && !p.is_excluded)
    }

    pub fn navigation(&self, logical_name: &str) -> Option<&NavigationDescriptor> {
        self.navigations.iter().find(|n| n.logical_name == logical_name)
    }

    pub fn etag_property(&self) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.is_etag)
    }

    pub fn searchable_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.is_searchable)
    }
}

#[derive(Debug, Clone)]
pub struct EntitySetDescriptor {
    pub name: String,
    pub entity_type: String,
    pub table_name: String,
}

#[derive(Debug, Clone)]
pub struct SingletonDescriptor {
    pub name: String,
    pub entity_type: String,
    pub table_name: String,
}

/// The read-only model every other component holds a handle into.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    pub namespace: String,
    pub container_name: String,
    pub entity_types: HashMap<String, EntityDescription>,
    pub entity_sets: HashMap<String, EntitySetDescriptor>,
    pub singletons: HashMap<String, SingletonDescriptor>,
    pub tracked_sets: std::collections::HashSet<String>,
}

impl MetadataRegistry {
    pub fn entity_set(&self, name: &str) -> Option<&EntitySetDescriptor> {
        self.entity_sets.get(name)
    }

    pub fn singleton(&self, name: &str) -> Option<&SingletonDescriptor> {
        self.singletons.get(name)
    }

    pub fn entity_type_for_set(&self, set_name: &str) -> Option<&EntityDescription> {
        let set = self.entity_set(set_name)?;
        self.entity_types.get(&set.entity_type)
    }

    pub fn entity_type_for_singleton(&self, name: &str) -> Option<&EntityDescription> {
        let s = self.singleton(name)?;
        self.entity_types.get(&s.entity_type)
    }

    pub fn is_tracked(&self, set_name: &str) -> bool {
        self.tracked_sets.contains(set_name)
    }

    /// Resolve an entity-set name bound on the other side of a navigation
    /// descriptor to its table name, for the planner's join generation.
    pub fn table_name_for_set(&self, set_name: &str) -> Option<&str> {
        self.entity_sets.get(set_name).map(|s| s.table_name.as_str())
    }
}
