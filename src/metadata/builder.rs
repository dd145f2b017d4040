//! Builder API replacing the tagged-struct-field reflection the distilled
//! model implies. One `EntityTypeBuilder` per entity type, called once at
//! startup; `build()` folds it into an immutable `EntityDescription`.

use super::registry::{Cardinality, EdmType, EntityDescription, NavigationDescriptor, PropertyDescriptor};

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("entity type {0} has no key property")]
    MissingKey(String),
    #[error("entity type {0} declares property {1} more than once")]
    DuplicateProperty(String, String),
    #[error("entity type {0} has more than one etag property")]
    ConflictingEtag(String),
    #[error("entity type {0} declares navigation {1} more than once")]
    DuplicateNavigation(String, String),
}

pub struct PropertyBuilder {
    descriptor: PropertyDescriptor,
}

impl PropertyBuilder {
    pub fn new(logical_name: impl Into<String>, edm_type: EdmType) -> Self {
        let logical_name = logical_name.into();
        let physical_name = logical_name.clone();
        Self {
            descriptor: PropertyDescriptor {
                logical_name,
                physical_name,
                edm_type,
                nullable: true,
                max_length: None,
                precision: None,
                is_key: false,
                is_required: false,
                is_auto: false,
                is_immutable: false,
                is_searchable: false,
                is_etag: false,
                is_excluded: false,
            },
        }
    }

    pub fn column(mut self, physical_name: impl Into<String>) -> Self {
        self.descriptor.physical_name = physical_name.into();
        self
    }

    pub fn key(mut self) -> Self {
        self.descriptor.is_key = true;
        self.descriptor.nullable = false;
        self.descriptor.is_required = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.descriptor.is_required = true;
        self.descriptor.nullable = false;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.descriptor.nullable = true;
        self
    }

    pub fn max_length(mut self, n: u32) -> Self {
        self.descriptor.max_length = Some(n);
        self
    }

    pub fn precision(mut self, p: u8, s: u8) -> Self {
        self.descriptor.precision = Some((p, s));
        self
    }

    pub fn auto(mut self) -> Self {
        self.descriptor.is_auto = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.descriptor.is_immutable = true;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.descriptor.is_searchable = true;
        self
    }

    pub fn etag(mut self) -> Self {
        self.descriptor.is_etag = true;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.descriptor.is_excluded = true;
        self
    }
}

pub struct NavigationBuilder {
    descriptor: NavigationDescriptor,
}

impl NavigationBuilder {
    fn new(
        logical_name: impl Into<String>,
        target_type: impl Into<String>,
        target_set: impl Into<String>,
        cardinality: Cardinality,
        owns_foreign_key: bool,
    ) -> Self {
        Self {
            descriptor: NavigationDescriptor {
                logical_name: logical_name.into(),
                target_type: target_type.into(),
                target_set: target_set.into(),
                cardinality,
                foreign_key: None,
                referenced_key: None,
                owns_foreign_key,
            },
        }
    }

    /// This side owns the foreign-key column pointing at the partner's key.
    pub fn belongs_to(
        logical_name: impl Into<String>,
        target_type: impl Into<String>,
        target_set: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let mut b = Self::new(logical_name, target_type, target_set, Cardinality::Single, true);
        b.descriptor.foreign_key = Some(foreign_key.into());
        b
    }

    /// The partner owns the foreign key pointing back at us; many partner rows.
    pub fn has_many(
        logical_name: impl Into<String>,
        target_type: impl Into<String>,
        target_set: impl Into<String>,
        partner_foreign_key: impl Into<String>,
    ) -> Self {
        let mut b = Self::new(
            logical_name,
            target_type,
            target_set,
            Cardinality::Collection,
            false,
        );
        b.descriptor.foreign_key = Some(partner_foreign_key.into());
        b
    }

    /// The partner owns the foreign key but the relationship is 1:1.
    pub fn has_one(
        logical_name: impl Into<String>,
        target_type: impl Into<String>,
        target_set: impl Into<String>,
        partner_foreign_key: impl Into<String>,
    ) -> Self {
        let mut b = Self::new(logical_name, target_type, target_set, Cardinality::Single, false);
        b.descriptor.foreign_key = Some(partner_foreign_key.into());
        b
    }

    pub fn referenced_key(mut self, key: impl Into<String>) -> Self {
        self.descriptor.referenced_key = Some(key.into());
        self
    }
}

pub struct EntityTypeBuilder {
    qualified_name: String,
    properties: Vec<PropertyDescriptor>,
    navigations: Vec<NavigationDescriptor>,
}

impl EntityTypeBuilder {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            properties: Vec::new(),
            navigations: Vec::new(),
        }
    }

    pub fn property(mut self, p: PropertyBuilder) -> Self {
        self.properties.push(p.descriptor);
        self
    }

    pub fn navigation(mut self, n: NavigationBuilder) -> Self {
        self.navigations.push(n.descriptor);
        self
    }

    pub fn build(self) -> Result<EntityDescription, RegistrationError> {
        if !self.properties.iter().any(|p| p.is_key) {
            return Err(RegistrationError::MissingKey(self.qualified_name));
        }

        let mut seen = std::collections::HashSet::new();
        for p in &self.properties {
            if !seen.insert(&p.logical_name) {
                return Err(RegistrationError::DuplicateProperty(
                    self.qualified_name,
                    p.logical_name.clone(),
                ));
            }
        }

        if self.properties.iter().filter(|p| p.is_etag).count() > 1 {
            return Err(RegistrationError::ConflictingEtag(self.qualified_name));
        }

        let mut seen_nav = std::collections::HashSet::new();
        for n in &self.navigations {
            if !seen_nav.insert(&n.logical_name) {
                return Err(RegistrationError::DuplicateNavigation(
                    self.qualified_name,
                    n.logical_name.clone(),
                ));
            }
        }

        Ok(EntityDescription {
            qualified_name: self.qualified_name,
            properties: self.properties,
            navigations: self.navigations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_rejected() {
        let err = EntityTypeBuilder::new("Ns.Foo")
            .property(PropertyBuilder::new("Name", EdmType::String))
            .build()
            .unwrap_err();
        matches!(err, RegistrationError::MissingKey(_));
    }

    #[test]
    fn duplicate_property_is_rejected() {
        let err = EntityTypeBuilder::new("Ns.Foo")
            .property(PropertyBuilder::new("Id", EdmType::Int64).key())
            .property(PropertyBuilder::new("Id", EdmType::String))
            .build()
            .unwrap_err();
        matches!(err, RegistrationError::DuplicateProperty(_, _));
    }

    #[test]
    fn well_formed_type_builds() {
        let desc = EntityTypeBuilder::new("Ns.Product")
            .property(PropertyBuilder::new("Id", EdmType::Int64).key())
            .property(PropertyBuilder::new("Name", EdmType::String).required().searchable())
            .property(PropertyBuilder::new("Version", EdmType::Int64).etag().auto())
            .build()
            .unwrap();
        assert_eq!(desc.key_properties().count(), 1);
        assert!(desc.etag_property().is_some());
    }
}
