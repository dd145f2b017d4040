pub mod builder;
pub mod registry;

pub use builder::{EntityTypeBuilder, NavigationBuilder, PropertyBuilder, RegistrationError};
pub use registry::{
    Cardinality, EdmType, EntityDescription, EntitySetDescriptor, MetadataRegistry,
    NavigationDescriptor, PropertyDescriptor, SingletonDescriptor,
};
