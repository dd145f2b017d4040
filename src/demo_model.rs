//! Sample entity model for the `odata-relay-demo` binary: two entity
//! sets (Products, Categories) related by a belongs-to navigation, and
//! the SQLite schema backing them. Not part of the library surface —
//! a hosting application supplies its own registry and schema the same
//! way this module does.

use odata_relay::metadata::{
    EdmType, EntitySetDescriptor, EntityTypeBuilder, MetadataRegistry, NavigationBuilder, PropertyBuilder,
    SingletonDescriptor,
};
use odata_relay::store::sqlite::SqliteStore;

pub fn seed_schema(store: &SqliteStore) -> anyhow::Result<()> {
    store.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            price REAL NOT NULL,
            category_id INTEGER,
            version INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (category_id) REFERENCES categories(id)
        );
        CREATE TABLE IF NOT EXISTS service_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            status TEXT NOT NULL
        );
        INSERT OR IGNORE INTO service_status (id, status) VALUES (1, 'Running');
        "#,
    )?;
    Ok(())
}

pub fn build_registry() -> MetadataRegistry {
    let category = EntityTypeBuilder::new("ODataService.Category")
        .property(PropertyBuilder::new("Id", EdmType::Int64).key().auto())
        .property(PropertyBuilder::new("Name", EdmType::String).required().searchable())
        .navigation(NavigationBuilder::has_many(
            "Products",
            "ODataService.Product",
            "Products",
            "CategoryId",
        ))
        .build()
        .expect("Category model is well-formed");

    let product = EntityTypeBuilder::new("ODataService.Product")
        .property(PropertyBuilder::new("Id", EdmType::Int64).key().auto())
        .property(PropertyBuilder::new("Name", EdmType::String).required().searchable())
        .property(PropertyBuilder::new("Price", EdmType::Double).required())
        .property(PropertyBuilder::new("CategoryId", EdmType::Int64).column("category_id"))
        .property(PropertyBuilder::new("Version", EdmType::Int64).column("version").etag().auto())
        .navigation(NavigationBuilder::belongs_to(
            "Category",
            "ODataService.Category",
            "Categories",
            "CategoryId",
        ))
        .build()
        .expect("Product model is well-formed");

    let status = EntityTypeBuilder::new("ODataService.ServiceStatus")
        .property(PropertyBuilder::new("Id", EdmType::Int64).key())
        .property(PropertyBuilder::new("Status", EdmType::String).required())
        .build()
        .expect("ServiceStatus model is well-formed");

    let mut registry = MetadataRegistry {
        namespace: "ODataService".to_string(),
        container_name: "Container".to_string(),
        ..Default::default()
    };
    registry.entity_types.insert(category.qualified_name.clone(), category);
    registry.entity_types.insert(product.qualified_name.clone(), product);
    registry.entity_types.insert(status.qualified_name.clone(), status);

    registry.entity_sets.insert(
        "Categories".to_string(),
        EntitySetDescriptor {
            name: "Categories".to_string(),
            entity_type: "ODataService.Category".to_string(),
            table_name: "categories".to_string(),
        },
    );
    registry.entity_sets.insert(
        "Products".to_string(),
        EntitySetDescriptor {
            name: "Products".to_string(),
            entity_type: "ODataService.Product".to_string(),
            table_name: "products".to_string(),
        },
    );
    registry.singletons.insert(
        "ServiceStatus".to_string(),
        SingletonDescriptor {
            name: "ServiceStatus".to_string(),
            entity_type: "ODataService.ServiceStatus".to_string(),
            table_name: "service_status".to_string(),
        },
    );

    registry
}
