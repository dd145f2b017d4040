//! End-to-end tests driving `ODataService::handle` against the bundled
//! SQLite reference store, the way a hosting application's own test
//! suite would exercise the façade rather than individual modules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};

use odata_relay::metadata::{
    EdmType, EntitySetDescriptor, EntityTypeBuilder, MetadataRegistry, NavigationBuilder, PropertyBuilder,
};
use odata_relay::store::sqlite::SqliteStore;
use odata_relay::write::hooks::BeforeDelete;
use odata_relay::{HttpResponse, ODataService, ODataServiceBuilder, RequestContext, ServiceConfig};
use odata_relay::url::KeyLiteral;

const JOURNAL_MIGRATION_SQL: &str = odata_relay::journal::JOURNAL_MIGRATION_SQL;

/// A small bookstore-ish model used across every test here: Categories,
/// Books (belongs_to Category), Authors (GUID-keyed), and a
/// Departments/Employees pair with an entity-set name that differs from
/// its backing table, for the navigation-filter + naming test.
fn seed_schema(store: &SqliteStore) {
    store
        .execute_batch(
            r#"
            CREATE TABLE categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                price REAL NOT NULL,
                category_id INTEGER,
                version INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE authors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );
            CREATE TABLE dept_tbl (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );
            CREATE TABLE emp_tbl (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                department_id INTEGER
            );
            "#,
        )
        .expect("schema creation succeeds");
}

fn build_registry() -> MetadataRegistry {
    let category = EntityTypeBuilder::new("Test.Category")
        .property(PropertyBuilder::new("Id", EdmType::Int64).key().auto())
        .property(PropertyBuilder::new("Name", EdmType::String).required())
        .navigation(NavigationBuilder::has_many("Books", "Test.Book", "Books", "CategoryId"))
        .build()
        .expect("Category model is well-formed");

    let book = EntityTypeBuilder::new("Test.Book")
        .property(PropertyBuilder::new("Id", EdmType::Int64).key().auto())
        .property(PropertyBuilder::new("Title", EdmType::String).required())
        .property(PropertyBuilder::new("Price", EdmType::Double).required())
        .property(PropertyBuilder::new("CategoryId", EdmType::Int64).column("category_id"))
        .property(PropertyBuilder::new("Version", EdmType::Int64).column("version").etag().auto())
        .navigation(NavigationBuilder::belongs_to("Category", "Test.Category", "Categories", "CategoryId"))
        .build()
        .expect("Book model is well-formed");

    let author = EntityTypeBuilder::new("Test.Author")
        .property(PropertyBuilder::new("Id", EdmType::Guid).key())
        .property(PropertyBuilder::new("Name", EdmType::String).required())
        .build()
        .expect("Author model is well-formed");

    let department = EntityTypeBuilder::new("Test.Department")
        .property(PropertyBuilder::new("Id", EdmType::Int64).key().auto())
        .property(PropertyBuilder::new("Name", EdmType::String).required())
        .navigation(NavigationBuilder::has_many("Employees", "Test.Employee", "Employees", "DepartmentId"))
        .build()
        .expect("Department model is well-formed");

    let employee = EntityTypeBuilder::new("Test.Employee")
        .property(PropertyBuilder::new("Id", EdmType::Int64).key().auto())
        .property(PropertyBuilder::new("Name", EdmType::String).required())
        .property(PropertyBuilder::new("DepartmentId", EdmType::Int64).column("department_id"))
        .navigation(NavigationBuilder::belongs_to("Department", "Test.Department", "Departments", "DepartmentId"))
        .build()
        .expect("Employee model is well-formed");

    let mut registry = MetadataRegistry {
        namespace: "Test".to_string(),
        container_name: "Container".to_string(),
        ..Default::default()
    };
    for entity in [category, book, author, department, employee] {
        registry.entity_types.insert(entity.qualified_name.clone(), entity);
    }
    registry.entity_sets.insert(
        "Categories".to_string(),
        EntitySetDescriptor { name: "Categories".to_string(), entity_type: "Test.Category".to_string(), table_name: "categories".to_string() },
    );
    registry.entity_sets.insert(
        "Books".to_string(),
        EntitySetDescriptor { name: "Books".to_string(), entity_type: "Test.Book".to_string(), table_name: "books".to_string() },
    );
    registry.entity_sets.insert(
        "Authors".to_string(),
        EntitySetDescriptor { name: "Authors".to_string(), entity_type: "Test.Author".to_string(), table_name: "authors".to_string() },
    );
    // Entity set names deliberately differ from their backing table names.
    registry.entity_sets.insert(
        "Departments".to_string(),
        EntitySetDescriptor { name: "Departments".to_string(), entity_type: "Test.Department".to_string(), table_name: "dept_tbl".to_string() },
    );
    registry.entity_sets.insert(
        "Employees".to_string(),
        EntitySetDescriptor { name: "Employees".to_string(), entity_type: "Test.Employee".to_string(), table_name: "emp_tbl".to_string() },
    );
    registry
}

fn build_service(db_path: &str) -> ODataServiceBuilder {
    let store = SqliteStore::open(db_path).expect("sqlite store opens");
    store.execute_batch(JOURNAL_MIGRATION_SQL).expect("journal migration applies");
    seed_schema(&store);
    let registry = build_registry();
    ODataServiceBuilder::new(store, registry, ServiceConfig::default())
}

fn req(service: &ODataService, method: &str, path: &str, query: Option<&str>, headers: &HashMap<String, String>, body: &[u8]) -> HttpResponse {
    let ctx = RequestContext { method, path, query, headers, body, scheme: "http" };
    service.handle(&ctx)
}

fn get(service: &ODataService, path: &str, query: Option<&str>) -> HttpResponse {
    req(service, "GET", path, query, &host_headers(), &[])
}

fn post_json(service: &ODataService, path: &str, body: &Value) -> HttpResponse {
    req(service, "POST", path, None, &host_headers(), body.to_string().as_bytes())
}

fn host_headers() -> HashMap<String, String> {
    let mut h = HashMap::new();
    h.insert("Host".to_string(), "localhost".to_string());
    h
}

fn body_json(resp: &HttpResponse) -> Value {
    serde_json::from_slice(&resp.body).unwrap_or(Value::Null)
}

// ---- 1. filter-with-composite-predicate ----

#[test]
fn filter_with_composite_predicate_narrows_to_matching_rows() {
    let service = build_service(":memory:").build();

    let cat = post_json(&service, "/Categories", &json!({"Name": "Fiction"}));
    assert_eq!(cat.status, 201);
    let category_id = body_json(&cat)["Id"].as_i64().unwrap();

    for (title, price) in [("Rust in Action", 15.0), ("Rust in Action", 5.0), ("Other Book", 20.0)] {
        let created = post_json(
            &service,
            "/Books",
            &json!({"Title": title, "Price": price, "CategoryId": category_id}),
        );
        assert_eq!(created.status, 201, "create should succeed: {:?}", body_json(&created));
    }

    let resp = get(&service, "/Books", Some("$filter=Price gt 10 and Title eq 'Rust in Action'"));
    assert_eq!(resp.status, 200);
    let body = body_json(&resp);
    let values = body["value"].as_array().expect("value array");
    assert_eq!(values.len(), 1, "composite predicate should keep exactly one row: {body:#?}");
    assert_eq!(values[0]["Title"], "Rust in Action");
    assert_eq!(values[0]["Price"], 15.0);
}

// ---- 2. transactional-batch-rollback ----

#[test]
fn failing_changeset_member_rolls_back_the_whole_changeset() {
    let service = build_service(":memory:").build();

    let first = post_json(&service, "/Categories", &json!({"Name": "Existing"}));
    assert_eq!(first.status, 201);

    let batch_body = concat!(
        "--batch_1\r\n",
        "Content-Type: multipart/mixed; boundary=changeset_1\r\n\r\n",
        "--changeset_1\r\n",
        "Content-Type: application/http\r\n",
        "Content-ID: 1\r\n\r\n",
        "POST /Categories HTTP/1.1\r\n",
        "Content-Type: application/json\r\n\r\n",
        "{\"Name\":\"Sci-Fi\"}\r\n",
        "--changeset_1\r\n",
        "Content-Type: application/http\r\n",
        "Content-ID: 2\r\n\r\n",
        "POST /Categories HTTP/1.1\r\n",
        "Content-Type: application/json\r\n\r\n",
        // duplicate name violates the UNIQUE constraint on categories.name,
        // and does so inside the changeset's shared transaction.
        "{\"Name\":\"Sci-Fi\"}\r\n",
        "--changeset_1--\r\n",
        "--batch_1--",
    );

    let mut headers = host_headers();
    headers.insert("Content-Type".to_string(), "multipart/mixed; boundary=batch_1".to_string());
    let resp = req(&service, "POST", "/$batch", None, &headers, batch_body.as_bytes());
    assert_eq!(resp.status, 200);
    let text = String::from_utf8_lossy(&resp.body);
    assert!(text.contains("HTTP/1.1 500") || text.contains("HTTP/1.1 409"), "expected a failure status in the rendered changeset: {text}");

    let check = get(&service, "/Categories", Some("$filter=Name eq 'Sci-Fi'"));
    let body = body_json(&check);
    assert!(
        body["value"].as_array().unwrap().is_empty(),
        "neither half of the failed changeset should have been committed"
    );
}

// ---- 3. delete-with-quoted-uuid-key-hook ----

struct RecordingBeforeDelete {
    calls: Arc<Mutex<Vec<(String, Vec<KeyLiteral>)>>>,
}

impl BeforeDelete for RecordingBeforeDelete {
    fn call(&self, entity_type: &str, key: &[KeyLiteral]) -> Result<(), odata_relay::ODataError> {
        self.calls.lock().unwrap().push((entity_type.to_string(), key.to_vec()));
        Ok(())
    }
}

#[test]
fn delete_with_quoted_guid_key_invokes_before_delete_hook() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let hook = Arc::new(RecordingBeforeDelete { calls: calls.clone() });
    let service = build_service(":memory:").before_delete("Test.Author", hook).build();

    let guid = "11111111-1111-1111-1111-111111111111";
    let created = post_json(&service, "/Authors", &json!({"Id": guid, "Name": "Ada Lovelace"}));
    assert_eq!(created.status, 201, "{:?}", body_json(&created));

    // The key segment is quoted, so the URL parser treats it as a string
    // literal rather than the unquoted GUID literal form; the GUID-typed
    // key property must still accept and delete against it.
    let path = format!("/Authors('{guid}')");
    let resp = req(&service, "DELETE", &path, None, &host_headers(), &[]);
    assert_eq!(resp.status, 204, "{:?}", body_json(&resp));

    let recorded = calls.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, "Test.Author");
    assert_eq!(recorded[0].1, vec![KeyLiteral::String(guid.to_string())]);

    let after = get(&service, &path, None);
    assert_eq!(after.status, 404, "row should actually be gone after the delete");
}

// ---- 4. custom-entity-set-and-table-name-with-navigation-filter ----

#[test]
fn filter_across_navigation_resolves_through_custom_table_names() {
    let service = build_service(":memory:").build();

    let eng = post_json(&service, "/Departments", &json!({"Name": "Engineering"}));
    assert_eq!(eng.status, 201);
    let eng_id = body_json(&eng)["Id"].as_i64().unwrap();
    let sales = post_json(&service, "/Departments", &json!({"Name": "Sales"}));
    assert_eq!(sales.status, 201);
    let sales_id = body_json(&sales)["Id"].as_i64().unwrap();

    post_json(&service, "/Employees", &json!({"Name": "Alice", "DepartmentId": eng_id}));
    post_json(&service, "/Employees", &json!({"Name": "Bob", "DepartmentId": sales_id}));

    let resp = get(&service, "/Employees", Some("$filter=Department/Name eq 'Engineering'"));
    assert_eq!(resp.status, 200, "{:?}", body_json(&resp));
    let body = body_json(&resp);
    let values = body["value"].as_array().unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["Name"], "Alice");
}

// ---- 5. metadata-level-on-single-entity ----

#[test]
fn metadata_level_controls_single_entity_annotations() {
    let service = build_service(":memory:").build();
    let cat = post_json(&service, "/Categories", &json!({"Name": "Fiction"}));
    let category_id = body_json(&cat)["Id"].as_i64().unwrap();
    let created = post_json(&service, "/Books", &json!({"Title": "Dune", "Price": 9.0, "CategoryId": category_id}));
    assert_eq!(created.status, 201);
    let path = "/Books(1)";

    let minimal = get(&service, path, None);
    let minimal_body = body_json(&minimal);
    assert!(minimal_body.get("@odata.context").is_some());
    assert!(minimal_body.get("@odata.type").is_none());

    let mut full_headers = host_headers();
    full_headers.insert("Accept".to_string(), "application/json;odata.metadata=full".to_string());
    let full = req(&service, "GET", path, None, &full_headers, &[]);
    let full_body = body_json(&full);
    assert!(full_body.get("@odata.context").is_some());
    assert_eq!(full_body["@odata.type"], "#Test.Book");
    assert!(full_body.get("@odata.id").is_some());

    let mut none_headers = host_headers();
    none_headers.insert("Accept".to_string(), "application/json;odata.metadata=none".to_string());
    let none = req(&service, "GET", path, None, &none_headers, &[]);
    let none_body = body_json(&none);
    assert!(none_body.get("@odata.context").is_none());
    assert!(none_body.get("@odata.type").is_none());
}

// ---- 6. delta-round-trip-across-restart ----

#[test]
fn delta_token_survives_a_store_reopen() {
    let dir = std::env::temp_dir();
    let db_path = dir.join(format!("odata_relay_delta_test_{}.db", std::process::id()));
    let db_path_str = db_path.to_str().unwrap().to_string();
    let _ = std::fs::remove_file(&db_path);

    {
        let mut config = ServiceConfig::default();
        config.persistent_change_tracking = true;
        let store = SqliteStore::open(&db_path_str).expect("opens");
        store.execute_batch(JOURNAL_MIGRATION_SQL).unwrap();
        seed_schema(&store);
        let registry = build_registry();
        let service = ODataServiceBuilder::new(store, registry, config)
            .enable_change_tracking("Books")
            .build();

        let cat = post_json(&service, "/Categories", &json!({"Name": "Fiction"}));
        let category_id = body_json(&cat)["Id"].as_i64().unwrap();
        let created = post_json(&service, "/Books", &json!({"Title": "First Edition", "Price": 10.0, "CategoryId": category_id}));
        assert_eq!(created.status, 201);

        let mut headers = host_headers();
        headers.insert("Prefer".to_string(), "odata.track-changes".to_string());
        let resp = req(&service, "GET", "/Books", None, &headers, &[]);
        assert_eq!(resp.status, 200);
        let body = body_json(&resp);
        let delta_link = body["@odata.deltaLink"].as_str().expect("delta link present").to_string();
        let token = delta_link.split("$deltatoken=").nth(1).expect("token present").to_string();

        // Simulate a restart: drop the service (and its in-process store)
        // entirely, then reopen against the same file.
        drop(service);

        let mut config2 = ServiceConfig::default();
        config2.persistent_change_tracking = true;
        let store2 = SqliteStore::open(&db_path_str).expect("reopens");
        store2.execute_batch(JOURNAL_MIGRATION_SQL).unwrap();
        seed_schema(&store2);
        let registry2 = build_registry();
        let service2 = ODataServiceBuilder::new(store2, registry2, config2)
            .enable_change_tracking("Books")
            .build();

        post_json(&service2, "/Books", &json!({"Title": "Second Edition", "Price": 12.0, "CategoryId": category_id}));

        let query = format!("$deltatoken={token}");
        let delta_resp = get(&service2, "/Books", Some(&query));
        assert_eq!(delta_resp.status, 200, "{:?}", body_json(&delta_resp));
        let delta_body = body_json(&delta_resp);
        let values = delta_body["value"].as_array().expect("delta value array");
        assert_eq!(values.len(), 1, "only the post-restart change should be in the window: {delta_body:#?}");
        assert_eq!(values[0]["Title"], "Second Edition");
        assert!(delta_body.get("@odata.deltaLink").is_some());
    }

    let _ = std::fs::remove_file(&db_path);
}

#[allow(dead_code)]
fn unused_map_silencer(_: Map<String, Value>) {}
