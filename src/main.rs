mod demo_model;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use odata_relay::{ODataService, ODataServiceBuilder, RequestContext, ServiceConfig};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("odata_relay=debug,tower_http=debug")))
        .init();

    let config_path = std::env::var("ODATA_CONFIG").unwrap_or_else(|_| "./odata.toml".to_string());
    let config = ServiceConfig::load(&config_path)?;

    let db_path = std::env::var("ODATA_DB").unwrap_or_else(|_| "./odata_demo.db".to_string());
    let store = odata_relay::store::sqlite::SqliteStore::open(&db_path)?;
    store.execute_batch(odata_relay::journal::JOURNAL_MIGRATION_SQL)?;
    demo_model::seed_schema(&store)?;
    tracing::info!(db_path, "demo schema ready");

    let registry = demo_model::build_registry();

    let service = Arc::new(
        ODataServiceBuilder::new(store, registry, config)
            .enable_change_tracking("Products")
            .build(),
    );

    let app = Router::new()
        .fallback(any(handle))
        .layer(TraceLayer::new_for_http())
        .with_state(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("odata-relay-demo listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Translates an axum `Request` into the crate's framework-agnostic
/// `RequestContext`, then an `HttpResponse` back into an axum `Response`.
/// This boundary is the only place the library touches axum directly
/// (besides `ODataError`'s `IntoResponse` impl); the library's own
/// `ODataService::handle` never sees an axum type.
async fn handle(State(service): State<Arc<ODataService>>, req: Request) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let scheme = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http")
        .to_string();
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    let body = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("failed to read request body: {e}")).into_response(),
    };

    let ctx = RequestContext {
        method: &method,
        path: &path,
        query: query.as_deref(),
        headers: &headers,
        body: &body,
        scheme: &scheme,
    };

    let result = service.handle(&ctx);
    let mut builder = Response::builder().status(result.status);
    for (name, value) in &result.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(result.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
