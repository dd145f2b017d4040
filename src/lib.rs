//! A fully conforming OData v4/v4.01 service layer over a relational
//! data model: URL/query compiler, request pipeline and response
//! shaper, and a batch/change-tracking engine, wired together behind
//! [`service::ODataService`].

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod expr;
pub mod journal;
pub mod metadata;
pub mod metadata_emit;
pub mod plan;
pub mod serialize;
pub mod service;
pub mod store;
pub mod url;
pub mod write;

pub use config::ServiceConfig;
pub use error::ODataError;
pub use service::{HttpResponse, ODataService, ODataServiceBuilder, Policy, RequestContext, RequestLogger};
pub use tokio_util::sync::CancellationToken;
