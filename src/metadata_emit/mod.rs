//! Rendering the registry out to the wire formats `/$metadata` and `/`
//! expose: CSDL XML, CSDL JSON, and the service document.

pub mod json;
pub mod service_document;
pub mod xml;

pub use json::render_csdl_json;
pub use service_document::render_service_document;
pub use xml::render_csdl_xml;
