//! Response shaping: metadata-level negotiation, context URLs, and the
//! JSON envelopes for collections, single entities, structural properties,
//! `$value`, and delta windows.

pub mod context;
pub mod delta;
pub mod entity;
pub mod level;
pub mod response;

pub use context::ServiceRoot;
pub use delta::{attach_delta_link, serialize_delta};
pub use entity::{EntityNode, Expansion, entity_to_json, key_segment_for_row, key_sql_values, row_key_pairs};
pub use level::MetadataLevel;
pub use response::{CollectionResponse, EntityResponse, serialize_collection, serialize_entity, serialize_property, serialize_raw_value};
