//! Hosting-application hook points run during the write pipeline:
//! `BeforeCreate`/`BeforeUpdate`/`BeforeDelete` callbacks a host can
//! register to validate or enrich a row before it's written.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ODataError;
use crate::url::KeyLiteral;

pub trait BeforeCreate: Send + Sync {
    fn call(&self, entity_type: &str, row: &mut Map<String, Value>) -> Result<(), ODataError>;
}

pub trait BeforeUpdate: Send + Sync {
    fn call(&self, entity_type: &str, key: &[KeyLiteral], row: &mut Map<String, Value>) -> Result<(), ODataError>;
}

pub trait BeforeDelete: Send + Sync {
    fn call(&self, entity_type: &str, key: &[KeyLiteral]) -> Result<(), ODataError>;
}

#[derive(Default, Clone)]
pub struct HookRegistry {
    before_create: HashMap<String, Arc<dyn BeforeCreate>>,
    before_update: HashMap<String, Arc<dyn BeforeUpdate>>,
    before_delete: HashMap<String, Arc<dyn BeforeDelete>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_before_create(&mut self, entity_type: impl Into<String>, hook: Arc<dyn BeforeCreate>) {
        self.before_create.insert(entity_type.into(), hook);
    }

    pub fn set_before_update(&mut self, entity_type: impl Into<String>, hook: Arc<dyn BeforeUpdate>) {
        self.before_update.insert(entity_type.into(), hook);
    }

    pub fn set_before_delete(&mut self, entity_type: impl Into<String>, hook: Arc<dyn BeforeDelete>) {
        self.before_delete.insert(entity_type.into(), hook);
    }

    pub fn before_create(&self, entity_type: &str) -> Option<&Arc<dyn BeforeCreate>> {
        self.before_create.get(entity_type)
    }

    pub fn before_update(&self, entity_type: &str) -> Option<&Arc<dyn BeforeUpdate>> {
        self.before_update.get(entity_type)
    }

    pub fn before_delete(&self, entity_type: &str) -> Option<&Arc<dyn BeforeDelete>> {
        self.before_delete.get(entity_type)
    }
}
