//! Composition-root handle: the default owner registry, the id provider and
//! codec settings, passed explicitly to every operation that needs them.

use std::sync::{Arc, Weak};

use crate::codec::CodecConfig;
use crate::id::{IdProvider, ObjectId, SequentialIds};
use crate::registry::{LocalRegistry, Registry};

#[derive(Clone)]
pub struct Context {
    registry: Arc<dyn Registry>,
    ids: Arc<dyn IdProvider>,
    codec: CodecConfig,
}

impl Context {
    /// Fresh in-memory registry, sequential ids, default codec settings.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(LocalRegistry::new()),
            ids: Arc::new(SequentialIds::new()),
            codec: CodecConfig::default(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdProvider>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }

    /// Registry used as owner when none is given.
    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn default_owner(&self) -> Weak<dyn Registry> {
        Arc::downgrade(&self.registry)
    }

    pub fn ids(&self) -> &Arc<dyn IdProvider> {
        &self.ids
    }

    pub fn pop_id(&self) -> ObjectId {
        self.ids.pop()
    }

    pub fn codec(&self) -> &CodecConfig {
        &self.codec
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
