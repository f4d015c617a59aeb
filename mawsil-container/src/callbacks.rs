//! The callback pipeline: ordered hook lists fired by the resolution
//! engine at defined points.
//!
//! Storage and lookup only — the engine decides when to fire, and always
//! clones the relevant lists out before invoking them so no lock is held
//! across user code.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::container::Container;
use crate::context::Parameters;
use crate::error::Result;
use crate::key::ServiceKey;
use crate::recipe::{AttributeRef, Service};

/// Fired before the engine starts resolving a key.
pub type BeforeResolvingFn = Arc<dyn Fn(&ServiceKey, &Parameters, &Container) + Send + Sync>;

/// Fired with a freshly produced instance (`resolving` and
/// `after_resolving` share this shape).
pub type ResolvingFn = Arc<dyn Fn(&Service, &Container) + Send + Sync>;

/// Fired when an already-resolved abstract is re-bound; receives the
/// container and the newly resolved instance.
pub type ReboundFn = Arc<dyn Fn(&Container, Service) + Send + Sync>;

/// Fired for each attribute attached to a resolved type or parameter.
pub type AttributeCallbackFn = Arc<dyn Fn(&AttributeRef, &Service, &Container) + Send + Sync>;

/// Strategy producing a parameter's value from its contextual attribute.
pub type AttributeResolverFn =
    Arc<dyn Fn(&AttributeRef, &Container) -> Result<Service> + Send + Sync>;

#[derive(Default)]
pub(crate) struct CallbackPipeline {
    before_global: Vec<BeforeResolvingFn>,
    before_keyed: HashMap<ServiceKey, Vec<BeforeResolvingFn>>,
    resolving_global: Vec<ResolvingFn>,
    resolving_keyed: HashMap<ServiceKey, Vec<ResolvingFn>>,
    after_global: Vec<ResolvingFn>,
    after_keyed: HashMap<ServiceKey, Vec<ResolvingFn>>,
    attribute_callbacks: HashMap<TypeId, Vec<AttributeCallbackFn>>,
    attribute_resolvers: HashMap<TypeId, AttributeResolverFn>,
    rebound: HashMap<ServiceKey, Vec<ReboundFn>>,
}

impl CallbackPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ──

    pub fn add_before(&mut self, key: Option<ServiceKey>, cb: BeforeResolvingFn) {
        match key {
            Some(key) => self.before_keyed.entry(key).or_default().push(cb),
            None => self.before_global.push(cb),
        }
    }

    pub fn add_resolving(&mut self, key: Option<ServiceKey>, cb: ResolvingFn) {
        match key {
            Some(key) => self.resolving_keyed.entry(key).or_default().push(cb),
            None => self.resolving_global.push(cb),
        }
    }

    pub fn add_after(&mut self, key: Option<ServiceKey>, cb: ResolvingFn) {
        match key {
            Some(key) => self.after_keyed.entry(key).or_default().push(cb),
            None => self.after_global.push(cb),
        }
    }

    pub fn add_attribute_callback(&mut self, attribute: TypeId, cb: AttributeCallbackFn) {
        self.attribute_callbacks
            .entry(attribute)
            .or_default()
            .push(cb);
    }

    pub fn set_attribute_resolver(&mut self, attribute: TypeId, resolver: AttributeResolverFn) {
        self.attribute_resolvers.insert(attribute, resolver);
    }

    pub fn add_rebound(&mut self, key: ServiceKey, cb: ReboundFn) {
        self.rebound.entry(key).or_default().push(cb);
    }

    // ── Lookup: globals first, then key-scoped, in registration order ──

    pub fn before_for(&self, key: &ServiceKey) -> Vec<BeforeResolvingFn> {
        let mut out = self.before_global.clone();
        if let Some(keyed) = self.before_keyed.get(key) {
            out.extend(keyed.iter().cloned());
        }
        out
    }

    pub fn resolving_for(&self, key: &ServiceKey) -> Vec<ResolvingFn> {
        let mut out = self.resolving_global.clone();
        if let Some(keyed) = self.resolving_keyed.get(key) {
            out.extend(keyed.iter().cloned());
        }
        out
    }

    pub fn after_for(&self, key: &ServiceKey) -> Vec<ResolvingFn> {
        let mut out = self.after_global.clone();
        if let Some(keyed) = self.after_keyed.get(key) {
            out.extend(keyed.iter().cloned());
        }
        out
    }

    pub fn attribute_callbacks_for(&self, attribute: TypeId) -> Vec<AttributeCallbackFn> {
        self.attribute_callbacks
            .get(&attribute)
            .cloned()
            .unwrap_or_default()
    }

    pub fn attribute_resolver(&self, attribute: TypeId) -> Option<AttributeResolverFn> {
        self.attribute_resolvers.get(&attribute).cloned()
    }

    pub fn rebound_for(&self, key: &ServiceKey) -> Vec<ReboundFn> {
        self.rebound.get(key).cloned().unwrap_or_default()
    }
}
