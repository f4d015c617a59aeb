//! The binding registry — storage and canonicalization only.
//!
//! Owns the maps behind the container: bindings, cached instances,
//! aliases (with a reverse index for contextual lookups), contextual
//! overrides, extender chains, tags, the scoped marker set, and the
//! resolved set. All behavior beyond storage lives in the engine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::container::{BuildContext, Container};
use crate::error::{ContainerError, Result};
use crate::key::ServiceKey;
use crate::lifetime::Lifetime;
use crate::recipe::Service;

/// Factory thunk invoked during a build.
///
/// Receives a [`BuildContext`] so sub-dependencies resolve within the
/// caller's build stack and override frames.
pub type FactoryFn = Arc<dyn Fn(&mut BuildContext<'_>) -> Result<Service> + Send + Sync>;

/// Decorator applied to a freshly built instance before caching/return.
pub type ExtenderFn = Arc<dyn Fn(Service, &Container) -> Result<Service> + Send + Sync>;

/// Pre-registered resolver for a `Type@method` call target; short-circuits
/// reflection-based invocation entirely.
pub type MethodBindingFn = Arc<dyn Fn(&Container) -> Result<Service> + Send + Sync>;

/// The construction strategy a binding points at.
#[derive(Clone)]
pub(crate) enum Concrete {
    /// A factory closure.
    Factory(FactoryFn),
    /// Another key: equal to the abstract means "auto-build it", different
    /// chains resolution to that key.
    Key(ServiceKey),
}

#[derive(Clone)]
pub(crate) struct Binding {
    pub concrete: Concrete,
    pub lifetime: Lifetime,
}

/// A contextual override: what to hand a specific consumer for a needed
/// abstract (or `$parameter`).
#[derive(Clone)]
pub(crate) enum ContextualImpl {
    /// Resolve this key instead.
    Key(ServiceKey),
    /// Resolve each key; used for variadic dependencies.
    Keys(Vec<ServiceKey>),
    /// A pre-built value.
    Value(Service),
    /// A factory invoked in the consumer's build context.
    Factory(FactoryFn),
}

#[derive(Default)]
pub(crate) struct Registry {
    bindings: HashMap<ServiceKey, Binding>,
    instances: HashMap<ServiceKey, Service>,
    aliases: HashMap<ServiceKey, ServiceKey>,
    /// Reverse index: target -> alias names pointing at it.
    abstract_aliases: HashMap<ServiceKey, Vec<ServiceKey>>,
    /// consumer -> needed abstract -> implementation.
    contextual: HashMap<ServiceKey, HashMap<ServiceKey, ContextualImpl>>,
    extenders: HashMap<ServiceKey, Vec<ExtenderFn>>,
    tags: HashMap<String, Vec<ServiceKey>>,
    scoped: HashSet<ServiceKey>,
    resolved: HashSet<ServiceKey>,
    /// Keys already probed for metadata-driven auto-binding.
    auto_checked: HashSet<ServiceKey>,
    method_bindings: HashMap<String, MethodBindingFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Aliases ──

    /// Registers `name -> target`. Self-aliases are rejected at
    /// registration time.
    pub fn alias(&mut self, name: ServiceKey, target: ServiceKey) -> Result<()> {
        if name == target {
            return Err(ContainerError::SelfAlias { key: name });
        }
        debug!(alias = %name, target = %target, "Registered alias");
        self.abstract_aliases
            .entry(target.clone())
            .or_default()
            .push(name.clone());
        self.aliases.insert(name, target);
        Ok(())
    }

    /// Follows the alias chain to its end. Multi-hop chains are allowed;
    /// a revisited key means the chain loops and is reported instead of
    /// walked forever.
    pub fn canonical(&self, key: &ServiceKey) -> Result<ServiceKey> {
        let mut current = key;
        let mut visited: Vec<ServiceKey> = Vec::new();
        while let Some(next) = self.aliases.get(current) {
            if visited.contains(next) {
                let mut chain = visited;
                chain.push(next.clone());
                return Err(ContainerError::AliasCycle { chain });
            }
            visited.push(current.clone());
            current = next;
        }
        Ok(current.clone())
    }

    /// Canonicalization for boolean introspection paths: a looping chain
    /// yields the key unchanged rather than an error.
    pub fn canonical_or_self(&self, key: &ServiceKey) -> ServiceKey {
        self.canonical(key).unwrap_or_else(|_| key.clone())
    }

    /// Drops an alias registered under `key`, maintaining the reverse
    /// index. Used by `instance` to prevent stale double-registration.
    pub fn remove_alias(&mut self, key: &ServiceKey) {
        if let Some(target) = self.aliases.remove(key) {
            if let Some(names) = self.abstract_aliases.get_mut(&target) {
                names.retain(|n| n != key);
            }
        }
    }

    // ── Bindings ──

    pub fn set_binding(&mut self, key: ServiceKey, binding: Binding) {
        trace!(key = %key, lifetime = %binding.lifetime, "Stored binding");
        if binding.lifetime.is_scoped() {
            self.scoped.insert(key.clone());
        }
        self.bindings.insert(key, binding);
    }

    pub fn binding(&self, key: &ServiceKey) -> Option<Binding> {
        self.bindings.get(key).cloned()
    }

    /// Re-binding drops the old cached instance and any alias registered
    /// under the same name.
    pub fn drop_stale(&mut self, key: &ServiceKey) {
        self.instances.remove(key);
        self.remove_alias(key);
    }

    pub fn bound(&self, key: &ServiceKey) -> bool {
        self.bindings.contains_key(key)
            || self.instances.contains_key(key)
            || self.aliases.contains_key(key)
    }

    // ── Instances ──

    pub fn cache_instance(&mut self, key: ServiceKey, instance: Service) {
        self.instances.insert(key, instance);
    }

    pub fn instance(&self, key: &ServiceKey) -> Option<Service> {
        self.instances.get(key).cloned()
    }

    pub fn has_instance(&self, key: &ServiceKey) -> bool {
        self.instances.contains_key(key)
    }

    pub fn forget_instance(&mut self, key: &ServiceKey) {
        self.instances.remove(key);
    }

    pub fn forget_instances(&mut self) {
        self.instances.clear();
    }

    pub fn forget_scoped_instances(&mut self) {
        for key in &self.scoped {
            self.instances.remove(key);
        }
    }

    // ── Resolved / auto-binding bookkeeping ──

    pub fn mark_resolved(&mut self, key: ServiceKey) {
        self.resolved.insert(key);
    }

    pub fn is_resolved(&self, key: &ServiceKey) -> bool {
        self.resolved.contains(key) || self.instances.contains_key(key)
    }

    pub fn auto_checked(&self, key: &ServiceKey) -> bool {
        self.auto_checked.contains(key)
    }

    pub fn mark_auto_checked(&mut self, key: ServiceKey) {
        self.auto_checked.insert(key);
    }

    // ── Contextual overrides ──

    pub fn add_contextual(
        &mut self,
        consumer: ServiceKey,
        needs: ServiceKey,
        implementation: ContextualImpl,
    ) {
        debug!(consumer = %consumer, needs = %needs, "Registered contextual binding");
        self.contextual
            .entry(consumer)
            .or_default()
            .insert(needs, implementation);
    }

    /// Looks up the override for `(consumer, needs)`. When the abstract
    /// itself has no entry, every alias pointing at it is checked under
    /// the same consumer.
    pub fn contextual_for(
        &self,
        consumer: &ServiceKey,
        needs: &ServiceKey,
    ) -> Option<ContextualImpl> {
        let for_consumer = self.contextual.get(consumer)?;
        if let Some(found) = for_consumer.get(needs) {
            return Some(found.clone());
        }
        for alias in self.abstract_aliases.get(needs)? {
            if let Some(found) = for_consumer.get(alias) {
                return Some(found.clone());
            }
        }
        None
    }

    // ── Extenders ──

    pub fn push_extender(&mut self, key: ServiceKey, extender: ExtenderFn) {
        self.extenders.entry(key).or_default().push(extender);
    }

    pub fn extenders_for(&self, key: &ServiceKey) -> Vec<ExtenderFn> {
        self.extenders.get(key).cloned().unwrap_or_default()
    }

    // ── Tags ──

    pub fn tag(&mut self, keys: &[ServiceKey], tag: impl Into<String>) {
        let entry = self.tags.entry(tag.into()).or_default();
        entry.extend(keys.iter().cloned());
    }

    pub fn tag_members(&self, tag: &str) -> Vec<ServiceKey> {
        self.tags.get(tag).cloned().unwrap_or_default()
    }

    // ── Method bindings ──

    pub fn bind_method(&mut self, target: String, binding: MethodBindingFn) {
        self.method_bindings.insert(target, binding);
    }

    pub fn method_binding(&self, target: &str) -> Option<MethodBindingFn> {
        self.method_bindings.get(target).cloned()
    }

    // ── Introspection / reset ──

    pub fn registered_keys(&self) -> Vec<ServiceKey> {
        let mut keys: Vec<_> = self.bindings.keys().cloned().collect();
        keys.extend(self.instances.keys().cloned());
        keys.extend(self.aliases.keys().cloned());
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn flush(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_factory() -> FactoryFn {
        Arc::new(|_| Ok(Arc::new(0i32) as Service))
    }

    fn binding(lifetime: Lifetime) -> Binding {
        Binding {
            concrete: Concrete::Factory(noop_factory()),
            lifetime,
        }
    }

    #[test]
    fn alias_chain_is_transitive() {
        let mut reg = Registry::new();
        reg.alias(ServiceKey::named("x"), ServiceKey::named("y")).unwrap();
        reg.alias(ServiceKey::named("y"), ServiceKey::named("z")).unwrap();

        assert_eq!(
            reg.canonical(&ServiceKey::named("x")).unwrap(),
            ServiceKey::named("z")
        );
    }

    #[test]
    fn self_alias_rejected() {
        let mut reg = Registry::new();
        let err = reg
            .alias(ServiceKey::named("x"), ServiceKey::named("x"))
            .unwrap_err();
        assert!(matches!(err, ContainerError::SelfAlias { .. }));
    }

    #[test]
    fn alias_cycle_detected_not_looped() {
        let mut reg = Registry::new();
        reg.alias(ServiceKey::named("a"), ServiceKey::named("b")).unwrap();
        reg.alias(ServiceKey::named("b"), ServiceKey::named("a")).unwrap();

        let err = reg.canonical(&ServiceKey::named("a")).unwrap_err();
        assert!(matches!(err, ContainerError::AliasCycle { .. }));

        // Boolean paths degrade to the key itself.
        assert_eq!(
            reg.canonical_or_self(&ServiceKey::named("a")),
            ServiceKey::named("a")
        );
    }

    #[test]
    fn rebinding_drops_stale_instance() {
        let mut reg = Registry::new();
        let key = ServiceKey::named("svc");
        reg.set_binding(key.clone(), binding(Lifetime::Singleton));
        reg.cache_instance(key.clone(), Arc::new(1i32) as Service);
        assert!(reg.has_instance(&key));

        reg.drop_stale(&key);
        reg.set_binding(key.clone(), binding(Lifetime::Singleton));
        assert!(!reg.has_instance(&key));
        assert!(reg.bound(&key));
    }

    #[test]
    fn contextual_lookup_falls_back_to_aliases() {
        let mut reg = Registry::new();
        let consumer = ServiceKey::named("Consumer");
        let target = ServiceKey::named("Logger");
        reg.alias(ServiceKey::named("log"), target.clone()).unwrap();

        // Registered under the alias name, looked up by the target.
        reg.add_contextual(
            consumer.clone(),
            ServiceKey::named("log"),
            ContextualImpl::Key(ServiceKey::named("FileLogger")),
        );

        assert!(reg.contextual_for(&consumer, &target).is_some());
        assert!(reg.contextual_for(&ServiceKey::named("Other"), &target).is_none());
    }

    #[test]
    fn scoped_instances_cleared_selectively() {
        let mut reg = Registry::new();
        let singleton = ServiceKey::named("singleton");
        let scoped = ServiceKey::named("scoped");
        reg.set_binding(singleton.clone(), binding(Lifetime::Singleton));
        reg.set_binding(scoped.clone(), binding(Lifetime::Scoped));
        reg.cache_instance(singleton.clone(), Arc::new(1i32) as Service);
        reg.cache_instance(scoped.clone(), Arc::new(2i32) as Service);

        reg.forget_scoped_instances();
        assert!(reg.has_instance(&singleton));
        assert!(!reg.has_instance(&scoped));
    }

    #[test]
    fn tags_accumulate() {
        let mut reg = Registry::new();
        reg.tag(&[ServiceKey::named("a")], "reports");
        reg.tag(&[ServiceKey::named("b")], "reports");

        assert_eq!(reg.tag_members("reports").len(), 2);
        assert!(reg.tag_members("other").is_empty());
    }

    #[test]
    fn flush_resets_everything() {
        let mut reg = Registry::new();
        let key = ServiceKey::named("svc");
        reg.set_binding(key.clone(), binding(Lifetime::Singleton));
        reg.cache_instance(key.clone(), Arc::new(1i32) as Service);
        reg.alias(ServiceKey::named("s"), key.clone()).unwrap();
        reg.mark_resolved(key.clone());

        reg.flush();
        assert!(!reg.bound(&key));
        assert!(!reg.is_resolved(&key));
        assert!(reg.registered_keys().is_empty());
    }
}
