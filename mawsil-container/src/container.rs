//! The container: binding registration, the resolution engine, and the
//! callback surface.
//!
//! [`Container`] is a cheap clonable handle over shared state. All
//! resolution flows through [`Container::resolve_in`], which threads a
//! per-call [`ResolutionContext`] carrying the build stack and the
//! parameter-override stack. Factories receive a [`BuildContext`] so
//! nested resolutions stay inside the caller's context; two concurrent
//! resolutions never observe each other's stacks.
//!
//! Lock discipline: registry and callback guards are never held across
//! user code. Factories, extenders, and callbacks are cloned out under
//! a read lock and invoked after the guard drops.

use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, debug_span, trace};

use crate::callbacks::{CallbackPipeline, ReboundFn};
use crate::context::{Parameters, ResolutionContext};
use crate::contextual::ContextualBindingBuilder;
use crate::error::{
    CircularDependencyError, ContainerError, NotFoundError, NotInstantiableError, Result,
    UnresolvedPrimitiveError,
};
use crate::key::ServiceKey;
use crate::lifetime::Lifetime;
use crate::recipe::{
    Argument, ArgumentList, AttributeRef, MetadataCache, ParamRecipe, Service, TypeMetadata,
    TypeRecipe,
};
use crate::registry::{
    Binding, Concrete, ContextualImpl, ExtenderFn, FactoryFn, MethodBindingFn, Registry,
};
use crate::tagged::{TagCountFn, TagProducerFn, TaggedServices};

/// Predicate consulted for environment-scoped declarative bindings.
pub type EnvPredicateFn = Arc<dyn Fn(&[String]) -> bool + Send + Sync>;

struct Inner {
    registry: RwLock<Registry>,
    callbacks: RwLock<CallbackPipeline>,
    metadata: MetadataCache,
    environment: RwLock<Option<EnvPredicateFn>>,
}

/// The service container.
///
/// Cloning produces another handle to the same container; state is
/// shared. Resolution entry points are safe to call concurrently.
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("bindings", &self.inner.registry.read().len())
            .finish()
    }
}

/// Handed to factories during a build. Resolutions made through it run
/// inside the originating call's build stack, so cycle detection and
/// contextual bindings see the full consumer chain.
pub struct BuildContext<'a> {
    container: &'a Container,
    ctx: &'a mut ResolutionContext,
}

impl BuildContext<'_> {
    pub fn container(&self) -> &Container {
        self.container
    }

    pub fn make_key(&mut self, key: impl Into<ServiceKey>) -> Result<Service> {
        self.container
            .resolve_in(key.into(), Parameters::new(), true, self.ctx)
    }

    pub fn make<T: Send + Sync + 'static>(&mut self) -> Result<Arc<T>> {
        let key = ServiceKey::of::<T>();
        let value = self.make_key(key.clone())?;
        downcast_service::<T>(&key, value)
    }

    pub fn make_cloned<T: Clone + Send + Sync + 'static>(&mut self) -> Result<T> {
        Ok(self.make::<T>()?.as_ref().clone())
    }

    /// Resolves key `K` (typically `dyn Trait`) and clones its payload
    /// out as `T` (typically `Arc<dyn Trait>`).
    pub fn make_as<K, T>(&mut self) -> Result<T>
    where
        K: ?Sized + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let key = ServiceKey::of::<K>();
        let value = self.make_key(key.clone())?;
        Ok(downcast_service::<T>(&key, value)?.as_ref().clone())
    }

    /// Consumes an explicit override from the current frame, if present.
    pub fn parameter(&mut self, name: &str) -> Option<Service> {
        self.ctx.last_overrides_mut().and_then(|f| f.take(name))
    }

    pub fn param<T: Send + Sync + 'static>(&mut self, name: &str) -> Option<Arc<T>> {
        self.parameter(name).and_then(|v| v.downcast::<T>().ok())
    }
}

impl Container {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::new()),
                callbacks: RwLock::new(CallbackPipeline::new()),
                metadata: MetadataCache::new(),
                environment: RwLock::new(None),
            }),
        }
    }

    // ============================================================
    // Registration
    // ============================================================

    /// Binds `T` to a factory, transient lifetime.
    pub fn bind<T, F>(&self, factory: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&mut BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.bind_key(ServiceKey::of::<T>(), wrap_factory(factory), Lifetime::Transient)
    }

    /// Binds `T` only when nothing is registered under its key yet.
    pub fn bind_if<T, F>(&self, factory: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&mut BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        if self.has::<T>() {
            return Ok(());
        }
        self.bind(factory)
    }

    pub fn singleton<T, F>(&self, factory: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&mut BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.bind_key(ServiceKey::of::<T>(), wrap_factory(factory), Lifetime::Singleton)
    }

    pub fn singleton_if<T, F>(&self, factory: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&mut BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        if self.has::<T>() {
            return Ok(());
        }
        self.singleton(factory)
    }

    pub fn scoped<T, F>(&self, factory: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&mut BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.bind_key(ServiceKey::of::<T>(), wrap_factory(factory), Lifetime::Scoped)
    }

    pub fn scoped_if<T, F>(&self, factory: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&mut BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        if self.has::<T>() {
            return Ok(());
        }
        self.scoped(factory)
    }

    /// Binds key `K` (typically `dyn Trait`) to a factory producing
    /// payload `T` (typically `Arc<dyn Trait>`), transient lifetime.
    pub fn bind_as<K, T, F>(&self, factory: F) -> Result<()>
    where
        K: ?Sized + 'static,
        T: Send + Sync + 'static,
        F: Fn(&mut BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.bind_key(ServiceKey::of::<K>(), wrap_factory(factory), Lifetime::Transient)
    }

    /// Like [`Container::bind_as`] with a shared lifetime.
    pub fn singleton_as<K, T, F>(&self, factory: F) -> Result<()>
    where
        K: ?Sized + 'static,
        T: Send + Sync + 'static,
        F: Fn(&mut BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.bind_key(ServiceKey::of::<K>(), wrap_factory(factory), Lifetime::Singleton)
    }

    /// Binds a key to a type-erased factory.
    ///
    /// Rebinding drops the previously cached instance and fires rebound
    /// callbacks when the key was already resolved.
    pub fn bind_key(
        &self,
        key: impl Into<ServiceKey>,
        factory: FactoryFn,
        lifetime: Lifetime,
    ) -> Result<()> {
        self.bind_concrete(key.into(), Concrete::Factory(factory), lifetime)
    }

    /// Binds a key to another key: resolving `key` resolves `target`.
    pub fn bind_key_to(
        &self,
        key: impl Into<ServiceKey>,
        target: ServiceKey,
        lifetime: Lifetime,
    ) -> Result<()> {
        self.bind_concrete(key.into(), Concrete::Key(target), lifetime)
    }

    fn bind_concrete(&self, key: ServiceKey, concrete: Concrete, lifetime: Lifetime) -> Result<()> {
        let was_resolved = {
            let mut reg = self.inner.registry.write();
            let was = reg.is_resolved(&key);
            reg.drop_stale(&key);
            reg.set_binding(key.clone(), Binding { concrete, lifetime });
            was
        };
        debug!(key = %key, %lifetime, "Registered binding");
        if was_resolved {
            self.rebound(&key)?;
        }
        Ok(())
    }

    /// Registers an existing value as the shared instance for `T`.
    pub fn instance<T: Send + Sync + 'static>(&self, value: T) -> Result<Arc<T>> {
        let value = Arc::new(value);
        self.instance_key(ServiceKey::of::<T>(), value.clone() as Service)?;
        Ok(value)
    }

    /// Registers an existing value under a key. A stale alias registered
    /// under the same name is dropped; rebound callbacks fire when the
    /// key was bound before.
    pub fn instance_key(&self, key: impl Into<ServiceKey>, value: Service) -> Result<Service> {
        let key = key.into();
        let was_bound = {
            let mut reg = self.inner.registry.write();
            reg.remove_alias(&key);
            let was = reg.bound(&key);
            reg.cache_instance(key.clone(), value.clone());
            was
        };
        debug!(key = %key, "Registered instance");
        if was_bound {
            self.rebound(&key)?;
        }
        Ok(value)
    }

    /// Registers `name` as an alias for `target`.
    pub fn alias(&self, name: impl Into<ServiceKey>, target: impl Into<ServiceKey>) -> Result<()> {
        self.inner.registry.write().alias(name.into(), target.into())
    }

    /// Assigns the given keys to a tag.
    pub fn tag(&self, keys: &[ServiceKey], tag: impl Into<String>) {
        self.inner.registry.write().tag(keys, tag);
    }

    /// Returns a lazy view over everything tagged with `tag`. Values are
    /// resolved per iteration pass, so later `tag` calls are honored.
    pub fn tagged(&self, tag: &str) -> TaggedServices {
        let producer = {
            let container = self.clone();
            let tag = tag.to_string();
            Arc::new(move || {
                let members = { container.inner.registry.read().tag_members(&tag) };
                members
                    .into_iter()
                    .map(|key| container.make_key(key))
                    .collect()
            }) as TagProducerFn
        };
        let count = {
            let container = self.clone();
            let tag = tag.to_string();
            Arc::new(move || container.inner.registry.read().tag_members(&tag).len())
                as TagCountFn
        };
        TaggedServices::new(producer, count)
    }

    /// Decorates future resolutions of `T`. When a shared instance
    /// already exists it is extended in place and rebound callbacks fire.
    pub fn extend<T, F>(&self, extender: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>, &Container) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let key = ServiceKey::of::<T>();
        self.extend_key(
            key.clone(),
            Arc::new(move |value: Service, container: &Container| {
                let typed = downcast_service::<T>(&ServiceKey::of::<T>(), value)?;
                Ok(extender(typed, container)? as Service)
            }),
        )
    }

    pub fn extend_key(&self, key: impl Into<ServiceKey>, extender: ExtenderFn) -> Result<()> {
        let key = { self.inner.registry.read().canonical(&key.into())? };
        let existing = { self.inner.registry.read().instance(&key) };
        match existing {
            Some(instance) => {
                let extended = extender(instance, self)?;
                self.inner
                    .registry
                    .write()
                    .cache_instance(key.clone(), extended);
                self.rebound(&key)?;
            }
            None => {
                self.inner.registry.write().push_extender(key, extender);
            }
        }
        Ok(())
    }

    /// Starts a contextual binding for the given consumer keys.
    pub fn when(&self, consumers: impl IntoIterator<Item = ServiceKey>) -> ContextualBindingBuilder {
        ContextualBindingBuilder::new(self.clone(), consumers.into_iter().collect())
    }

    /// Starts a contextual binding for consumer type `T`.
    pub fn when_type<T: ?Sized + 'static>(&self) -> ContextualBindingBuilder {
        self.when([ServiceKey::of::<T>()])
    }

    pub(crate) fn add_contextual(
        &self,
        consumers: Vec<ServiceKey>,
        needs: ServiceKey,
        implementation: ContextualImpl,
    ) {
        let mut reg = self.inner.registry.write();
        for consumer in consumers {
            let consumer = reg.canonical_or_self(&consumer);
            reg.add_contextual(consumer, needs.clone(), implementation.clone());
        }
    }

    /// Registers a type recipe, overriding any link-time submission for
    /// the same key.
    pub fn register_recipe(&self, recipe: TypeRecipe) {
        trace!(key = %recipe.key, "Registered recipe");
        self.inner.metadata.register(recipe);
    }

    /// Pre-registers the resolver for a `"Type@method"` call target.
    pub fn bind_method<R, F>(&self, target: impl Into<String>, binding: F)
    where
        R: Send + Sync + 'static,
        F: Fn(&Container) -> Result<R> + Send + Sync + 'static,
    {
        self.inner.registry.write().bind_method(
            target.into(),
            Arc::new(move |container| Ok(Arc::new(binding(container)?) as Service)),
        );
    }

    /// Installs the predicate consulted by environment-scoped
    /// declarative bindings. Without one, only wildcard bindings apply.
    pub fn resolve_environment_using<F>(&self, predicate: F)
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        *self.inner.environment.write() = Some(Arc::new(predicate));
    }

    // ============================================================
    // Resolution
    // ============================================================

    pub fn make<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = ServiceKey::of::<T>();
        let value = self.make_key(key.clone())?;
        downcast_service::<T>(&key, value)
    }

    pub fn make_cloned<T: Clone + Send + Sync + 'static>(&self) -> Result<T> {
        Ok(self.make::<T>()?.as_ref().clone())
    }

    pub fn make_with<T: Send + Sync + 'static>(&self, params: Parameters) -> Result<Arc<T>> {
        let key = ServiceKey::of::<T>();
        let value = self.make_key_with(key.clone(), params)?;
        downcast_service::<T>(&key, value)
    }

    /// Resolves key `K` (typically `dyn Trait`) and clones its payload
    /// out as `T` (typically `Arc<dyn Trait>`).
    pub fn make_as<K, T>(&self) -> Result<T>
    where
        K: ?Sized + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let key = ServiceKey::of::<K>();
        let value = self.make_key(key.clone())?;
        Ok(downcast_service::<T>(&key, value)?.as_ref().clone())
    }

    pub fn make_key(&self, key: impl Into<ServiceKey>) -> Result<Service> {
        self.make_key_with(key, Parameters::new())
    }

    pub fn make_key_with(&self, key: impl Into<ServiceKey>, params: Parameters) -> Result<Service> {
        let key = key.into();
        let span = debug_span!("resolve", key = %key);
        let _guard = span.enter();
        let mut ctx = ResolutionContext::new();
        self.resolve_in(key, params, true, &mut ctx)
    }

    /// Resolves like [`Container::make`], but converts resolution
    /// failures for ids that were never bound into
    /// [`ContainerError::NotFound`] with near-miss suggestions.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = ServiceKey::of::<T>();
        let value = self.get_key(key.clone())?;
        downcast_service::<T>(&key, value)
    }

    pub fn get_key(&self, key: impl Into<ServiceKey>) -> Result<Service> {
        let key = key.into();
        match self.make_key(key.clone()) {
            Ok(value) => Ok(value),
            Err(err) if err.is_resolution_failure() && !self.has_key(&key) => {
                Err(ContainerError::NotFound(NotFoundError {
                    suggestions: self.suggestions_for(&key),
                    key,
                }))
            }
            Err(err) => Err(err),
        }
    }

    /// Builds the concrete type behind `key` directly, bypassing
    /// bindings and the instance cache.
    pub fn build_key(&self, key: impl Into<ServiceKey>) -> Result<Service> {
        let mut ctx = ResolutionContext::new();
        self.build_type(&key.into(), &mut ctx)
    }

    /// Packages resolution of `T` as a reusable closure.
    pub fn factory<T: Send + Sync + 'static>(
        &self,
    ) -> impl Fn() -> Result<Arc<T>> + Send + Sync + use<T> {
        let container = self.clone();
        move || container.make::<T>()
    }

    // ============================================================
    // Introspection & lifecycle
    // ============================================================

    /// `true` when anything is registered under `T`'s key.
    pub fn has<T: ?Sized + 'static>(&self) -> bool {
        self.has_key(&ServiceKey::of::<T>())
    }

    /// Alias for [`Container::has_key`].
    pub fn bound(&self, key: &ServiceKey) -> bool {
        self.has_key(key)
    }

    pub fn has_key(&self, key: &ServiceKey) -> bool {
        let reg = self.inner.registry.read();
        let canonical = reg.canonical_or_self(key);
        reg.bound(key) || reg.bound(&canonical)
    }

    /// `true` once the key has been resolved or registered as an instance.
    pub fn resolved(&self, key: &ServiceKey) -> bool {
        let reg = self.inner.registry.read();
        let canonical = reg.canonical_or_self(key);
        reg.is_resolved(&canonical)
    }

    /// `true` when resolving the key yields a cached/shared instance.
    pub fn is_shared(&self, key: &ServiceKey) -> bool {
        let canonical = {
            let reg = self.inner.registry.read();
            let canonical = reg.canonical_or_self(key);
            if reg.has_instance(&canonical) {
                return true;
            }
            if let Some(binding) = reg.binding(&canonical) {
                return binding.lifetime.is_cached();
            }
            canonical
        };
        self.inner
            .metadata
            .recipe_for(&canonical)
            .is_some_and(|r| r.always_singleton() || r.always_scoped())
    }

    pub fn forget_instance(&self, key: &ServiceKey) {
        self.inner.registry.write().forget_instance(key);
    }

    pub fn forget_instances(&self) {
        self.inner.registry.write().forget_instances();
    }

    /// Drops cached instances whose bindings are scoped; singletons stay.
    pub fn forget_scoped_instances(&self) {
        self.inner.registry.write().forget_scoped_instances();
    }

    /// Resets bindings, instances, aliases, tags, and cached recipes.
    /// Registered callbacks survive a flush.
    pub fn flush(&self) {
        self.inner.registry.write().flush();
        self.inner.metadata.flush();
    }

    // ============================================================
    // Callbacks
    // ============================================================

    pub fn before_resolving<F>(&self, key: impl Into<ServiceKey>, callback: F)
    where
        F: Fn(&ServiceKey, &Parameters, &Container) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .write()
            .add_before(Some(key.into()), Arc::new(callback));
    }

    pub fn before_resolving_any<F>(&self, callback: F)
    where
        F: Fn(&ServiceKey, &Parameters, &Container) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().add_before(None, Arc::new(callback));
    }

    pub fn resolving<F>(&self, key: impl Into<ServiceKey>, callback: F)
    where
        F: Fn(&Service, &Container) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .write()
            .add_resolving(Some(key.into()), Arc::new(callback));
    }

    pub fn resolving_any<F>(&self, callback: F)
    where
        F: Fn(&Service, &Container) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().add_resolving(None, Arc::new(callback));
    }

    pub fn after_resolving<F>(&self, key: impl Into<ServiceKey>, callback: F)
    where
        F: Fn(&Service, &Container) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .write()
            .add_after(Some(key.into()), Arc::new(callback));
    }

    pub fn after_resolving_any<F>(&self, callback: F)
    where
        F: Fn(&Service, &Container) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().add_after(None, Arc::new(callback));
    }

    /// Observes attribute `A` wherever it appears as parameter metadata
    /// or class-level metadata on a freshly built value.
    pub fn after_resolving_attribute<A, F>(&self, callback: F)
    where
        A: Send + Sync + 'static,
        F: Fn(&A, &Service, &Container) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().add_attribute_callback(
            TypeId::of::<A>(),
            Arc::new(move |attr, value, container| {
                if let Some(typed) = attr.downcast_ref::<A>() {
                    callback(typed, value, container);
                }
            }),
        );
    }

    /// Installs the resolver strategy for contextual attribute `A`.
    pub fn register_attribute_resolver<A, F>(&self, resolver: F)
    where
        A: Send + Sync + 'static,
        F: Fn(&A, &Container) -> Result<Service> + Send + Sync + 'static,
    {
        self.inner.callbacks.write().set_attribute_resolver(
            TypeId::of::<A>(),
            Arc::new(move |attr, container| {
                let typed = attr
                    .downcast_ref::<A>()
                    .ok_or(ContainerError::ArgumentMismatch {
                        expected: type_name::<A>(),
                    })?;
                resolver(typed, container)
            }),
        );
    }

    /// Runs `callback` whenever the key is re-bound after having been
    /// resolved.
    pub fn rebinding<F>(&self, key: impl Into<ServiceKey>, callback: F)
    where
        F: Fn(&Container, Service) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().add_rebound(key.into(), Arc::new(callback));
    }

    // ============================================================
    // Engine
    // ============================================================

    pub(crate) fn resolve_in(
        &self,
        key: ServiceKey,
        params: Parameters,
        raise_events: bool,
        ctx: &mut ResolutionContext,
    ) -> Result<Service> {
        let key = { self.inner.registry.read().canonical(&key)? };

        if raise_events {
            let before = { self.inner.callbacks.read().before_for(&key) };
            for cb in before {
                cb(&key, &params, self);
            }
        }

        let consumer = ctx.consumer().cloned();
        let contextual = {
            let reg = self.inner.registry.read();
            consumer.and_then(|c| reg.contextual_for(&c, &key))
        };

        // Explicit parameters and contextual hits force a fresh build and
        // suppress caching.
        let needs_contextual = !params.is_empty() || contextual.is_some();
        if !needs_contextual {
            let cached = { self.inner.registry.read().instance(&key) };
            if let Some(instance) = cached {
                trace!(key = %key, "Returning shared instance");
                return Ok(instance);
            }
        }

        ctx.push_overrides(params);
        let result = self.resolve_concrete(&key, contextual, needs_contextual, raise_events, ctx);
        ctx.pop_overrides();
        result
    }

    fn resolve_concrete(
        &self,
        key: &ServiceKey,
        contextual: Option<ContextualImpl>,
        needs_contextual: bool,
        raise_events: bool,
        ctx: &mut ResolutionContext,
    ) -> Result<Service> {
        let mut lifetime = Lifetime::Transient;
        let built = match contextual {
            Some(ContextualImpl::Value(value)) => value,
            Some(ContextualImpl::Factory(factory)) => self.build_factory(&factory, ctx)?,
            Some(ContextualImpl::Keys(keys)) => {
                let mut values = Vec::with_capacity(keys.len());
                for k in keys {
                    values.push(self.resolve_in(k, Parameters::new(), false, ctx)?);
                }
                Arc::new(values) as Service
            }
            Some(ContextualImpl::Key(target)) if target == *key => self.build_type(key, ctx)?,
            Some(ContextualImpl::Key(target)) => {
                let forward = ctx.last_overrides().cloned().unwrap_or_default();
                self.resolve_in(target, forward, false, ctx)?
            }
            None => {
                let binding = self.concrete_for(key)?;
                lifetime = binding.lifetime;
                match binding.concrete {
                    Concrete::Factory(factory) => self.build_factory(&factory, ctx)?,
                    Concrete::Key(target) if target == *key => self.build_type(key, ctx)?,
                    Concrete::Key(target) => {
                        let forward = ctx.last_overrides().cloned().unwrap_or_default();
                        self.resolve_in(target, forward, false, ctx)?
                    }
                }
            }
        };

        let mut value = built;
        let extenders = { self.inner.registry.read().extenders_for(key) };
        for extender in extenders {
            value = extender(value, self)?;
        }

        if !needs_contextual && lifetime.is_cached() {
            self.inner
                .registry
                .write()
                .cache_instance(key.clone(), value.clone());
        }

        if raise_events {
            let (resolving, after) = {
                let callbacks = self.inner.callbacks.read();
                (callbacks.resolving_for(key), callbacks.after_for(key))
            };
            for cb in resolving {
                cb(&value, self);
            }
            for cb in after {
                cb(&value, self);
            }
        }

        if !needs_contextual {
            self.inner.registry.write().mark_resolved(key.clone());
        }

        Ok(value)
    }

    /// Finds the binding for a key, probing declarative recipe metadata
    /// the first time an unbound key is seen. A metadata hit registers a
    /// real binding so later resolutions skip the probe.
    fn concrete_for(&self, key: &ServiceKey) -> Result<Binding> {
        let probe = {
            let mut reg = self.inner.registry.write();
            if let Some(binding) = reg.binding(key) {
                return Ok(binding);
            }
            if reg.auto_checked(key) {
                false
            } else {
                reg.mark_auto_checked(key.clone());
                true
            }
        };

        if probe {
            if let Some(recipe) = self.inner.metadata.recipe_for(key) {
                let target = self.select_auto_binding(&recipe);
                let lifetime = if recipe.always_singleton() {
                    Lifetime::Singleton
                } else if recipe.always_scoped() {
                    Lifetime::Scoped
                } else {
                    Lifetime::Transient
                };
                if target.is_some() || lifetime.is_cached() {
                    let binding = Binding {
                        concrete: Concrete::Key(target.unwrap_or_else(|| key.clone())),
                        lifetime,
                    };
                    debug!(key = %key, %lifetime, "Auto-bound from recipe metadata");
                    self.inner
                        .registry
                        .write()
                        .set_binding(key.clone(), binding.clone());
                    return Ok(binding);
                }
            }
        }

        Ok(Binding {
            concrete: Concrete::Key(key.clone()),
            lifetime: Lifetime::Transient,
        })
    }

    /// Picks the declarative binding target: an environment-scoped entry
    /// matched by the installed predicate wins over the wildcard entry.
    fn select_auto_binding(&self, recipe: &TypeRecipe) -> Option<ServiceKey> {
        let predicate = self.inner.environment.read().clone();
        let mut wildcard = None;
        for metadata in &recipe.metadata {
            if let TypeMetadata::Bind { target, environments } = metadata {
                if environments.is_empty() {
                    if wildcard.is_none() {
                        wildcard = Some(target.clone());
                    }
                } else if let Some(predicate) = &predicate {
                    if predicate(environments) {
                        return Some(target.clone());
                    }
                }
            }
        }
        wildcard
    }

    pub(crate) fn build_type(
        &self,
        key: &ServiceKey,
        ctx: &mut ResolutionContext,
    ) -> Result<Service> {
        if ctx.contains_type(key) {
            let mut chain = ctx.type_chain();
            chain.push(key.clone());
            return Err(ContainerError::CircularDependency(CircularDependencyError {
                chain,
            }));
        }

        let recipe = self.inner.metadata.recipe_for(key).ok_or_else(|| {
            ContainerError::NotInstantiable(NotInstantiableError {
                target: key.clone(),
                build_stack: ctx.type_chain(),
            })
        })?;

        if let Some(self_ctor) = recipe.self_constructor.clone() {
            ctx.push_type(key.clone());
            let value = self.call_in(&self_ctor, Parameters::new(), ctx);
            ctx.pop_frame();
            let value = value?;
            self.fire_class_attributes(&recipe, &value);
            return Ok(value);
        }

        let Some(constructor) = recipe.constructor.clone() else {
            return Err(ContainerError::NotInstantiable(NotInstantiableError {
                target: key.clone(),
                build_stack: ctx.type_chain(),
            }));
        };

        trace!(key = %key, "Building");
        ctx.push_type(key.clone());
        let args = self.resolve_dependencies(&recipe.params, ctx);
        ctx.pop_frame();

        let value = constructor(ArgumentList::new(args?))?;
        self.fire_class_attributes(&recipe, &value);
        Ok(value)
    }

    fn build_factory(&self, factory: &FactoryFn, ctx: &mut ResolutionContext) -> Result<Service> {
        ctx.push_opaque();
        let result = {
            let mut bcx = BuildContext {
                container: self,
                ctx: &mut *ctx,
            };
            factory(&mut bcx)
        };
        ctx.pop_frame();
        result
    }

    pub(crate) fn resolve_dependencies(
        &self,
        params: &[ParamRecipe],
        ctx: &mut ResolutionContext,
    ) -> Result<Vec<Argument>> {
        let mut args = Vec::with_capacity(params.len());
        for param in params {
            let arg = self.resolve_parameter(param, ctx)?;
            if !param.metadata.is_empty() {
                self.fire_param_metadata(param, &arg);
            }
            args.push(arg);
        }
        Ok(args)
    }

    fn resolve_parameter(
        &self,
        param: &ParamRecipe,
        ctx: &mut ResolutionContext,
    ) -> Result<Argument> {
        // Explicit overrides by name beat every other source.
        if let Some(frame) = ctx.last_overrides_mut() {
            if let Some(value) = frame.take(param.name) {
                return Ok(Argument::One(value));
            }
        }

        if let Some(attribute) = &param.attribute {
            return self.resolve_attribute(param, attribute);
        }

        match param.class.clone() {
            None => self.resolve_primitive(param, ctx),
            Some(class) => self.resolve_class(param, &class, ctx),
        }
    }

    fn resolve_attribute(&self, param: &ParamRecipe, attribute: &AttributeRef) -> Result<Argument> {
        let resolver = { self.inner.callbacks.read().attribute_resolver(attribute.type_id()) };
        let resolver = resolver.ok_or(ContainerError::MissingAttributeResolver {
            attribute: attribute.type_name(),
            parameter: param.name,
            declared_by: param.declared_by.clone(),
        })?;
        let value = resolver(attribute, self)?;
        self.fire_attribute(attribute, &value);
        Ok(Argument::One(value))
    }

    fn resolve_primitive(
        &self,
        param: &ParamRecipe,
        ctx: &mut ResolutionContext,
    ) -> Result<Argument> {
        let parameter_key = ServiceKey::parameter(param.name);
        let consumer = ctx.consumer().cloned();
        let hit = {
            let reg = self.inner.registry.read();
            consumer.and_then(|c| reg.contextual_for(&c, &parameter_key))
        };
        if let Some(hit) = hit {
            let value = match hit {
                ContextualImpl::Value(value) => value,
                ContextualImpl::Factory(factory) => self.build_factory(&factory, ctx)?,
                ContextualImpl::Key(target) => {
                    self.resolve_in(target, Parameters::new(), false, ctx)?
                }
                ContextualImpl::Keys(keys) => {
                    let mut values = Vec::with_capacity(keys.len());
                    for k in keys {
                        values.push(self.resolve_in(k, Parameters::new(), false, ctx)?);
                    }
                    Arc::new(values) as Service
                }
            };
            return Ok(Argument::One(value));
        }

        if let Some(default) = &param.default {
            return Ok(Argument::One(default()));
        }
        if param.variadic {
            return Ok(Argument::Many(Vec::new()));
        }
        if param.nullable {
            return Ok(Argument::Absent);
        }
        Err(ContainerError::UnresolvedPrimitive(UnresolvedPrimitiveError {
            parameter: param.name,
            declared_by: param.declared_by.clone(),
        }))
    }

    fn resolve_class(
        &self,
        param: &ParamRecipe,
        class: &ServiceKey,
        ctx: &mut ResolutionContext,
    ) -> Result<Argument> {
        let consumer = ctx.consumer().cloned();
        let contextual = {
            let reg = self.inner.registry.read();
            consumer.and_then(|c| reg.contextual_for(&c, class))
        };

        if param.variadic {
            return self.resolve_variadic(class, contextual, ctx);
        }

        let resolved = match contextual {
            Some(ContextualImpl::Value(value)) => Ok(value),
            Some(ContextualImpl::Factory(factory)) => self.build_factory(&factory, ctx),
            Some(ContextualImpl::Key(target)) => {
                self.resolve_in(target, Parameters::new(), false, ctx)
            }
            Some(ContextualImpl::Keys(keys)) => {
                let mut values = Vec::with_capacity(keys.len());
                for k in keys {
                    values.push(self.resolve_in(k, Parameters::new(), false, ctx)?);
                }
                Ok(Arc::new(values) as Service)
            }
            None => {
                // A declared default takes precedence over recipe-based
                // auto-construction; an explicit binding still wins.
                if let Some(default) = &param.default {
                    if !self.has_key(class) {
                        return Ok(Argument::One(default()));
                    }
                }
                self.resolve_in(class.clone(), Parameters::new(), true, ctx)
            }
        };

        match resolved {
            Ok(value) => Ok(Argument::One(value)),
            Err(err) if err.is_resolution_failure() => {
                if let Some(default) = &param.default {
                    Ok(Argument::One(default()))
                } else if param.nullable {
                    Ok(Argument::Absent)
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Variadic dependencies resolve best-effort: an unresolvable class
    /// yields the empty list, while cycle errors still propagate.
    fn resolve_variadic(
        &self,
        class: &ServiceKey,
        contextual: Option<ContextualImpl>,
        ctx: &mut ResolutionContext,
    ) -> Result<Argument> {
        match contextual {
            Some(ContextualImpl::Keys(keys)) => {
                let mut values = Vec::with_capacity(keys.len());
                for k in keys {
                    values.push(self.resolve_in(k, Parameters::new(), false, ctx)?);
                }
                Ok(Argument::Many(values))
            }
            Some(ContextualImpl::Value(value)) => Ok(Argument::Many(flatten_or_wrap(value))),
            Some(ContextualImpl::Factory(factory)) => {
                let value = self.build_factory(&factory, ctx)?;
                Ok(Argument::Many(flatten_or_wrap(value)))
            }
            Some(ContextualImpl::Key(target)) => {
                let value = self.resolve_in(target, Parameters::new(), false, ctx)?;
                Ok(Argument::Many(flatten_or_wrap(value)))
            }
            None => match self.resolve_in(class.clone(), Parameters::new(), true, ctx) {
                Ok(value) => Ok(Argument::Many(vec![value])),
                Err(err) if err.is_resolution_failure() => Ok(Argument::Many(Vec::new())),
                Err(err) => Err(err),
            },
        }
    }

    fn fire_class_attributes(&self, recipe: &TypeRecipe, value: &Service) {
        for attribute in recipe.attributes() {
            self.fire_attribute(attribute, value);
        }
    }

    fn fire_param_metadata(&self, param: &ParamRecipe, arg: &Argument) {
        for attribute in &param.metadata {
            match arg {
                Argument::One(value) => self.fire_attribute(attribute, value),
                Argument::Many(values) => {
                    for value in values {
                        self.fire_attribute(attribute, value);
                    }
                }
                Argument::Absent => {}
            }
        }
    }

    fn fire_attribute(&self, attribute: &AttributeRef, value: &Service) {
        let callbacks = {
            self.inner
                .callbacks
                .read()
                .attribute_callbacks_for(attribute.type_id())
        };
        for cb in callbacks {
            cb(attribute, value, self);
        }
    }

    fn rebound(&self, key: &ServiceKey) -> Result<()> {
        let callbacks: Vec<ReboundFn> = { self.inner.callbacks.read().rebound_for(key) };
        if callbacks.is_empty() {
            return Ok(());
        }
        let instance = self.make_key(key.clone())?;
        for cb in callbacks {
            cb(self, instance.clone());
        }
        Ok(())
    }

    fn suggestions_for(&self, key: &ServiceKey) -> Vec<ServiceKey> {
        let candidates = { self.inner.registry.read().registered_keys() };
        candidates
            .into_iter()
            .filter(|candidate| mawsil_support::is_similar(&key.short(), &candidate.short()))
            .take(3)
            .collect()
    }

    pub(crate) fn canonical(&self, key: &ServiceKey) -> Result<ServiceKey> {
        self.inner.registry.read().canonical(key)
    }

    pub(crate) fn recipe_for(&self, key: &ServiceKey) -> Option<Arc<TypeRecipe>> {
        self.inner.metadata.recipe_for(key)
    }

    pub(crate) fn method_binding(&self, target: &str) -> Option<MethodBindingFn> {
        self.inner.registry.read().method_binding(target)
    }
}

/// Downcasts a type-erased payload, reporting the key on mismatch.
pub(crate) fn downcast_service<T: Send + Sync + 'static>(
    key: &ServiceKey,
    value: Service,
) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| ContainerError::TypeMismatch {
            key: key.clone(),
            expected: type_name::<T>(),
        })
}

/// A contextual value landing in a variadic slot may itself be a
/// collected `Vec<Service>` payload; flatten it. Anything else fills
/// the slot as a single element.
fn flatten_or_wrap(value: Service) -> Vec<Service> {
    match value.downcast::<Vec<Service>>() {
        Ok(values) => (*values).clone(),
        Err(value) => vec![value],
    }
}

fn wrap_factory<T, F>(factory: F) -> FactoryFn
where
    T: Send + Sync + 'static,
    F: Fn(&mut BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
{
    Arc::new(move |bcx| Ok(Arc::new(factory(bcx)?) as Service))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::invoker::MethodRecipe;
    use crate::recipe::Param;

    struct Counter {
        id: usize,
    }

    fn counter_factory() -> impl Fn(&mut BuildContext<'_>) -> Result<Counter> + Send + Sync {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        move |_| {
            Ok(Counter {
                id: NEXT.fetch_add(1, Ordering::SeqCst),
            })
        }
    }

    #[test]
    fn singleton_resolves_to_the_same_instance() {
        let container = Container::new();
        container.singleton(counter_factory()).unwrap();

        let a = container.make::<Counter>().unwrap();
        let b = container.make::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn transient_resolves_fresh_instances() {
        let container = Container::new();
        container.bind(counter_factory()).unwrap();

        let a = container.make::<Counter>().unwrap();
        let b = container.make::<Counter>().unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn explicit_parameters_bypass_the_singleton_cache() {
        struct Named {
            name: String,
        }

        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<Named>()
                .singleton()
                .needs(Param::value("name").with_default(|| "default".to_string()))
                .constructed_by(|mut args| {
                    Ok(Named {
                        name: args.take_cloned::<String>()?,
                    })
                }),
        );

        let shared = container.make::<Named>().unwrap();
        assert_eq!(shared.name, "default");

        let custom = container
            .make_with::<Named>(Parameters::new().with("name", "custom".to_string()))
            .unwrap();
        assert_eq!(custom.name, "custom");
        assert!(!Arc::ptr_eq(&shared, &custom));

        // The override did not poison the cached instance.
        let again = container.make::<Named>().unwrap();
        assert!(Arc::ptr_eq(&shared, &again));
    }

    trait Transport: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct Smtp;
    impl Transport for Smtp {
        fn name(&self) -> &'static str {
            "smtp"
        }
    }

    struct LogTransport;
    impl Transport for LogTransport {
        fn name(&self) -> &'static str {
            "log"
        }
    }

    struct Mailer {
        transport: Arc<dyn Transport>,
    }

    fn register_mailer_world(container: &Container) {
        container
            .singleton_as::<dyn Transport, Arc<dyn Transport>, _>(|_| {
                Ok(Arc::new(Smtp) as Arc<dyn Transport>)
            })
            .unwrap();
        container.register_recipe(
            TypeRecipe::of::<Mailer>()
                .needs(Param::of::<dyn Transport>("transport"))
                .constructed_by(|mut args| {
                    Ok(Mailer {
                        transport: args.take_cloned::<Arc<dyn Transport>>()?,
                    })
                }),
        );
    }

    #[test]
    fn trait_objects_resolve_through_their_key() {
        let container = Container::new();
        register_mailer_world(&container);

        let transport = container.make_as::<dyn Transport, Arc<dyn Transport>>().unwrap();
        assert_eq!(transport.name(), "smtp");

        let mailer = container.make::<Mailer>().unwrap();
        assert_eq!(mailer.transport.name(), "smtp");
    }

    #[test]
    fn contextual_binding_beats_the_default() {
        let container = Container::new();
        register_mailer_world(&container);

        container
            .when_type::<Mailer>()
            .needs::<dyn Transport>()
            .give_value(Arc::new(Arc::new(LogTransport) as Arc<dyn Transport>) as Service);

        let mailer = container.make::<Mailer>().unwrap();
        assert_eq!(mailer.transport.name(), "log");

        // Other consumers still see the default.
        let transport = container.make_as::<dyn Transport, Arc<dyn Transport>>().unwrap();
        assert_eq!(transport.name(), "smtp");
    }

    #[test]
    fn contextual_resolution_is_never_cached() {
        let container = Container::new();
        register_mailer_world(&container);
        container
            .when_type::<Mailer>()
            .needs::<dyn Transport>()
            .give_factory(Arc::new(|_| {
                Ok(Arc::new(Arc::new(LogTransport) as Arc<dyn Transport>) as Service)
            }));

        container.make::<Mailer>().unwrap();

        // The shared transport binding was not overwritten by the
        // contextual build.
        let transport = container.make_as::<dyn Transport, Arc<dyn Transport>>().unwrap();
        assert_eq!(transport.name(), "smtp");
    }

    #[derive(Debug)]
    struct Ouro;
    #[derive(Debug)]
    struct Boros;

    #[test]
    fn circular_dependencies_are_reported_with_the_chain() {
        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<Ouro>()
                .needs(Param::of::<Boros>("partner"))
                .constructed_by(|mut args| {
                    args.take::<Boros>()?;
                    Ok(Ouro)
                }),
        );
        container.register_recipe(
            TypeRecipe::of::<Boros>()
                .needs(Param::of::<Ouro>("partner"))
                .constructed_by(|mut args| {
                    args.take::<Ouro>()?;
                    Ok(Boros)
                }),
        );

        let err = container.make::<Ouro>().unwrap_err();
        match err {
            ContainerError::CircularDependency(inner) => {
                assert_eq!(inner.chain.len(), 3);
                assert_eq!(inner.chain.first(), inner.chain.last());
            }
            other => panic!("expected CircularDependency, got {other}"),
        }
    }

    #[test]
    fn aliases_resolve_transitively() {
        let container = Container::new();
        container.singleton(counter_factory()).unwrap();
        container
            .alias(ServiceKey::named("ctr"), ServiceKey::of::<Counter>())
            .unwrap();
        container
            .alias(ServiceKey::named("c"), ServiceKey::named("ctr"))
            .unwrap();

        let via_alias = container.make_key("c").unwrap();
        let direct = container.make::<Counter>().unwrap();
        let via_alias = via_alias.downcast::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&via_alias, &direct));
    }

    #[test]
    fn alias_cycles_error_instead_of_hanging() {
        let container = Container::new();
        container
            .alias(ServiceKey::named("a"), ServiceKey::named("b"))
            .unwrap();
        container
            .alias(ServiceKey::named("b"), ServiceKey::named("a"))
            .unwrap();

        let err = container.make_key("a").unwrap_err();
        assert!(matches!(err, ContainerError::AliasCycle { .. }));
    }

    struct Plugin;
    struct Host {
        plugins: Vec<Arc<Plugin>>,
    }

    #[test]
    fn variadic_dependencies_resolve_best_effort() {
        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<Host>()
                .needs(Param::of::<Plugin>("plugins").variadic())
                .constructed_by(|mut args| {
                    Ok(Host {
                        plugins: args.take_variadic::<Plugin>()?,
                    })
                }),
        );

        // Plugin has no binding and no recipe: empty, not an error.
        let host = container.make::<Host>().unwrap();
        assert!(host.plugins.is_empty());

        container.bind(|_| Ok(Plugin)).unwrap();
        let host = container.make::<Host>().unwrap();
        assert_eq!(host.plugins.len(), 1);
    }

    #[test]
    fn non_variadic_missing_dependency_propagates() {
        #[derive(Debug)]
        struct Needy;

        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<Needy>()
                .needs(Param::of::<Plugin>("plugin"))
                .constructed_by(|mut args| {
                    args.take::<Plugin>()?;
                    Ok(Needy)
                }),
        );

        let err = container.make::<Needy>().unwrap_err();
        assert!(matches!(err, ContainerError::NotInstantiable(_)));
    }

    #[test]
    fn class_defaults_apply_when_the_dependency_is_unresolvable() {
        struct Fallback {
            plugin: Arc<Plugin>,
        }

        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<Fallback>()
                .needs(Param::of::<Plugin>("plugin").with_default(|| Arc::new(Plugin)))
                .constructed_by(|mut args| {
                    Ok(Fallback {
                        plugin: args.take_cloned::<Arc<Plugin>>()?,
                    })
                }),
        );

        let value = container.make::<Fallback>().unwrap();
        let _ = &value.plugin;
    }

    #[test]
    fn class_defaults_beat_recipe_auto_construction_for_unbound_types() {
        struct Backend {
            from_default: bool,
        }
        struct Owner {
            backend: Arc<Backend>,
        }

        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<Backend>()
                .constructed_by(|_| Ok(Backend { from_default: false })),
        );
        container.register_recipe(
            TypeRecipe::of::<Owner>()
                .needs(
                    Param::of::<Backend>("backend")
                        .with_default(|| Backend { from_default: true }),
                )
                .constructed_by(|mut args| {
                    Ok(Owner {
                        backend: args.take::<Backend>()?,
                    })
                }),
        );

        // Unbound: the declared default wins even though the recipe
        // could construct a Backend.
        let owner = container.make::<Owner>().unwrap();
        assert!(owner.backend.from_default);

        // An explicit binding reclaims precedence over the default.
        container
            .bind(|_| Ok(Backend { from_default: false }))
            .unwrap();
        let owner = container.make::<Owner>().unwrap();
        assert!(!owner.backend.from_default);
    }

    #[test]
    fn nullable_class_dependencies_resolve_to_none() {
        struct Optionalist {
            plugin: Option<Arc<Plugin>>,
        }

        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<Optionalist>()
                .needs(Param::of::<Plugin>("plugin").nullable())
                .constructed_by(|mut args| {
                    Ok(Optionalist {
                        plugin: args.take_opt::<Plugin>()?,
                    })
                }),
        );

        let value = container.make::<Optionalist>().unwrap();
        assert!(value.plugin.is_none());
    }

    #[test]
    fn primitive_parameters_need_a_source() {
        #[derive(Debug)]
        struct NeedsName;

        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<NeedsName>()
                .needs(Param::value("name"))
                .constructed_by(|mut args| {
                    args.take_cloned::<String>()?;
                    Ok(NeedsName)
                }),
        );

        let err = container.make::<NeedsName>().unwrap_err();
        assert!(matches!(err, ContainerError::UnresolvedPrimitive(_)));

        let params = Parameters::new().with("name", "x".to_string());
        assert!(container.make_with::<NeedsName>(params).is_ok());
    }

    #[test]
    fn primitive_contextual_values_fill_parameters() {
        struct Configured {
            limit: i64,
        }

        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<Configured>()
                .needs(Param::value("limit"))
                .constructed_by(|mut args| {
                    Ok(Configured {
                        limit: args.take_cloned::<i64>()?,
                    })
                }),
        );
        container
            .when_type::<Configured>()
            .needs_value("limit")
            .give_value(Arc::new(25i64) as Service);

        let value = container.make::<Configured>().unwrap();
        assert_eq!(value.limit, 25);
    }

    #[test]
    fn rebinding_fires_after_a_resolved_key_is_rebound() {
        let container = Container::new();
        let seen = Arc::new(AtomicUsize::new(0));

        container.singleton(counter_factory()).unwrap();
        {
            let seen = seen.clone();
            container.rebinding(ServiceKey::of::<Counter>(), move |_c, _v| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Not resolved yet: rebinding is silent.
        container.singleton(counter_factory()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        container.make::<Counter>().unwrap();
        container.singleton(counter_factory()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn extenders_decorate_resolutions_in_order() {
        let container = Container::new();
        container.singleton(|_| Ok(String::from("base"))).unwrap();
        container
            .extend::<String, _>(|value, _c| Ok(Arc::new(format!("{value}+one"))))
            .unwrap();
        container
            .extend::<String, _>(|value, _c| Ok(Arc::new(format!("{value}+two"))))
            .unwrap();

        let value = container.make::<String>().unwrap();
        assert_eq!(*value, "base+one+two");
    }

    #[test]
    fn extending_an_existing_instance_replaces_it() {
        let container = Container::new();
        container.instance(String::from("base")).unwrap();
        container
            .extend::<String, _>(|value, _c| Ok(Arc::new(format!("{value}!"))))
            .unwrap();

        let value = container.make::<String>().unwrap();
        assert_eq!(*value, "base!");
    }

    #[test]
    fn scoped_instances_reset_at_scope_boundaries() {
        let container = Container::new();
        container.scoped(counter_factory()).unwrap();

        let a = container.make::<Counter>().unwrap();
        let b = container.make::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        container.forget_scoped_instances();
        let c = container.make::<Counter>().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn callbacks_fire_in_before_resolving_after_order() {
        let container = Container::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let key = ServiceKey::of::<Counter>();
        {
            let log = log.clone();
            container.before_resolving(key.clone(), move |_k, _p, _c| {
                log.lock().unwrap().push("before");
            });
        }
        {
            let log = log.clone();
            container.resolving(key.clone(), move |_v, _c| {
                log.lock().unwrap().push("resolving");
            });
        }
        {
            let log = log.clone();
            container.after_resolving(key.clone(), move |_v, _c| {
                log.lock().unwrap().push("after");
            });
        }

        container.bind(counter_factory()).unwrap();
        container.make::<Counter>().unwrap();
        assert_eq!(*log.lock().unwrap(), ["before", "resolving", "after"]);
    }

    #[test]
    fn shared_cache_hits_skip_resolving_callbacks() {
        let container = Container::new();
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            container.resolving(ServiceKey::of::<Counter>(), move |_v, _c| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        container.singleton(counter_factory()).unwrap();
        container.make::<Counter>().unwrap();
        container.make::<Counter>().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn get_reports_not_found_with_suggestions() {
        let container = Container::new();
        container
            .bind_key(
                ServiceKey::named("database"),
                Arc::new(|_| Ok(Arc::new(1i32) as Service)),
                Lifetime::Transient,
            )
            .unwrap();

        let err = container.get_key(ServiceKey::named("databse")).unwrap_err();
        match err {
            ContainerError::NotFound(inner) => {
                assert_eq!(inner.suggestions, vec![ServiceKey::named("database")]);
            }
            other => panic!("expected NotFound, got {other}"),
        }

        // Bound keys whose factories fail keep the original error.
        container
            .bind_key(
                ServiceKey::named("broken"),
                Arc::new(|_| {
                    Err(ContainerError::construction(
                        ServiceKey::named("broken"),
                        "boom",
                    ))
                }),
                Lifetime::Transient,
            )
            .unwrap();
        let err = container.get_key(ServiceKey::named("broken")).unwrap_err();
        assert!(matches!(err, ContainerError::ConstructionFailed { .. }));
    }

    #[test]
    fn tagged_services_reflect_later_registrations() {
        let container = Container::new();
        container
            .bind_key(
                ServiceKey::named("r1"),
                Arc::new(|_| Ok(Arc::new(1i32) as Service)),
                Lifetime::Transient,
            )
            .unwrap();
        container.tag(&[ServiceKey::named("r1")], "reports");

        let reports = container.tagged("reports");
        assert_eq!(reports.values().unwrap().len(), 1);

        container
            .bind_key(
                ServiceKey::named("r2"),
                Arc::new(|_| Ok(Arc::new(2i32) as Service)),
                Lifetime::Transient,
            )
            .unwrap();
        container.tag(&[ServiceKey::named("r2")], "reports");

        // The same view picks up the new member on its next pass.
        let values = reports.resolve::<i32>().unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn flush_forgets_bindings_but_keeps_callbacks() {
        let container = Container::new();
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            container.resolving_any(move |_v, _c| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        container.singleton(counter_factory()).unwrap();
        container.make::<Counter>().unwrap();
        assert!(container.has::<Counter>());

        container.flush();
        assert!(!container.has::<Counter>());
        assert!(!container.resolved(&ServiceKey::of::<Counter>()));

        container.bind(counter_factory()).unwrap();
        container.make::<Counter>().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn is_shared_tracks_lifetimes_and_instances() {
        let container = Container::new();
        container.singleton(counter_factory()).unwrap();
        assert!(container.is_shared(&ServiceKey::of::<Counter>()));

        container.bind(counter_factory()).unwrap();
        assert!(!container.is_shared(&ServiceKey::of::<Counter>()));

        container.instance(String::from("x")).unwrap();
        assert!(container.is_shared(&ServiceKey::of::<String>()));
    }

    #[test]
    fn factories_are_reusable_and_late_bound() {
        let container = Container::new();
        let make_counter = container.factory::<Counter>();

        container.singleton(counter_factory()).unwrap();
        let a = make_counter().unwrap();
        let b = make_counter().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    struct EnvService;
    struct ProdBackend;
    struct DevBackend;

    #[test]
    fn environment_scoped_auto_binding_consults_the_predicate() {
        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<EnvService>()
                .binds_to_in(ServiceKey::of::<ProdBackend>(), &["production"])
                .binds_to(ServiceKey::of::<DevBackend>())
                .not_instantiable(),
        );
        container.register_recipe(
            TypeRecipe::of::<ProdBackend>().constructed_by(|_| Ok(ProdBackend)),
        );
        container.register_recipe(
            TypeRecipe::of::<DevBackend>().constructed_by(|_| Ok(DevBackend)),
        );
        container.resolve_environment_using(|envs| envs.iter().any(|e| e == "production"));

        let value = container.make_key(ServiceKey::of::<EnvService>()).unwrap();
        assert!(value.downcast::<ProdBackend>().is_ok());
    }

    #[test]
    fn wildcard_auto_binding_applies_without_a_predicate() {
        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<EnvService>()
                .binds_to_in(ServiceKey::of::<ProdBackend>(), &["production"])
                .binds_to(ServiceKey::of::<DevBackend>())
                .not_instantiable(),
        );
        container.register_recipe(
            TypeRecipe::of::<DevBackend>().constructed_by(|_| Ok(DevBackend)),
        );

        let value = container.make_key(ServiceKey::of::<EnvService>()).unwrap();
        assert!(value.downcast::<DevBackend>().is_ok());
    }

    #[derive(Debug)]
    struct FromSettings {
        url: String,
    }

    struct Setting {
        name: &'static str,
    }

    #[test]
    fn attribute_resolvers_supply_parameter_values() {
        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<FromSettings>()
                .needs(Param::value("url").with_attribute(Setting { name: "db.url" }))
                .constructed_by(|mut args| {
                    Ok(FromSettings {
                        url: args.take_cloned::<String>()?,
                    })
                }),
        );

        // Without a resolver the attribute is an error.
        let err = container.make::<FromSettings>().unwrap_err();
        assert!(matches!(err, ContainerError::MissingAttributeResolver { .. }));

        container.register_attribute_resolver::<Setting, _>(|setting, _c| {
            Ok(Arc::new(format!("value-of-{}", setting.name)) as Service)
        });
        let value = container.make::<FromSettings>().unwrap();
        assert_eq!(value.url, "value-of-db.url");
    }

    #[test]
    fn attribute_callbacks_observe_resolved_values() {
        struct Audited;

        let container = Container::new();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            container.after_resolving_attribute::<Audited, _>(move |_a, _v, _c| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }

        struct Audit {
            value: i64,
        }
        container.register_recipe(
            TypeRecipe::of::<Audit>()
                .needs(
                    Param::value("value")
                        .with_default(|| 7i64)
                        .with_metadata(Audited),
                )
                .constructed_by(|mut args| {
                    Ok(Audit {
                        value: args.take_cloned::<i64>()?,
                    })
                }),
        );

        let value = container.make::<Audit>().unwrap();
        assert_eq!(value.value, 7);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    struct SelfMade {
        tag: &'static str,
    }

    #[test]
    fn self_constructing_recipes_use_their_named_constructor() {
        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<SelfMade>()
                .self_constructing(MethodRecipe::function("create").returning(|_args| {
                    Ok(SelfMade { tag: "via-create" })
                }))
                .not_instantiable(),
        );

        let value = container.make::<SelfMade>().unwrap();
        assert_eq!(value.tag, "via-create");
    }

    #[test]
    fn build_key_bypasses_bindings_and_cache() {
        let container = Container::new();
        container.register_recipe(TypeRecipe::of::<Plugin>().constructed_by(|_| Ok(Plugin)));
        container.instance(Plugin).unwrap();

        let cached = container.make::<Plugin>().unwrap();
        let built = container.build_key(ServiceKey::of::<Plugin>()).unwrap();
        let built = built.downcast::<Plugin>().unwrap();
        assert!(!Arc::ptr_eq(&cached, &built));
    }

    #[test]
    fn nested_factories_share_one_build_stack() {
        #[derive(Debug)]
        struct Outer;
        struct Middle;

        let container = Container::new();
        container.register_recipe(
            TypeRecipe::of::<Outer>()
                .needs(Param::of::<Middle>("middle"))
                .constructed_by(|mut args| {
                    args.take::<Middle>()?;
                    Ok(Outer)
                }),
        );
        container
            .bind(|bcx: &mut BuildContext<'_>| {
                // Resolving Outer from inside Middle's factory closes a
                // cycle that spans a factory frame.
                bcx.make::<Outer>()?;
                Ok(Middle)
            })
            .unwrap();

        let err = container.make::<Outer>().unwrap_err();
        assert!(matches!(err, ContainerError::CircularDependency(_)));
    }

    trait AppLogger: Send + Sync {
        fn id(&self) -> usize;
    }

    struct StdoutLogger {
        id: usize,
    }

    impl AppLogger for StdoutLogger {
        fn id(&self) -> usize {
            self.id
        }
    }

    struct AppService {
        logger: Arc<dyn AppLogger>,
        name: String,
    }

    #[test]
    fn a_full_graph_resolves_with_shared_logger_and_defaults() {
        let container = Container::new();
        container
            .singleton_as::<dyn AppLogger, Arc<dyn AppLogger>, _>(|_| {
                static NEXT: AtomicUsize = AtomicUsize::new(0);
                Ok(Arc::new(StdoutLogger {
                    id: NEXT.fetch_add(1, Ordering::SeqCst),
                }) as Arc<dyn AppLogger>)
            })
            .unwrap();
        container.register_recipe(
            TypeRecipe::of::<AppService>()
                .needs(Param::of::<dyn AppLogger>("logger"))
                .needs(Param::value("name").with_default(|| "default".to_string()))
                .constructed_by(|mut args| {
                    Ok(AppService {
                        logger: args.take_cloned::<Arc<dyn AppLogger>>()?,
                        name: args.take_cloned::<String>()?,
                    })
                }),
        );

        let a = container.make::<AppService>().unwrap();
        let b = container.make::<AppService>().unwrap();
        assert_eq!(a.name, "default");
        assert_eq!(a.logger.id(), b.logger.id());

        let named = container
            .make_with::<AppService>(Parameters::new().with("name", "custom".to_string()))
            .unwrap();
        assert_eq!(named.name, "custom");
        assert_eq!(named.logger.id(), a.logger.id());
    }

    #[test]
    fn bind_if_respects_existing_registrations() {
        let container = Container::new();
        container.singleton(counter_factory()).unwrap();
        let first = container.make::<Counter>().unwrap();

        container.bind_if(counter_factory()).unwrap();
        let second = container.make::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
