//! Per-resolution state: the build stack and the parameter-override stack.
//!
//! Both stacks are scoped strictly to one top-level `make`/`call`
//! invocation and all of its recursive sub-resolutions. They live in a
//! [`ResolutionContext`] value threaded by `&mut` through the engine, so
//! two logical tasks sharing one container can never observe each other's
//! frames. Nothing here is stored on the container itself.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::key::ServiceKey;
use crate::recipe::Service;

/// One frame of explicit parameter overrides, keyed by parameter name.
///
/// Entries are consumed on use: once a constructor parameter has been
/// filled from an override, the entry is removed so it cannot leak into
/// a later parameter of the same name. Insertion order is preserved —
/// leftover entries are merged positionally by the callable invoker.
///
/// # Examples
/// ```
/// use mawsil_container::context::Parameters;
///
/// let mut params = Parameters::new().with("name", "custom".to_string());
/// assert!(params.has("name"));
/// assert!(params.take("name").is_some());
/// assert!(params.take("name").is_none());
/// ```
#[derive(Clone, Default)]
pub struct Parameters {
    entries: Vec<(Cow<'static, str>, Service)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named override, erasing the value.
    pub fn with<T: Send + Sync + 'static>(
        mut self,
        name: impl Into<Cow<'static, str>>,
        value: T,
    ) -> Self {
        self.entries
            .push((name.into(), std::sync::Arc::new(value) as Service));
        self
    }

    /// Adds an already-erased override.
    pub fn with_service(mut self, name: impl Into<Cow<'static, str>>, value: Service) -> Self {
        self.entries.push((name.into(), value));
        self
    }

    /// Removes and returns the override for `name`, if present.
    pub fn take(&mut self, name: &str) -> Option<Service> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drains the remaining entries in insertion order.
    pub(crate) fn drain_entries(&mut self) -> impl Iterator<Item = (Cow<'static, str>, Service)> {
        std::mem::take(&mut self.entries).into_iter()
    }
}

/// Identity source for closure build-stack markers. Two different
/// factories must never collide in the stack.
static OPAQUE_IDS: AtomicU64 = AtomicU64::new(0);

/// One entry of the build stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BuildFrame {
    /// A concrete type under construction. Used for cycle detection and
    /// as the consumer in contextual-binding lookups.
    Type(ServiceKey),
    /// A factory closure under invocation, identity-keyed.
    Opaque(u64),
}

/// The transient state of one top-level resolution request.
#[derive(Default)]
pub(crate) struct ResolutionContext {
    build_stack: Vec<BuildFrame>,
    overrides: Vec<Parameters>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The consumer for contextual-binding lookups: the concrete type on
    /// top of the build stack, if the top frame is a type at all.
    pub fn consumer(&self) -> Option<&ServiceKey> {
        match self.build_stack.last() {
            Some(BuildFrame::Type(key)) => Some(key),
            _ => None,
        }
    }

    pub fn contains_type(&self, key: &ServiceKey) -> bool {
        self.build_stack
            .iter()
            .any(|f| matches!(f, BuildFrame::Type(k) if k == key))
    }

    /// Snapshot of the concrete types currently under construction,
    /// oldest first. Used in error messages and cycle chains.
    pub fn type_chain(&self) -> Vec<ServiceKey> {
        self.build_stack
            .iter()
            .filter_map(|f| match f {
                BuildFrame::Type(k) => Some(k.clone()),
                BuildFrame::Opaque(_) => None,
            })
            .collect()
    }

    pub fn push_type(&mut self, key: ServiceKey) {
        self.build_stack.push(BuildFrame::Type(key));
    }

    pub fn push_opaque(&mut self) {
        let id = OPAQUE_IDS.fetch_add(1, Ordering::Relaxed);
        self.build_stack.push(BuildFrame::Opaque(id));
    }

    pub fn pop_frame(&mut self) {
        self.build_stack.pop();
    }

    pub fn push_overrides(&mut self, params: Parameters) {
        self.overrides.push(params);
    }

    pub fn pop_overrides(&mut self) {
        self.overrides.pop();
    }

    /// Dependency resolution consults only the top frame.
    pub fn last_overrides(&self) -> Option<&Parameters> {
        self.overrides.last()
    }

    pub fn last_overrides_mut(&mut self) -> Option<&mut Parameters> {
        self.overrides.last_mut()
    }
}
