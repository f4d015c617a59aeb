//! Lazy iteration over a tag's bound services.
//!
//! [`TaggedServices`] wraps a producer closure plus a count source. The
//! producer is re-invoked on every pass, so iteration always reflects the
//! registry's current state — a tag member re-bound between passes is
//! picked up without re-registering the tag.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{ContainerError, Result};
use crate::recipe::Service;

/// Produces the tag's resolved members, fresh on every call.
pub type TagProducerFn = Arc<dyn Fn() -> Result<Vec<Service>> + Send + Sync>;

/// Counts the tag's members without resolving them.
pub type TagCountFn = Arc<dyn Fn() -> usize + Send + Sync>;

enum CountSource {
    Fixed(usize),
    Deferred(TagCountFn),
}

/// The deferred, rewindable view over one tag's services.
pub struct TaggedServices {
    producer: TagProducerFn,
    count: CountSource,
    cached_len: OnceCell<usize>,
}

impl TaggedServices {
    pub(crate) fn new(producer: TagProducerFn, count: TagCountFn) -> Self {
        Self {
            producer,
            count: CountSource::Deferred(count),
            cached_len: OnceCell::new(),
        }
    }

    pub(crate) fn fixed(producer: TagProducerFn, count: usize) -> Self {
        Self {
            producer,
            count: CountSource::Fixed(count),
            cached_len: OnceCell::new(),
        }
    }

    /// Resolves every member of the tag. Each call re-invokes the
    /// producer, so bindings changed since the last pass are honored.
    pub fn values(&self) -> Result<Vec<Service>> {
        (self.producer)()
    }

    /// Resolves every member and downcasts to the expected payload type.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        self.values()?
            .into_iter()
            .map(|v| {
                v.downcast::<T>()
                    .map_err(|_| ContainerError::ArgumentMismatch {
                        expected: std::any::type_name::<T>(),
                    })
            })
            .collect()
    }

    /// Number of bound members. The count source is consulted once and
    /// memoized.
    pub fn len(&self) -> usize {
        *self.cached_len.get_or_init(|| match &self.count {
            CountSource::Fixed(n) => *n,
            CountSource::Deferred(f) => f(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
