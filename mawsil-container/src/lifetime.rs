//! Service lifetimes.
//!
//! A lifetime determines how long a resolved service is kept:
//! - [`Lifetime::Singleton`] — one instance for the process
//! - [`Lifetime::Scoped`] — one instance per logical unit of work,
//!   cleared by [`forget_scoped_instances`](crate::container::Container::forget_scoped_instances)
//! - [`Lifetime::Transient`] — new instance on every resolution

use std::fmt;

/// Defines how long a resolved service lives within the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// One instance shared for the life of the process.
    ///
    /// Created on first resolution, kept until the container is flushed
    /// or the instance is explicitly forgotten.
    Singleton,

    /// Shared like a singleton, but cleared at scope boundaries
    /// (e.g. between requests) by `forget_scoped_instances`.
    Scoped,

    /// Never cached. Each resolution produces a fresh instance.
    Transient,
}

impl Lifetime {
    /// Returns `true` if this lifetime caches resolved instances.
    #[inline]
    pub fn is_cached(&self) -> bool {
        matches!(self, Lifetime::Singleton | Lifetime::Scoped)
    }

    /// Returns `true` if instances are dropped at scope boundaries.
    #[inline]
    pub fn is_scoped(&self) -> bool {
        matches!(self, Lifetime::Scoped)
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Singleton => write!(f, "Singleton"),
            Lifetime::Scoped => write!(f, "Scoped"),
            Lifetime::Transient => write!(f, "Transient"),
        }
    }
}
