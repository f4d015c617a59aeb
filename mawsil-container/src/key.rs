//! Service identification keys.
//!
//! [`ServiceKey`] is the abstract identifier consumers depend on: a type
//! name, a trait-object payload name, or a symbolic name like `"db"`.
//! All registry lookups compare keys by exact string equality after alias
//! canonicalization.

use std::any::type_name;
use std::borrow::Cow;
use std::fmt;

use mawsil_support::rendering::short_type_name;

/// Uniquely identifies a service in the container.
///
/// Typed entry points derive their key from the payload type via
/// [`ServiceKey::of`]; symbolic bindings use [`ServiceKey::named`].
///
/// # Examples
/// ```
/// use mawsil_container::key::ServiceKey;
///
/// let typed = ServiceKey::of::<String>();
/// assert_eq!(typed.as_str(), "alloc::string::String");
///
/// let symbolic = ServiceKey::named("db");
/// assert_eq!(symbolic.as_str(), "db");
/// assert_ne!(typed, symbolic);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey(Cow<'static, str>);

impl ServiceKey {
    /// Creates the canonical key for payload type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(Cow::Borrowed(type_name::<T>()))
    }

    /// Creates a symbolic key.
    ///
    /// Symbolic keys let multiple bindings of the same payload type
    /// coexist, and back alias names like `"db"`.
    #[inline]
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The key used for primitive parameter overrides: `"$name"`.
    ///
    /// Contextual bindings may target a constructor parameter by name
    /// rather than by its type.
    pub fn parameter(name: &str) -> Self {
        Self(Cow::Owned(format!("${name}")))
    }

    /// Returns the raw key string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form for error messages.
    pub fn short(&self) -> String {
        short_type_name(&self.0)
    }
}

impl From<&'static str> for ServiceKey {
    fn from(name: &'static str) -> Self {
        Self::named(name)
    }
}

impl From<String> for ServiceKey {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKey({})", self.0)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
