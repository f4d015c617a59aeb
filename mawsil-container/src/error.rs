//! Error types for container operations.
//!
//! Every failure carries enough context to diagnose which dependency
//! edge broke: the parameter name and its declaring type, or the full
//! build stack at the moment of failure.

use std::fmt;

use mawsil_support::rendering::join_chain;

use crate::key::ServiceKey;

/// Main error type for all container operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Target has no binding, no recipe, or a recipe with no constructor.
    #[error("{}", .0)]
    NotInstantiable(NotInstantiableError),

    /// A primitive (non-service) constructor parameter could not be filled.
    #[error("{}", .0)]
    UnresolvedPrimitive(UnresolvedPrimitiveError),

    /// The concrete type being built already appears in the build stack.
    #[error("{}", .0)]
    CircularDependency(CircularDependencyError),

    /// Raised only from the `get` entry points, only for ids that were
    /// never bound or resolvable at all.
    #[error("{}", .0)]
    NotFound(NotFoundError),

    /// A resolved value did not downcast to the requested payload type.
    #[error("Resolved [{key}] but the payload is not a `{expected}`")]
    TypeMismatch {
        key: ServiceKey,
        expected: &'static str,
    },

    /// A parameter carries a contextual attribute with no registered
    /// resolver strategy.
    #[error(
        "No resolver registered for attribute [{attribute}] on parameter [{parameter}] of [{declared_by}]"
    )]
    MissingAttributeResolver {
        attribute: &'static str,
        parameter: &'static str,
        declared_by: ServiceKey,
    },

    /// Alias chain revisited a key during canonicalization.
    #[error("Alias chain loops: {}", join_chain(&.chain.iter().map(|k| k.short()).collect::<Vec<_>>()))]
    AliasCycle { chain: Vec<ServiceKey> },

    /// An alias was registered pointing at itself.
    #[error("[{key}] is aliased to itself")]
    SelfAlias { key: ServiceKey },

    /// `call` target had no method binding, recipe method, or default method.
    #[error("Method not found for call target [{target}]")]
    UnknownMethod { target: String },

    /// A factory or extender failed while producing an instance.
    #[error("Failed to construct [{key}]: {source}")]
    ConstructionFailed {
        key: ServiceKey,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A recipe constructor consumed its argument list in the wrong shape.
    #[error("Constructor argument mismatch: expected `{expected}`")]
    ArgumentMismatch { expected: &'static str },

    /// `give_config` found neither the config key nor a default.
    #[error("Config key [{key}] is not set and no default was given")]
    MissingConfig { key: String },
}

impl ContainerError {
    /// Wraps an arbitrary factory failure.
    pub fn construction(
        key: ServiceKey,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ConstructionFailed {
            key,
            source: source.into(),
        }
    }

    /// `true` for "could not produce an instance" failures.
    ///
    /// The `get` entry points convert these into [`ContainerError::NotFound`]
    /// for unbound ids; circular dependencies and not-found errors pass
    /// through unchanged.
    pub fn is_resolution_failure(&self) -> bool {
        !matches!(
            self,
            ContainerError::CircularDependency(_) | ContainerError::NotFound(_)
        )
    }
}

/// Error when a target cannot be instantiated.
///
/// Includes the build stack so you can see which consumer chain led here.
#[derive(Debug)]
pub struct NotInstantiableError {
    /// The key that could not be built.
    pub target: ServiceKey,
    /// Concrete types under construction when the failure occurred.
    pub build_stack: Vec<ServiceKey>,
}

impl fmt::Display for NotInstantiableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target [{}] is not instantiable", self.target)?;

        if !self.build_stack.is_empty() {
            let stack: Vec<String> = self.build_stack.iter().map(|k| k.short()).collect();
            write!(f, " while building [{}]", stack.join(", "))?;
        }

        write!(
            f,
            ".\n  Hint: bind [{}] or register a recipe for it",
            self.target.short()
        )
    }
}

/// Error when a primitive parameter has no override, contextual value,
/// or default.
#[derive(Debug)]
pub struct UnresolvedPrimitiveError {
    /// Name of the parameter that could not be filled.
    pub parameter: &'static str,
    /// The type declaring the parameter.
    pub declared_by: ServiceKey,
}

impl fmt::Display for UnresolvedPrimitiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unresolvable dependency: parameter [{}] in [{}]",
            self.parameter, self.declared_by
        )?;
        write!(
            f,
            "\n  Hint: pass it explicitly, give it a default, or bind [${}] contextually",
            self.parameter
        )
    }
}

/// Error when a circular dependency is detected during a build.
///
/// Shows the full chain so you can see WHERE the cycle closes.
#[derive(Debug)]
pub struct CircularDependencyError {
    /// The chain of concrete types that forms the cycle,
    /// e.g. `["A", "B", "C", "A"]`.
    pub chain: Vec<ServiceKey>,
}

impl fmt::Display for CircularDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain: Vec<String> = self.chain.iter().map(|k| k.short()).collect();
        write!(f, "Circular dependency detected:\n  {}", join_chain(&chain))?;
        write!(
            f,
            "\n  Hint: break the cycle with a deferred resolver or restructure the types"
        )
    }
}

/// Error when `get` is asked for an id that was never bound.
#[derive(Debug)]
pub struct NotFoundError {
    /// The id that was requested.
    pub key: ServiceKey,
    /// Registered keys with similar names, for "did you mean?" output.
    pub suggestions: Vec<ServiceKey>,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service not found: {}", self.key)?;

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        Ok(())
    }
}

/// Convenient Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
