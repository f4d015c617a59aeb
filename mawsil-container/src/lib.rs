//! A runtime service container: bindings, contextual resolution, and
//! lifecycles.
//!
//! The container maps [`ServiceKey`]s to construction strategies and
//! resolves dependency graphs on demand. Types register a [`TypeRecipe`]
//! (explicitly or at link time through [`inventory::submit!`]) describing
//! their constructor parameters; the engine walks the graph, honoring
//! contextual bindings, explicit parameter overrides, lifetimes, and the
//! resolution callback surface.
//!
//! ```rust
//! use mawsil_container::prelude::*;
//!
//! struct Clock;
//!
//! let container = Container::new();
//! container.singleton(|_| Ok(Clock)).unwrap();
//!
//! let a = container.make::<Clock>().unwrap();
//! let b = container.make::<Clock>().unwrap();
//! assert!(std::sync::Arc::ptr_eq(&a, &b));
//! ```

pub mod callbacks;
pub mod container;
pub mod context;
pub mod contextual;
pub mod error;
pub mod invoker;
pub mod key;
pub mod lifetime;
pub mod recipe;
pub mod registry;
pub mod tagged;

pub use callbacks::{
    AttributeCallbackFn, AttributeResolverFn, BeforeResolvingFn, ReboundFn, ResolvingFn,
};
pub use container::{BuildContext, Container, EnvPredicateFn};
pub use context::Parameters;
pub use contextual::{ConfigRepository, ContextualBindingBuilder};
pub use error::{ContainerError, Result};
pub use invoker::{InvokeFn, MethodRecipe, MethodRecipeBuilder};
pub use key::ServiceKey;
pub use lifetime::Lifetime;
pub use recipe::{
    ArgumentList, AttributeRef, ConstructorFn, Param, RecipeSubmission, Service, TypeMetadata,
    TypeRecipe, TypeRecipeBuilder,
};
pub use registry::{ExtenderFn, FactoryFn, MethodBindingFn};
pub use tagged::{TagCountFn, TagProducerFn, TaggedServices};

/// The things you need in scope for everyday container use.
pub mod prelude {
    pub use crate::container::{BuildContext, Container};
    pub use crate::context::Parameters;
    pub use crate::error::{ContainerError, Result};
    pub use crate::invoker::MethodRecipe;
    pub use crate::key::ServiceKey;
    pub use crate::lifetime::Lifetime;
    pub use crate::recipe::{ArgumentList, Param, RecipeSubmission, Service, TypeRecipe};
    pub use crate::tagged::TaggedServices;
}
