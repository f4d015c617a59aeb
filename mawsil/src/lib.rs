//! # Mawsil — a runtime service container for Rust
//!
//! Bindings, contextual resolution, and lifecycles in the spirit of
//! Laravel's container, expressed through type recipes instead of
//! runtime reflection.

pub use mawsil_container::*;
pub use mawsil_support::*;
