//! Shared helpers for the mawsil service container.

pub mod rendering;

pub use rendering::{is_similar, join_chain, short_type_name};
