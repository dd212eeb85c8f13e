//! CLI command implementations.

pub mod build;
pub mod clean;
pub mod plan;
