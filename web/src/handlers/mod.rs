//! HTTP request handlers shared by box office services.

pub mod health;

// Re-export common handler utilities
pub use health::{health_check, readiness, ComponentHealth};
