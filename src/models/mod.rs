//! Data models shared by the backends.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{DatabaseType, mask_credentials};
pub use query::QueryParam;
