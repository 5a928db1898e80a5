//! Orbservability Common Library
//!
//! Shared configuration, error types, and gRPC definitions for the observer.

pub mod config;
pub mod error;
pub mod proto;

// Re-export commonly used types
pub use config::ObserverConfig;
pub use error::{ObserverError, Result};
