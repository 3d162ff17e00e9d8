//! Infrastructure layer
//!
//! Implementations for external dependencies: configuration loading,
//! outbound HTTP (client policy, auth, signing), and logging setup.

pub mod config;
pub mod http;
pub mod logging;
