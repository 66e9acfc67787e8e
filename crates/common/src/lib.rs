//! Achievo Common Library
//!
//! Shared code for the Achievo student-achievement service:
//! - Database models, stores and migrations
//! - Achievement workflow and verification state machine
//! - Notifications and statistics
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability

pub mod accounts;
pub mod achievements;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod notifications;
pub mod statistics;
pub mod store;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
