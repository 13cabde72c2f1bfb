//! Shared types, errors, and configuration for Tally.
//!
//! This crate provides common types used across all other crates:
//! - Currency codes and minor-unit rounding
//! - Typed IDs for type-safe entity references
//! - Pagination types for repository queries
//! - Application-wide error types
//! - Configuration management (tolerances, thresholds, GL accounts)

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
