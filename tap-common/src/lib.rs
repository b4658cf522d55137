//! TAP Common - Shared configuration, errors and logging for the TAP services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    Config, CorsConfig, MarketConfig, NetworkConfig, NewsConfig, ObservabilityConfig,
    RankingConfig, ScheduleConfig,
};
pub use error::Error;
pub use validation::{Validate, ValidationError, ValidationResult};
