//! Configuration validation for TAP services.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use std::str::FromStr;
use thiserror::Error;

use crate::config::{
    Config, CorsConfig, MarketConfig, NetworkConfig, NewsConfig, ObservabilityConfig,
    RankingConfig, ScheduleConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn positive(field: &str, value: u64) -> ValidationResult<()> {
    if value == 0 {
        return Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: "must be greater than 0".into(),
        });
    }
    Ok(())
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 7] = [
            &self.network,
            &self.observability,
            &self.market,
            &self.news,
            &self.ranking,
            &self.schedule,
            &self.cors,
        ];

        let mut errors: Vec<ValidationError> = sections
            .iter()
            .filter_map(|section| section.validate().err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for NetworkConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "network.port".into(),
            });
        }
        if self.bind.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "network.bind".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for MarketConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "market.base_url".into(),
            });
        }
        positive("market.request_timeout_secs", self.request_timeout_secs)?;
        positive("market.rate_limit_rpm", u64::from(self.rate_limit_rpm))?;
        positive("market.fetch_concurrency", self.fetch_concurrency as u64)?;

        if chrono_tz::Tz::from_str(&self.timezone).is_err() {
            return Err(ValidationError::InvalidValue {
                field: "market.timezone".into(),
                reason: format!("unknown timezone: {}", self.timezone),
            });
        }

        let code = &self.reference_instrument;
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidValue {
                field: "market.reference_instrument".into(),
                reason: format!("not a six-character instrument code: {code}"),
            });
        }

        Ok(())
    }
}

impl Validate for NewsConfig {
    fn validate(&self) -> ValidationResult<()> {
        positive("news.primary_timeout_secs", self.primary_timeout_secs)?;
        positive("news.secondary_timeout_secs", self.secondary_timeout_secs)?;

        if self.google_endpoint.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "news.google_endpoint".into(),
            });
        }

        Ok(())
    }
}

impl Validate for RankingConfig {
    fn validate(&self) -> ValidationResult<()> {
        positive("ranking.theme_limit", self.theme_limit as u64)?;
        positive("ranking.stock_limit", self.stock_limit as u64)?;
        positive("ranking.etf_limit", self.etf_limit as u64)?;
        positive("ranking.news_limit", self.news_limit as u64)?;

        if !self.surge_threshold_pct.is_finite() {
            return Err(ValidationError::InvalidValue {
                field: "ranking.surge_threshold_pct".into(),
                reason: "must be a finite number".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ScheduleConfig {
    fn validate(&self) -> ValidationResult<()> {
        positive("schedule.tick_secs", self.tick_secs)?;
        positive("schedule.theme_limit", self.theme_limit as u64)?;

        let groups = [("intraday", &self.intraday), ("end_of_day", &self.end_of_day)];
        for (name, expressions) in groups {
            for (i, expression) in expressions.iter().enumerate() {
                if cron::Schedule::from_str(expression).is_err() {
                    return Err(ValidationError::InvalidValue {
                        field: format!("schedule.{name}[{i}]"),
                        reason: format!("invalid cron expression: {expression}"),
                    });
                }
            }
        }

        if self.enabled && self.intraday.is_empty() && self.end_of_day.is_empty() {
            return Err(ValidationError::Conflict {
                reason: "scheduler is enabled but has no triggers".into(),
            });
        }

        Ok(())
    }
}

impl Validate for CorsConfig {
    fn validate(&self) -> ValidationResult<()> {
        for origin in &self.allowed_origins {
            if origin == "*" {
                return Err(ValidationError::InvalidValue {
                    field: "cors.allowed_origins".into(),
                    reason: "wildcard origins are not allowed".into(),
                });
            }
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                return Err(ValidationError::InvalidValue {
                    field: "cors.allowed_origins".into(),
                    reason: format!("origin must include a scheme: {origin}"),
                });
            }
        }
        Ok(())
    }
}
