use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::{AdjustmentConfig, Config, StageConfig};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid convergence tolerance: {0}. Must be a positive finite number")]
    InvalidTolerance(f64),

    #[error("Invalid max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u32),

    #[error("Invalid max_concurrency: {0}. Must be at least 1")]
    InvalidMaxConcurrency(usize),

    #[error("Invalid max_attempts for {stage}: {value}. Must be at least 1")]
    InvalidMaxAttempts { stage: &'static str, value: u32 },

    #[error("Invalid {name}: {value}. {expected}")]
    InvalidAdjustmentFactor {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "Invalid polling configuration: initial_interval_ms ({0}) must be positive and not exceed max_interval_ms ({1})"
    )]
    InvalidPolling(u64, u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .hubbard-scf/config.yaml (project config)
    /// 3. .hubbard-scf/local.yaml (project local overrides, optional)
    /// 4. Environment variables (HUBBARD_SCF_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("HUBBARD_SCF_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".hubbard-scf/config.yaml"))
            .merge(Yaml::file(".hubbard-scf/local.yaml"))
            .merge(Env::prefixed("HUBBARD_SCF_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let tolerance = config.convergence.tolerance;
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(ConfigError::InvalidTolerance(tolerance));
        }

        if config.convergence.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(0));
        }

        if config.decomposition.max_concurrency == 0 {
            return Err(ConfigError::InvalidMaxConcurrency(0));
        }

        if config.relaxation.displacement_tolerance < 0.0
            || !config.relaxation.displacement_tolerance.is_finite()
        {
            return Err(ConfigError::ValidationFailed(format!(
                "relaxation.displacement_tolerance must be non-negative, got {}",
                config.relaxation.displacement_tolerance
            )));
        }

        if config.hubbard.include_intersite && config.hubbard.intersite_cutoff <= 0.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "hubbard.intersite_cutoff must be positive, got {}",
                config.hubbard.intersite_cutoff
            )));
        }

        Self::validate_stage("ground_state", &config.ground_state)?;
        Self::validate_stage("extraction", &config.extraction)?;
        Self::validate_stage("relax", &config.relax)?;
        Self::validate_adjustment(&config.adjustment)?;

        if config.polling.initial_interval_ms == 0
            || config.polling.initial_interval_ms > config.polling.max_interval_ms
        {
            return Err(ConfigError::InvalidPolling(
                config.polling.initial_interval_ms,
                config.polling.max_interval_ms,
            ));
        }

        // Validate database config
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        // Validate logging config
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }

    fn validate_stage(stage: &'static str, config: &StageConfig) -> Result<(), ConfigError> {
        if config.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts { stage, value: 0 });
        }
        let resources = &config.resources;
        if resources.num_workers == 0 || resources.memory_mb == 0 || resources.walltime_secs == 0 {
            return Err(ConfigError::ValidationFailed(format!(
                "{stage}.resources must all be positive"
            )));
        }
        let solver = &config.solver;
        if solver.conv_threshold <= 0.0 || solver.mixing_beta <= 0.0 || solver.mixing_beta > 1.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "{stage}.solver needs conv_threshold > 0 and mixing_beta in (0, 1]"
            )));
        }
        Ok(())
    }

    fn validate_adjustment(config: &AdjustmentConfig) -> Result<(), ConfigError> {
        let shrinking = [
            ("adjustment.worker_factor", config.worker_factor),
            ("adjustment.mixing_factor", config.mixing_factor),
        ];
        for (name, value) in shrinking {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::InvalidAdjustmentFactor {
                    name,
                    value,
                    expected: "Must be strictly between 0 and 1",
                });
            }
        }

        let growing = [
            ("adjustment.memory_factor", config.memory_factor),
            ("adjustment.walltime_factor", config.walltime_factor),
            ("adjustment.threshold_factor", config.threshold_factor),
            ("adjustment.inner_iteration_factor", config.inner_iteration_factor),
        ];
        for (name, value) in growing {
            if !(value > 1.0) || !value.is_finite() {
                return Err(ConfigError::InvalidAdjustmentFactor {
                    name,
                    value,
                    expected: "Must be greater than 1",
                });
            }
        }
        Ok(())
    }
}
