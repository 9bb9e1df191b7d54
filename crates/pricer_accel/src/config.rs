//! Session configuration.
//!
//! Values come from, in increasing priority: defaults, an optional TOML
//! file, then `PRICER_ACCEL_*` environment variables. See [`build_config`].

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Number of kernel instances built into the default image.
pub const DEFAULT_NUM_KERNELS: usize = 1;

/// Default maximum number of assets in one batch call.
pub const DEFAULT_MAX_BATCH_WIDTH: usize = 1024;

/// Default kernel name prefix; slot `i` uses `"{prefix}{i}"`.
pub const DEFAULT_KERNEL_NAME_PREFIX: &str = "mc_euro_k";

/// Default number of time steps per simulated path.
pub const DEFAULT_TIME_STEPS: u32 = 1;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Kernel count is zero.
    #[error("Invalid kernel count: {0}. Must be at least 1")]
    InvalidKernelCount(usize),

    /// Batch width is zero.
    #[error("Invalid maximum batch width: {0}. Must be at least 1")]
    InvalidBatchWidth(usize),

    /// Time step count is zero.
    #[error("Invalid time step count: {0}. Must be at least 1")]
    InvalidTimeSteps(u32),

    /// Kernel name prefix is empty.
    #[error("Kernel name prefix must not be empty")]
    EmptyKernelPrefix,

    /// File could not be read or parsed.
    #[error("Configuration file error: {0}")]
    FileError(String),

    /// Environment override could not be parsed.
    #[error("Environment variable error: {0}")]
    EnvError(String),
}

/// Static shape of an accelerator session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of physical kernel instances (slots).
    pub num_kernels: usize,
    /// Maximum number of assets accepted by one batch call.
    pub max_batch_width: usize,
    /// Kernel name prefix.
    pub kernel_name_prefix: String,
    /// Time steps per simulated path.
    pub time_steps: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            num_kernels: DEFAULT_NUM_KERNELS,
            max_batch_width: DEFAULT_MAX_BATCH_WIDTH,
            kernel_name_prefix: DEFAULT_KERNEL_NAME_PREFIX.to_string(),
            time_steps: DEFAULT_TIME_STEPS,
        }
    }
}

impl SessionConfig {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pricer_accel::config::SessionConfig;
    ///
    /// let config = SessionConfig::builder()
    ///     .num_kernels(4)
    ///     .max_batch_width(10)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(config.max_assets_per_slot(), 3);
    /// assert_eq!(config.seed_words(), 12);
    /// ```
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_kernels == 0 {
            return Err(ConfigError::InvalidKernelCount(self.num_kernels));
        }
        if self.max_batch_width == 0 {
            return Err(ConfigError::InvalidBatchWidth(self.max_batch_width));
        }
        if self.time_steps == 0 {
            return Err(ConfigError::InvalidTimeSteps(self.time_steps));
        }
        if self.kernel_name_prefix.is_empty() {
            return Err(ConfigError::EmptyKernelPrefix);
        }
        Ok(())
    }

    /// Largest number of assets a single slot handles in one batch.
    pub fn max_assets_per_slot(&self) -> usize {
        self.max_batch_width.div_ceil(self.num_kernels)
    }

    /// Size of the shared seed buffer in `u32` words.
    pub fn seed_words(&self) -> usize {
        self.num_kernels * self.max_assets_per_slot()
    }

    /// Kernel name for each slot.
    pub fn kernel_names(&self) -> Vec<String> {
        (0..self.num_kernels)
            .map(|i| format!("{}{}", self.kernel_name_prefix, i))
            .collect()
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)
            .map_err(|e| ConfigError::FileError(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `PRICER_ACCEL_*` environment overrides on top of `self`.
    pub fn merge_env(&mut self) -> Result<(), ConfigError> {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    fn merge_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PRICER_ACCEL_NUM_KERNELS") {
            self.num_kernels = parse_var("PRICER_ACCEL_NUM_KERNELS", &v)?;
        }
        if let Some(v) = lookup("PRICER_ACCEL_MAX_BATCH_WIDTH") {
            self.max_batch_width = parse_var("PRICER_ACCEL_MAX_BATCH_WIDTH", &v)?;
        }
        if let Some(v) = lookup("PRICER_ACCEL_KERNEL_NAME_PREFIX") {
            self.kernel_name_prefix = v;
        }
        if let Some(v) = lookup("PRICER_ACCEL_TIME_STEPS") {
            self.time_steps = parse_var("PRICER_ACCEL_TIME_STEPS", &v)?;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::EnvError(format!("{}={} is not a valid number", key, value)))
}

/// Build configuration from all sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables
/// 2. Config file
/// 3. Default values
pub fn build_config(file: Option<&Path>) -> Result<SessionConfig, ConfigError> {
    let mut config = match file {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };
    config.merge_env()?;
    config.validate()?;
    Ok(config)
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    num_kernels: Option<usize>,
    max_batch_width: Option<usize>,
    kernel_name_prefix: Option<String>,
    time_steps: Option<u32>,
}

impl SessionConfigBuilder {
    /// Sets the number of kernel slots.
    pub fn num_kernels(mut self, n: usize) -> Self {
        self.num_kernels = Some(n);
        self
    }

    /// Sets the maximum batch width.
    pub fn max_batch_width(mut self, width: usize) -> Self {
        self.max_batch_width = Some(width);
        self
    }

    /// Sets the kernel name prefix.
    pub fn kernel_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.kernel_name_prefix = Some(prefix.into());
        self
    }

    /// Sets the number of time steps per path.
    pub fn time_steps(mut self, steps: u32) -> Self {
        self.time_steps = Some(steps);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        let defaults = SessionConfig::default();
        let config = SessionConfig {
            num_kernels: self.num_kernels.unwrap_or(defaults.num_kernels),
            max_batch_width: self.max_batch_width.unwrap_or(defaults.max_batch_width),
            kernel_name_prefix: self
                .kernel_name_prefix
                .unwrap_or(defaults.kernel_name_prefix),
            time_steps: self.time_steps.unwrap_or(defaults.time_steps),
        };
        config.validate()?;
        Ok(config)
    }
}
