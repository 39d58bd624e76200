use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Default cosine similarity a match must strictly exceed.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.75;

const THRESHOLD_ENV: &str = "FACELENS_SIMILARITY_THRESHOLD";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Matching engine settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Cosine similarity a candidate must strictly exceed to be reported.
    pub similarity_threshold: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl MatchConfig {
    /// Load from `FACELENS_*` environment variables with defaults.
    ///
    /// A value that does not parse or fails [`validate`](Self::validate) is
    /// logged and replaced by the default.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(THRESHOLD_ENV).ok().as_deref())
    }

    fn from_env_value(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        let config = match raw.trim().parse::<f32>() {
            Ok(similarity_threshold) => Self {
                similarity_threshold,
            },
            Err(e) => {
                tracing::warn!(
                    key = THRESHOLD_ENV,
                    value = raw,
                    error = %e,
                    "unparseable value, using default"
                );
                return Self::default();
            }
        };
        match config.validate() {
            Ok(()) => config,
            Err(e) => {
                tracing::warn!(
                    key = THRESHOLD_ENV,
                    value = raw,
                    error = %e,
                    "rejected value, using default"
                );
                Self::default()
            }
        }
    }

    /// Parse a `[matching]`-style TOML table.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Validation(format!(
                "similarity_threshold must lie in [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}
