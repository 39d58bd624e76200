use facelens_core::config::ConfigError;
use facelens_core::MatchConfig;
use facelens_geometry::MirrorPolicy;
use serde::Deserialize;
use std::path::Path;

/// Full pipeline configuration.
///
/// ```toml
/// [matching]
/// similarity_threshold = 0.75
///
/// [pipeline]
/// mirror_policy = "overlay"   # overlay | image | none
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matching: MatchConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Which transform carries the front-camera mirror.
    pub mirror_policy: MirrorPolicy,
}

impl Config {
    /// Load configuration from `FACELENS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            matching: MatchConfig::from_env(),
            pipeline: PipelineConfig {
                mirror_policy: std::env::var("FACELENS_MIRROR_POLICY")
                    .ok()
                    .and_then(|v| parse_mirror_policy(&v))
                    .unwrap_or_default(),
            },
        }
    }

    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.matching.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

fn parse_mirror_policy(value: &str) -> Option<MirrorPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "overlay" => Some(MirrorPolicy::Overlay),
        "image" => Some(MirrorPolicy::Image),
        "none" => Some(MirrorPolicy::None),
        other => {
            tracing::warn!(value = other, "unknown FACELENS_MIRROR_POLICY, using default");
            None
        }
    }
}
