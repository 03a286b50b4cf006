//! Engine configuration, persisted as TOML.
//!
//! Every field has a serde default, so a config file only needs the values
//! it changes. [`EngineConfig::validate`] is called by the engine before any
//! component is built.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Geometric entity resolver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Tolerance of the first attempt at every tier.
    #[serde(default = "default_tolerance")]
    pub base_tolerance: f64,
    /// Attempts per tier before moving to the next tier.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Each retry multiplies the tolerance by this factor.
    #[serde(default = "default_relax_factor")]
    pub relax_factor: f64,
}

/// Relationship extractor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Tolerance handed to the kernel predicates.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Fewer resolved proxies than this switches to the declared fallback.
    #[serde(default = "default_min_resolved")]
    pub min_resolved: usize,
    /// Resolved / candidate ratio below which the declared fallback is used.
    #[serde(default)]
    pub min_coverage: f64,
    /// Declared boundary count below which boundaries are also detected
    /// geometrically.
    #[serde(default = "default_min_declared_boundaries")]
    pub min_declared_boundaries: usize,
    /// Outer-loop elements per pairwise batch.
    #[serde(default = "default_pair_batch_size")]
    pub pair_batch_size: usize,
}

/// Graph import pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Rows per write batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Deadline for one batch write.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Concurrent sessions; `0` means one per worker.
    #[serde(default)]
    pub max_sessions: usize,
    /// How long a batch waits for a free session.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Delete previously inferred relationships before writing.
    #[serde(default)]
    pub clear_inferred: bool,
}

/// Worker pool settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Worker threads; `0` means one per available core.
    #[serde(default)]
    pub workers: usize,
}

/// Path finder defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub path: PathConfig,
}

fn default_tolerance() -> f64 {
    0.001
}
fn default_max_attempts() -> usize {
    3
}
fn default_relax_factor() -> f64 {
    10.0
}
fn default_min_resolved() -> usize {
    2
}
fn default_min_declared_boundaries() -> usize {
    10
}
fn default_pair_batch_size() -> usize {
    64
}
fn default_batch_size() -> usize {
    100
}
fn default_write_timeout_ms() -> u64 {
    30_000
}
fn default_acquire_timeout_ms() -> u64 {
    30_000
}
fn default_max_depth() -> usize {
    10
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_tolerance: default_tolerance(),
            max_attempts: default_max_attempts(),
            relax_factor: default_relax_factor(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            min_resolved: default_min_resolved(),
            min_coverage: 0.0,
            min_declared_boundaries: default_min_declared_boundaries(),
            pair_batch_size: default_pair_batch_size(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            write_timeout_ms: default_write_timeout_ms(),
            max_sessions: 0,
            acquire_timeout_ms: default_acquire_timeout_ms(),
            clear_inferred: false,
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

impl EngineConfig {
    /// Reject values no component can work with.
    pub fn validate(&self) -> ConfigResult<()> {
        let tolerances = [
            ("resolver.base_tolerance", self.resolver.base_tolerance),
            ("extraction.tolerance", self.extraction.tolerance),
        ];
        for (name, value) in tolerances {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(format!("{name} must be positive, got {value}")));
            }
        }
        if self.resolver.max_attempts == 0 {
            return Err(invalid("resolver.max_attempts must be at least 1"));
        }
        if !(self.resolver.relax_factor.is_finite() && self.resolver.relax_factor > 1.0) {
            return Err(invalid(format!(
                "resolver.relax_factor must be greater than 1, got {}",
                self.resolver.relax_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.extraction.min_coverage) {
            return Err(invalid(format!(
                "extraction.min_coverage must lie in [0, 1], got {}",
                self.extraction.min_coverage
            )));
        }
        if self.extraction.pair_batch_size == 0 {
            return Err(invalid("extraction.pair_batch_size must be at least 1"));
        }
        if self.import.batch_size == 0 {
            return Err(invalid("import.batch_size must be at least 1"));
        }
        if self.import.write_timeout_ms == 0 {
            return Err(invalid("import.write_timeout_ms must be at least 1"));
        }
        Ok(())
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    fn from_toml_str(content: &str, origin: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: "<memory>".to_string(),
            message: e.to_string(),
        })
    }
}
