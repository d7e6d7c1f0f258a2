//! Configuration parsing and validation
//!
//! Generation knobs live in an optional `phrasal.yaml` next to the grammar:
//!
//! ```yaml
//! generation:
//!   exhaustive_ceiling: 10000
//!   optional_probability: 0.5
//!   seed: 42
//!   test_fraction: 0.2
//! runtime:
//!   workers: 4
//! ```
//!
//! Every field has a default, so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::generator::{GenerationRequest, Request};

/// Name of the configuration file looked up in project directories
pub const CONFIG_FILE_NAME: &str = "phrasal.yaml";

/// Root configuration from `phrasal.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Generation settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Parallel runtime settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Output directory, relative to the grammar file
    #[serde(default)]
    pub output_dir: Option<String>,
}

/// Settings that shape a generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Largest path count enumerated exhaustively; bigger or unbounded
    /// spaces are sampled instead
    #[serde(default = "default_exhaustive_ceiling")]
    pub exhaustive_ceiling: u64,

    /// Probability that an optional element is present when sampling
    #[serde(default = "default_optional_probability")]
    pub optional_probability: f64,

    /// Sampling attempts allowed per requested example before giving up on
    /// finding more unique utterances
    #[serde(default = "default_attempts_per_example")]
    pub attempts_per_example: usize,

    /// Nesting depth after which optional references are always dropped
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Utterances per sink call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seed for reproducible sampling; unseeded runs use OS entropy
    #[serde(default)]
    pub seed: Option<u64>,

    /// Fraction of each intent's output reserved for testing
    #[serde(default)]
    pub test_fraction: Option<f64>,

    /// Examples per intent; `None` generates everything
    #[serde(default)]
    pub samples: Option<usize>,
}

fn default_exhaustive_ceiling() -> u64 {
    10_000
}

fn default_optional_probability() -> f64 {
    0.5
}

fn default_attempts_per_example() -> usize {
    20
}

fn default_max_depth() -> usize {
    32
}

fn default_batch_size() -> usize {
    1
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            exhaustive_ceiling: default_exhaustive_ceiling(),
            optional_probability: default_optional_probability(),
            attempts_per_example: default_attempts_per_example(),
            max_depth: default_max_depth(),
            batch_size: default_batch_size(),
            seed: None,
            test_fraction: None,
            samples: None,
        }
    }
}

impl GenerationConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.optional_probability) {
            return Err(invalid(format!(
                "optional_probability must be between 0 and 1, got {}",
                self.optional_probability
            )));
        }
        if let Some(fraction) = self.test_fraction {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(invalid(format!(
                    "test_fraction must be between 0 and 1, got {}",
                    fraction
                )));
            }
        }
        if self.exhaustive_ceiling == 0 {
            return Err(invalid("exhaustive_ceiling must be at least 1"));
        }
        if self.attempts_per_example == 0 {
            return Err(invalid("attempts_per_example must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1"));
        }
        Ok(())
    }

    /// The run-level request described by this configuration
    pub fn request(&self) -> GenerationRequest {
        GenerationRequest {
            shape: match self.samples {
                Some(n) => Request::Samples(n),
                None => Request::All,
            },
            test_fraction: self.test_fraction,
        }
    }
}

/// Parallel runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Intents generated concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Batches buffered between workers and the sink
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_workers() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl RuntimeConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(invalid("workers must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigInvalid {
        message: message.into(),
    }
}

/// Main configuration container
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Directory the configuration was loaded from
    pub base_path: PathBuf,
}

impl Config {
    /// Load configuration from a directory or a `phrasal.yaml` path
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = Config::load("./intents")?;
    /// println!("ceiling: {}", config.project.generation.exhaustive_ceiling);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let (config_path, base_path) = if path.is_dir() {
            (path.join(CONFIG_FILE_NAME), path.to_path_buf())
        } else {
            (
                path.to_path_buf(),
                path.parent().unwrap_or(Path::new(".")).to_path_buf(),
            )
        };

        if !config_path.exists() {
            return Err(Error::ConfigNotFound {
                path: config_path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(&config_path)?;
        let project = Self::parse(&contents)?;
        tracing::debug!("Loaded configuration from {}", config_path.display());

        Ok(Self { project, base_path })
    }

    /// Load `phrasal.yaml` from a directory, falling back to defaults when
    /// the directory has none
    pub fn load_or_default<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.join(CONFIG_FILE_NAME).exists() {
            Self::load(dir)
        } else {
            Ok(Self {
                project: ProjectConfig::default(),
                base_path: dir.to_path_buf(),
            })
        }
    }

    /// Parse and validate YAML configuration text
    pub fn parse(yaml: &str) -> Result<ProjectConfig> {
        let project: ProjectConfig = if yaml.trim().is_empty() {
            ProjectConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        project.generation.validate()?;
        project.runtime.validate()?;
        Ok(project)
    }
}
