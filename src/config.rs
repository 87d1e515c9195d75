use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File, FileFormat, Value};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::error::{ExecutorError, Result};

/// Compute device selector
pub const DEVICE: &str = "device";
/// Evaluator type name resolved through the registry
pub const EVALUATOR: &str = "evaluator";
/// Root directory for evaluation results and model checkpoints
pub const CACHE_DIR: &str = "cache_dir";
pub const NUM_EPOCHS: &str = "executor_config.train.num_epochs";
pub const TRAIN_SEED: &str = "executor_config.train.seed";
pub const LEARNING_RATE: &str = "executor_config.optimizer.learning_rate";

const DEFAULT_DEVICE: &str = "cpu";
const DEFAULT_CACHE_DIR: &str = "./trafficdl/cache";

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Immutable run configuration shared by the executor and its collaborators.
///
/// Keys are nested and dot-separated (`executor_config.train.num_epochs`).
/// Keys nobody asks for are ignored.
#[derive(Debug, Clone)]
pub struct RunConfig {
    inner: Config,
}

impl RunConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = with_defaults(Config::builder())?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/experiment.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRAFFICDL_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TRAFFICDL_EXECUTOR_CONFIG__TRAIN__NUM_EPOCHS, etc.)
            .add_source(
                Environment::with_prefix("TRAFFICDL")
                    .separator("__")
                    .try_parsing(true),
            );

        Ok(Self {
            inner: builder.build()?,
        })
    }

    /// Load a single configuration file (format picked from its extension)
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let builder = with_defaults(Config::builder())?.add_source(File::from(path.as_ref()));
        Ok(Self {
            inner: builder.build()?,
        })
    }

    /// Parse an inline TOML document
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, ConfigError> {
        let builder =
            with_defaults(Config::builder())?.add_source(File::from_str(text, FileFormat::Toml));
        Ok(Self {
            inner: builder.build()?,
        })
    }

    /// Returns a copy of this configuration with one key overridden
    pub fn with_override<V>(&self, key: &str, value: V) -> std::result::Result<Self, ConfigError>
    where
        V: Into<Value>,
    {
        let inner = Config::builder()
            .add_source(self.inner.clone())
            .set_override(key, value)?
            .build()?;
        Ok(Self { inner })
    }

    /// Typed lookup of a required key
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        Ok(self.inner.get::<T>(key)?)
    }

    /// Typed lookup of an optional key; ill-typed values are still errors
    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get::<T>(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Typed lookup falling back to `default` when the key is absent
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.get::<Value>(key).is_ok()
    }

    /// Number of training epochs; must be a positive integer
    pub fn num_epochs(&self) -> Result<NonZeroUsize> {
        let value: i64 = self.get(NUM_EPOCHS)?;
        usize::try_from(value)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| {
                ExecutorError::invalid_config(
                    NUM_EPOCHS,
                    format!("expected a positive integer, got {value}"),
                )
            })
    }

    /// Optimizer learning rate; must be positive and finite
    pub fn learning_rate(&self) -> Result<f64> {
        let value: f64 = self.get(LEARNING_RATE)?;
        if !(value.is_finite() && value > 0.0) {
            return Err(ExecutorError::invalid_config(
                LEARNING_RATE,
                format!("expected a positive float, got {value}"),
            ));
        }
        Ok(value)
    }

    pub fn train_seed(&self) -> Result<Option<u64>> {
        self.optional(TRAIN_SEED)
    }

    pub fn device_name(&self) -> Result<String> {
        self.get_or(DEVICE, DEFAULT_DEVICE.to_string())
    }

    pub fn evaluator_type(&self) -> Result<String> {
        self.get(EVALUATOR)
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        self.get_or(CACHE_DIR, PathBuf::from(DEFAULT_CACHE_DIR))
    }

    /// Directory evaluators persist their results into
    pub fn evaluate_res_dir(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("evaluate_cache"))
    }

    pub fn model_cache_dir(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("model_cache"))
    }

    /// `<model>_<dataset>` tag used in result and checkpoint file names
    pub fn result_tag(&self) -> Result<String> {
        let model: String = self.get_or("model", "model".to_string())?;
        let dataset: String = self.get_or("dataset", "dataset".to_string())?;
        Ok(format!("{model}_{dataset}"))
    }

    pub fn logging(&self) -> Result<LoggingConfig> {
        self.get_or("logging", LoggingConfig::default())
    }
}

impl From<Config> for RunConfig {
    fn from(inner: Config) -> Self {
        Self { inner }
    }
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default(DEVICE, DEFAULT_DEVICE)?
        .set_default(CACHE_DIR, DEFAULT_CACHE_DIR)?
        .set_default("logging.level", "info")?
        .set_default("logging.json", false)
}
