//! Service configuration.
//!
//! Settings come from, in increasing precedence: built-in defaults, an
//! optional `config/ner.{toml,yaml,json}` file, and `NER__*` environment
//! variables (`NER__CACHE_CAPACITY=500`, `NER__MODEL__DEVICE=cpu`, ...).

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::serving::cache::DEFAULT_CACHE_CAPACITY;
use crate::serving::decoder::DecodeMode;
use crate::serving::metrics::{DEFAULT_ENDPOINT_WINDOW_SIZE, DEFAULT_WINDOW_SIZE};

const CONFIG_FILE: &str = "config/ner";
const ENV_PREFIX: &str = "NER";

#[derive(Debug, Error)]
pub enum ServiceConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
}

/// Where the token-classification model lives and how to run it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    /// Directory holding `model.safetensors`, `tokenizer.json` and `config.json`.
    pub model_path: PathBuf,
    /// Directory of the base encoder whose `config.json` describes the
    /// architecture (e.g. a local copy of `rubert-tiny2`).
    ///
    /// When unset, the architecture is read from `model_path/config.json`,
    /// which then has to carry the BERT fields (`hidden_size`, ...) next to
    /// `id_to_tag`. A fine-tuned directory whose `config.json` only holds the
    /// label table needs this set.
    #[serde(default)]
    pub base_model_path: Option<PathBuf>,
    /// `"auto"`, `"cpu"` or `"cuda"`.
    #[serde(default = "ModelConfig::default_device")]
    pub device: String,
    /// Sub-token budget per input, including special tokens.
    #[serde(default = "ModelConfig::default_max_sequence_length")]
    pub max_sequence_length: usize,
}

impl ModelConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            base_model_path: None,
            device: Self::default_device(),
            max_sequence_length: Self::default_max_sequence_length(),
        }
    }

    pub fn with_base_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_model_path = Some(path.into());
        self
    }

    pub fn with_device(mut self, device: &str) -> Self {
        self.device = device.to_string();
        self
    }

    pub fn with_max_sequence_length(mut self, max: usize) -> Self {
        self.max_sequence_length = max;
        self
    }

    /// Directory to read the encoder architecture from.
    pub fn architecture_path(&self) -> &PathBuf {
        self.base_model_path.as_ref().unwrap_or(&self.model_path)
    }

    fn default_device() -> String {
        "auto".to_string()
    }

    fn default_max_sequence_length() -> usize {
        128
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new("model_weights")
    }
}

/// Top-level settings for the prediction service and its HTTP surface.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    pub listen_addr: String,
    pub log_level: String,
    pub cache_capacity: usize,
    pub metrics_window: usize,
    pub endpoint_window: usize,
    pub decode_mode: DecodeMode,
    #[serde(default)]
    pub model: ModelConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            log_level: "info".to_string(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            metrics_window: DEFAULT_WINDOW_SIZE,
            endpoint_window: DEFAULT_ENDPOINT_WINDOW_SIZE,
            decode_mode: DecodeMode::default(),
            model: ModelConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn with_listen_addr(mut self, addr: &str) -> Self {
        self.listen_addr = addr.to_string();
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_metrics_windows(mut self, window: usize, endpoint_window: usize) -> Self {
        self.metrics_window = window;
        self.endpoint_window = endpoint_window;
        self
    }

    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }
}

fn builder_with_defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ServiceConfigError> {
    let defaults = ServiceConfig::default();
    let builder = Config::builder()
        .set_default("listen_addr", defaults.listen_addr)?
        .set_default("log_level", defaults.log_level)?
        .set_default("cache_capacity", defaults.cache_capacity as u64)?
        .set_default("metrics_window", defaults.metrics_window as u64)?
        .set_default("endpoint_window", defaults.endpoint_window as u64)?
        .set_default("decode_mode", "tokens")?
        .set_default(
            "model.model_path",
            defaults.model.model_path.to_string_lossy().to_string(),
        )?
        .set_default("model.device", defaults.model.device)?
        .set_default(
            "model.max_sequence_length",
            defaults.model.max_sequence_length as u64,
        )?;
    Ok(builder)
}

/// Load settings from defaults, `config/ner.*` and `NER__*` environment variables.
pub fn load() -> Result<ServiceConfig, ServiceConfigError> {
    let cfg = builder_with_defaults()?
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    Ok(cfg)
}

/// Load settings from defaults overlaid with an explicit TOML document.
pub fn from_toml(raw: &str) -> Result<ServiceConfig, ServiceConfigError> {
    let cfg = builder_with_defaults()?
        .add_source(File::from_str(raw, config::FileFormat::Toml))
        .build()?
        .try_deserialize()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.cache_capacity, 1000);
        assert_eq!(cfg.metrics_window, 1000);
        assert_eq!(cfg.endpoint_window, 100);
        assert_eq!(cfg.decode_mode, DecodeMode::Tokens);
        assert_eq!(cfg.model.max_sequence_length, 128);
        assert_eq!(cfg.model.device, "auto");
    }

    #[test]
    fn test_builder() {
        let cfg = ServiceConfig::default()
            .with_listen_addr("127.0.0.1:9000")
            .with_cache_capacity(10)
            .with_metrics_windows(50, 5)
            .with_decode_mode(DecodeMode::Spans)
            .with_model(
                ModelConfig::new("/models/ner")
                    .with_base_model("/models/rubert-tiny2")
                    .with_device("cpu")
                    .with_max_sequence_length(64),
            );

        assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
        assert_eq!(cfg.cache_capacity, 10);
        assert_eq!(cfg.endpoint_window, 5);
        assert_eq!(
            cfg.model.architecture_path(),
            &PathBuf::from("/models/rubert-tiny2")
        );
    }

    #[test]
    fn test_architecture_path_falls_back_to_model_path() {
        let model = ModelConfig::new("/models/ner");
        assert_eq!(model.architecture_path(), &PathBuf::from("/models/ner"));
    }

    #[test]
    fn test_from_toml_overrides_defaults() {
        let cfg = from_toml(
            r#"
            cache_capacity = 5
            decode_mode = "spans"

            [model]
            model_path = "/srv/ner"
            device = "cpu"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.cache_capacity, 5);
        assert_eq!(cfg.decode_mode, DecodeMode::Spans);
        assert_eq!(cfg.model.model_path, PathBuf::from("/srv/ner"));
        assert_eq!(cfg.model.device, "cpu");
        assert_eq!(cfg.model.max_sequence_length, 128);
        assert_eq!(cfg.listen_addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_from_toml_base_model_path() {
        let cfg = from_toml(
            r#"
            [model]
            model_path = "/srv/ner"
            base_model_path = "/srv/rubert-tiny2"
            "#,
        )
        .unwrap();

        assert_eq!(
            cfg.model.architecture_path(),
            &PathBuf::from("/srv/rubert-tiny2")
        );
    }

    #[test]
    fn test_from_toml_rejects_unknown_decode_mode() {
        assert!(from_toml(r#"decode_mode = "bilou""#).is_err());
    }
}
