//! CandleTokenClassifier - Local BERT Token Classification on Candle
//!
//! Loads a fine-tuned BERT encoder with a linear token-classification head
//! from a Hugging Face style directory and tags whitespace words with BIO
//! labels (pure Rust, no Python runtime).
//!
//! Expected files under `model_path`:
//!
//! - `model.safetensors` (or `pytorch_model.bin`): `bert.*` encoder and
//!   `classifier.*` head weights
//! - `tokenizer.json`: the WordPiece tokenizer
//! - `config.json`: `id_to_tag` label table and optional `max_len`; also the
//!   BERT architecture unless `base_model_path` points elsewhere

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{Tokenizer, TruncationParams};
use tokio::sync::RwLock;

use super::backend::InferenceBackend;
use super::types::{InferenceError, TagVocabulary, OUTSIDE_TAG};
use crate::config::ModelConfig;

// ============================================================================
// CandleDeviceInfo
// ============================================================================

#[derive(Debug, Clone)]
pub struct CandleDeviceInfo {
    pub name: String,
    pub is_gpu: bool,
}

// ============================================================================
// CandleModelState
// ============================================================================

/// Internal state: encoder, head, tokenizer and label table.
struct CandleModelState {
    bert: BertModel,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
    device_info: CandleDeviceInfo,
    vocabulary: TagVocabulary,
}

fn candle_error(context: &'static str) -> impl FnOnce(candle_core::Error) -> InferenceError {
    move |e| InferenceError::InferenceFailed(format!("{}: {}", context, e))
}

fn load_error(context: &'static str) -> impl FnOnce(candle_core::Error) -> InferenceError {
    move |e| InferenceError::ConfigError(format!("{}: {}", context, e))
}

// ============================================================================
// CandleTokenClassifier
// ============================================================================

/// Local Candle token-classification backend.
pub struct CandleTokenClassifier {
    config: ModelConfig,
    initialized: Arc<RwLock<bool>>,
    model_state: Arc<RwLock<Option<CandleModelState>>>,
}

impl std::fmt::Debug for CandleTokenClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleTokenClassifier")
            .field("model_path", &self.config.model_path)
            .field("device", &self.config.device)
            .finish()
    }
}

impl CandleTokenClassifier {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            initialized: Arc::new(RwLock::new(false)),
            model_state: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn select_device(preference: &str) -> (Device, CandleDeviceInfo) {
        let preference = preference.to_lowercase();

        if preference == "cpu" {
            return (
                Device::Cpu,
                CandleDeviceInfo {
                    name: "cpu".to_string(),
                    is_gpu: false,
                },
            );
        }

        if preference == "cuda" || preference == "auto" {
            match Device::new_cuda(0) {
                Ok(device) => {
                    tracing::info!("Candle: using CUDA device 0");
                    return (
                        device,
                        CandleDeviceInfo {
                            name: "cuda:0".to_string(),
                            is_gpu: true,
                        },
                    );
                }
                Err(e) => {
                    if preference == "cuda" {
                        tracing::warn!("Candle: CUDA unavailable, falling back to CPU: {}", e);
                    }
                }
            }
        }

        tracing::info!("Candle: using CPU");
        (
            Device::Cpu,
            CandleDeviceInfo {
                name: "cpu".to_string(),
                is_gpu: false,
            },
        )
    }

    fn resolve_weights(model_dir: &Path) -> Result<PathBuf, InferenceError> {
        ["model.safetensors", "pytorch_model.bin"]
            .iter()
            .map(|name| model_dir.join(name))
            .find(|path| path.exists())
            .ok_or_else(|| {
                InferenceError::ConfigError(format!(
                    "No model.safetensors or pytorch_model.bin in {}",
                    model_dir.display()
                ))
            })
    }

    fn load_state(config: &ModelConfig) -> Result<CandleModelState, InferenceError> {
        let model_dir = config.model_path.as_path();
        let (device, device_info) = Self::select_device(&config.device);

        let (vocabulary, saved_max_len) = TagVocabulary::load(model_dir)?;
        let max_length = saved_max_len.unwrap_or(config.max_sequence_length);

        let arch_path = config.architecture_path().join("config.json");
        let arch_raw = std::fs::read_to_string(&arch_path).map_err(|e| {
            InferenceError::ConfigError(format!("Failed to read {}: {}", arch_path.display(), e))
        })?;
        let bert_config: BertConfig = serde_json::from_str(&arch_raw).map_err(|e| {
            let hint = if config.base_model_path.is_none() {
                " (set model.base_model_path to the base encoder directory)"
            } else {
                ""
            };
            InferenceError::ConfigError(format!(
                "Invalid BERT config {}: {}{}",
                arch_path.display(),
                e,
                hint
            ))
        })?;

        let tokenizer_path = model_dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            InferenceError::ConfigError(format!(
                "Failed to load tokenizer from '{}': {}",
                tokenizer_path.display(),
                e
            ))
        })?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| InferenceError::ConfigError(format!("Invalid truncation: {}", e)))?;

        let weights = Self::resolve_weights(model_dir)?;
        let vb = if weights.extension().and_then(|s| s.to_str()) == Some("bin") {
            VarBuilder::from_pth(&weights, DType::F32, &device)
                .map_err(load_error("Failed to read pytorch weights"))?
        } else {
            // SAFETY: the weights file is not modified while mapped.
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device) }
                .map_err(load_error("Failed to map safetensors"))?
        };

        let bert = BertModel::load(vb.pp("bert"), &bert_config)
            .map_err(load_error("Failed to load BERT encoder"))?;
        let classifier = candle_nn::linear(
            bert_config.hidden_size,
            vocabulary.num_labels(),
            vb.pp("classifier"),
        )
        .map_err(load_error("Failed to load classifier head"))?;

        tracing::info!(
            "Candle: loaded token classifier from '{}' on {} ({} labels, max_len={})",
            model_dir.display(),
            device_info.name,
            vocabulary.len(),
            max_length
        );

        Ok(CandleModelState {
            bert,
            classifier,
            tokenizer,
            device,
            device_info,
            vocabulary,
        })
    }

    /// Forward pass for one pre-split sentence.
    ///
    /// Each word takes the label predicted for its first sub-token. Words cut
    /// off by truncation are tagged `O`.
    fn tag_words(state: &CandleModelState, words: &[String]) -> Result<Vec<String>, InferenceError> {
        let word_refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let encoding = state
            .tokenizer
            .encode(word_refs, true)
            .map_err(|e| InferenceError::InferenceFailed(format!("Tokenization failed: {}", e)))?;

        let input_ids = Tensor::new(encoding.get_ids(), &state.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(candle_error("Input tensor creation failed"))?;
        let token_type_ids = input_ids
            .zeros_like()
            .map_err(candle_error("Token type tensor creation failed"))?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), &state.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(candle_error("Attention mask creation failed"))?;

        let hidden = state
            .bert
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(candle_error("Encoder forward pass failed"))?;
        let logits = state
            .classifier
            .forward(&hidden)
            .map_err(candle_error("Classifier forward pass failed"))?;
        let predictions = logits
            .argmax(D::Minus1)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_vec1::<u32>())
            .map_err(candle_error("Argmax failed"))?;

        let mut tags = vec![OUTSIDE_TAG.to_string(); words.len()];
        let mut previous_word: Option<u32> = None;
        for (position, word_id) in encoding.get_word_ids().iter().enumerate() {
            let Some(word_id) = *word_id else { continue };
            if previous_word == Some(word_id) {
                continue;
            }
            previous_word = Some(word_id);

            if let (Some(slot), Some(&label_id)) =
                (tags.get_mut(word_id as usize), predictions.get(position))
            {
                *slot = state.vocabulary.tag(label_id).to_string();
            }
        }

        Ok(tags)
    }
}

// ============================================================================
// InferenceBackend Implementation
// ============================================================================

#[async_trait]
impl InferenceBackend for CandleTokenClassifier {
    fn name(&self) -> &str {
        "CandleTokenClassifier"
    }

    /// Load weights, tokenizer and label table on a blocking thread.
    async fn initialize(&self) -> Result<(), InferenceError> {
        if !self.config.model_path.exists() {
            return Err(InferenceError::ConfigError(format!(
                "Model path not found: {}",
                self.config.model_path.display()
            )));
        }

        let config = self.config.clone();
        let state = tokio::task::spawn_blocking(move || Self::load_state(&config))
            .await
            .map_err(|e| {
                InferenceError::ModelNotReady(format!(
                    "Blocking task panicked during Candle init: {}",
                    e
                ))
            })??;

        *self.model_state.write().await = Some(state);
        *self.initialized.write().await = true;

        Ok(())
    }

    async fn is_available(&self) -> bool {
        *self.initialized.read().await
    }

    async fn device(&self) -> String {
        self.model_state
            .read()
            .await
            .as_ref()
            .map(|state| state.device_info.name.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    async fn infer(&self, tokens: &[String]) -> Result<Vec<String>, InferenceError> {
        if !*self.initialized.read().await {
            return Err(InferenceError::ModelNotReady(
                "Candle token classifier not initialized".to_string(),
            ));
        }

        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let words = tokens.to_vec();
        let model_state = self.model_state.clone();

        tokio::task::spawn_blocking(move || {
            let guard = model_state.blocking_read();
            let state = guard.as_ref().ok_or_else(|| {
                InferenceError::ModelNotReady("Model not loaded".to_string())
            })?;
            Self::tag_words(state, &words)
        })
        .await
        .map_err(|e| InferenceError::InferenceFailed(format!("Inference task panicked: {}", e)))?
    }

    async fn shutdown(&self) -> Result<(), InferenceError> {
        *self.initialized.write().await = false;
        *self.model_state.write().await = None;
        tracing::info!("Candle: token classifier unloaded");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
