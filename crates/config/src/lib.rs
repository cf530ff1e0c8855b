//! Configuration loading, validation, and management for ctxloom.
//!
//! Loads configuration from `~/.ctxloom/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ctxloom_core::ModelLimits;
use serde::{Deserialize, Deserializer, Serialize};

/// The root configuration structure.
///
/// Maps directly to `~/.ctxloom/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model used when a request names none
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,

    /// Per-completion timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Caller override of the model context window. Can only tighten it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_token_limit: Option<usize>,

    /// Hard cap on completion rounds per turn
    #[serde(default = "default_max_iterations")]
    pub function_call_max_iterations: usize,

    /// Fail instead of stopping quietly at the cap
    #[serde(default)]
    pub raise_on_max_iterations: bool,

    /// Fail instead of answering unregistered tool calls with an error message
    #[serde(default)]
    pub raise_on_missing_tool: bool,

    /// How tokens are counted
    #[serde(default)]
    pub tokenizer: TokenizerKind,

    /// User-visible failure fallback
    #[serde(default)]
    pub failure: FailureConfig,

    /// Known models and their limits. Entries in a file are merged over
    /// the built-in table.
    #[serde(default = "default_models", deserialize_with = "merge_models")]
    pub models: BTreeMap<String, ModelLimits>,
}

fn default_model() -> String {
    "gpt-4o".into()
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_max_iterations() -> usize {
    5
}

/// Token counting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// ≈ 4 characters per token
    #[default]
    Heuristic,
    /// One token per character
    Char,
    /// Byte-pair encoding of the model (needs the `tiktoken` feature)
    Bpe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureConfig {
    /// Text written over the last assistant turn when a turn fails
    #[serde(default = "default_on_failure")]
    pub on_failure: String,

    /// Replaces `on_failure` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_override: Option<String>,

    /// Append the error text in a code fence
    #[serde(default)]
    pub display_error: bool,
}

fn default_on_failure() -> String {
    "Sorry, something went wrong while generating a response. Please try again.".into()
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            on_failure: default_on_failure(),
            message_override: None,
            display_error: false,
        }
    }
}

impl FailureConfig {
    /// The text actually shown.
    pub fn message(&self) -> &str {
        self.message_override.as_deref().unwrap_or(&self.on_failure)
    }
}

/// Context window and output reserve of the models shipped by default.
pub fn default_models() -> BTreeMap<String, ModelLimits> {
    [
        ("gpt-4", 8_192, 4_096),
        ("gpt-4o", 128_000, 4_096),
        ("gpt-4-turbo-2024-04-09", 128_000, 4_096),
        ("gpt-35-turbo", 16_385, 4_096),
        ("AZURE_GPT_4_0613", 8_192, 4_096),
        ("AZURE_GPT_4_0613_32K", 32_768, 4_096),
        ("AZURE_GPT_4_TURBO_1106", 128_000, 4_096),
        ("AZURE_GPT_4_TURBO_2024_0409", 128_000, 4_096),
        ("AZURE_GPT_35_TURBO_16K", 16_385, 4_096),
        // a full-window reserve would leave no room for history
        ("AZURE_GPT_35_TURBO_0613", 4_096, 1_024),
        ("AZURE_GPT_4o_2024_0513", 128_000, 4_096),
    ]
    .into_iter()
    .map(|(name, window, output)| (name.to_string(), ModelLimits::new(window, output)))
    .collect()
}

fn merge_models<'de, D>(deserializer: D) -> Result<BTreeMap<String, ModelLimits>, D::Error>
where
    D: Deserializer<'de>,
{
    let configured = BTreeMap::<String, ModelLimits>::deserialize(deserializer)?;
    let mut models = default_models();
    models.extend(configured);
    Ok(models)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            temperature: 0.0,
            timeout_ms: default_timeout_ms(),
            context_window_token_limit: None,
            function_call_max_iterations: default_max_iterations(),
            raise_on_max_iterations: false,
            raise_on_missing_tool: false,
            tokenizer: TokenizerKind::default(),
            failure: FailureConfig::default(),
            models: default_models(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default location, then apply environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `CTXLOOM_*` overrides read through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup("CTXLOOM_MODEL") {
            self.default_model = model;
        }
        if let Some(raw) = lookup("CTXLOOM_MAX_ITERATIONS") {
            self.function_call_max_iterations =
                raw.parse().map_err(|_| ConfigError::InvalidOverride {
                    key: "CTXLOOM_MAX_ITERATIONS".into(),
                    value: raw.clone(),
                })?;
        }
        if let Some(raw) = lookup("CTXLOOM_CONTEXT_LIMIT") {
            let limit = raw.parse().map_err(|_| ConfigError::InvalidOverride {
                key: "CTXLOOM_CONTEXT_LIMIT".into(),
                value: raw.clone(),
            })?;
            self.context_window_token_limit = Some(limit);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ctxloom")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.function_call_max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "function_call_max_iterations must be at least 1".into(),
            ));
        }

        for (name, limits) in &self.models {
            if limits.max_output_tokens >= limits.context_window {
                return Err(ConfigError::ValidationError(format!(
                    "model {name}: max_output_tokens ({}) must be below context_window ({})",
                    limits.max_output_tokens, limits.context_window
                )));
            }
        }

        Ok(())
    }

    /// Limits of `model`. Unknown models get zero limits, which leaves no
    /// room for history.
    pub fn model_limits(&self, model: &str) -> ModelLimits {
        match self.models.get(model) {
            Some(limits) => *limits,
            None => {
                tracing::warn!(model, "Unknown model; no context window configured");
                ModelLimits::default()
            }
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for ctxloom_core::Error {
    fn from(e: ConfigError) -> Self {
        ctxloom_core::Error::Config {
            message: e.to_string(),
        }
    }
}
