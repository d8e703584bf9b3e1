use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MetamorphosisError, Result};

/// Top-level Metamorphosis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub word_cloud: WordCloudConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for model requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Execution engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default time budget for a tool invocation.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Achievements needed before the review is scored.
    #[serde(default = "default_min_achievements")]
    pub min_achievements: usize,
    /// Supersteps allowed per run before it is aborted.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Capacity of the broadcast event bus.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout(),
            min_achievements: default_min_achievements(),
            max_steps: default_max_steps(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl EngineConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

fn default_tool_timeout() -> u64 { 60 }
fn default_min_achievements() -> usize { 1 }
fn default_max_steps() -> usize { 32 }
fn default_event_buffer() -> usize { 64 }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Checkpoint store selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// Database path for the sqlite backend. Default: ~/.metamorphosis/checkpoints.db
    #[serde(default)]
    pub path: Option<String>,
}

impl CheckpointConfig {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => expand_home(p),
            None => expand_home("~/.metamorphosis/checkpoints.db"),
        }
    }
}

/// Word cloud rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordCloudConfig {
    #[serde(default = "default_word_cloud_dir")]
    pub output_dir: String,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

impl Default for WordCloudConfig {
    fn default() -> Self {
        Self {
            output_dir: default_word_cloud_dir(),
            max_words: default_max_words(),
        }
    }
}

impl WordCloudConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        expand_home(&self.output_dir)
    }
}

fn default_word_cloud_dir() -> String { "~/.metamorphosis/wordclouds".to_string() }
fn default_max_words() -> usize { 60 }

impl AppConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| MetamorphosisError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse config from TOML text, expanding `${ENV_VAR}` references.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| MetamorphosisError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
