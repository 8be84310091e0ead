use serde::Deserialize;
use std::path::Path;

use crate::types::SamplingParams;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            num_predict: default_num_predict(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            num_predict: self.num_predict,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434/api".to_string()
}
fn default_model() -> String {
    "mistral".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_top_p() -> f64 {
    0.9
}
fn default_top_k() -> u32 {
    40
}
fn default_num_predict() -> u32 {
    500
}
fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    format!("{}/.companiond/memory.db", home_dir())
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_dir")]
    pub dir: String,
    /// Override for the screen-grab command. `{path}` is replaced with the
    /// output file. Platform default used when unset.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            dir: default_capture_dir(),
            command: None,
            max_age_hours: default_max_age_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_capture_dir() -> String {
    format!("{}/.companiond/captures", home_dir())
}
fn default_max_age_hours() -> u64 {
    7 * 24
}
fn default_sweep_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    7878
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}

impl AppConfig {
    /// Load config.toml, or defaults when the file doesn't exist.
    /// `LLM_API_URL` and `LLM_MODEL` override the endpoint settings.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config: AppConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            AppConfig::default()
        };

        if let Ok(url) = std::env::var("LLM_API_URL") {
            if !url.is_empty() {
                config.generation.base_url = url;
            }
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            if !model.is_empty() {
                config.generation.model = model;
            }
        }

        Ok(config)
    }
}
