//! Server configuration.
//!
//! Configuration comes from three sources with the priority
//! YAML file > environment variables > defaults. The `.env` file, if any, is
//! loaded into the environment by `main` before this module runs.
//!
//! # Example
//! ```rust,no_run
//! use sonic_bridge::config::ServerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?;
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::core::session::driver::SessionSettings;
use crate::core::session::events::InferenceConfiguration;

pub const DEFAULT_MODEL_ID: &str = "amazon.nova-sonic-v1:0";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_VOICE_ID: &str = "tiffany";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a friendly phone assistant. Keep responses short and conversational.";
pub const DEFAULT_IMDS_BASE_URL: &str = "http://169.254.169.254";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TOP_P: f32 = 0.9;
const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(String, #[source] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Inference settings
    pub model_id: String,
    pub region: String,
    pub voice_id: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,

    /// Static AWS credentials. When both key halves are present the metadata
    /// service is never consulted.
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,

    /// Metadata service base URL; overridable so tests can point it at a
    /// local mock.
    pub imds_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model_id: DEFAULT_MODEL_ID.to_string(),
            region: DEFAULT_REGION.to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            temperature: DEFAULT_TEMPERATURE,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_session_token: None,
            imds_base_url: DEFAULT_IMDS_BASE_URL.to_string(),
        }
    }
}

/// YAML file shape; every field optional so a file can override selectively.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlConfig {
    host: Option<String>,
    port: Option<u16>,
    model_id: Option<String>,
    region: Option<String>,
    voice_id: Option<String>,
    system_prompt: Option<String>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
    temperature: Option<f32>,
    aws_access_key_id: Option<String>,
    aws_secret_access_key: Option<String>,
    aws_session_token: Option<String>,
    imds_base_url: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl ServerConfig {
    /// Build from environment variables over defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: env_var("HOST").unwrap_or(defaults.host),
            port: match env_var("PORT") {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| ConfigError::Invalid(format!("PORT is not a number: {raw}")))?,
                None => defaults.port,
            },
            model_id: env_var("MODEL_ID").unwrap_or(defaults.model_id),
            region: env_var("AWS_DEFAULT_REGION")
                .or_else(|| env_var("AWS_REGION"))
                .unwrap_or(defaults.region),
            voice_id: env_var("VOICE_ID").unwrap_or(defaults.voice_id),
            system_prompt: env_var("SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            max_tokens: defaults.max_tokens,
            top_p: defaults.top_p,
            temperature: defaults.temperature,
            aws_access_key_id: env_var("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: env_var("AWS_SECRET_ACCESS_KEY"),
            aws_session_token: env_var("AWS_SESSION_TOKEN"),
            imds_base_url: env_var("IMDS_BASE_URL").unwrap_or(defaults.imds_base_url),
        };
        config.validate()?;
        Ok(config)
    }

    /// Build from a YAML file, with environment variables filling anything
    /// the file leaves unset.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let yaml: YamlConfig = serde_yaml::from_str(&raw)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e))?;

        let base = Self::from_env()?;
        let config = Self {
            host: yaml.host.unwrap_or(base.host),
            port: yaml.port.unwrap_or(base.port),
            model_id: yaml.model_id.unwrap_or(base.model_id),
            region: yaml.region.unwrap_or(base.region),
            voice_id: yaml.voice_id.unwrap_or(base.voice_id),
            system_prompt: yaml.system_prompt.unwrap_or(base.system_prompt),
            max_tokens: yaml.max_tokens.unwrap_or(base.max_tokens),
            top_p: yaml.top_p.unwrap_or(base.top_p),
            temperature: yaml.temperature.unwrap_or(base.temperature),
            aws_access_key_id: yaml.aws_access_key_id.or(base.aws_access_key_id),
            aws_secret_access_key: yaml.aws_secret_access_key.or(base.aws_secret_access_key),
            aws_session_token: yaml.aws_session_token.or(base.aws_session_token),
            imds_base_url: yaml.imds_base_url.unwrap_or(base.imds_base_url),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model_id.is_empty() {
            return Err(ConfigError::Invalid("model_id must not be empty".into()));
        }
        if self.region.is_empty() {
            return Err(ConfigError::Invalid("region must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be within 0.0..=1.0, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::Invalid(format!(
                "top_p must be within 0.0..=1.0, got {}",
                self.top_p
            )));
        }
        Ok(())
    }

    /// The listen address, e.g. `0.0.0.0:8080`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-session settings derived from this configuration.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            voice_id: self.voice_id.clone(),
            system_prompt: self.system_prompt.clone(),
            inference: InferenceConfiguration {
                max_tokens: self.max_tokens,
                top_p: self.top_p,
                temperature: self.temperature,
            },
        }
    }
}
