use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use stride_engine::EngineConfig;
use stride_llm::{OpenAIConfig, ProviderConfig, RetryPolicy};
use stride_tools::ToolPolicies;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    pub storage: StorageConfig,

    // Secrets (from ENV only)
    #[serde(default)]
    pub mongodb_uri: Option<String>,
    #[serde(default)]
    pub openai_api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Defaults to the public OpenAI endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_llm_timeout() -> u64 {
    60
}

impl LlmConfig {
    pub fn provider(&self, api_key: &str) -> ProviderConfig {
        let mut openai =
            OpenAIConfig::new(api_key).with_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(base_url) = &self.base_url {
            openai = openai.with_base_url(base_url);
        }
        ProviderConfig::openai(openai).with_retry(self.retry.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Model used by the script-generation tool
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default)]
    pub policies: ToolPolicies,
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            generation_model: default_generation_model(),
            policies: ToolPolicies::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// MongoDB database name, unused by the in-memory store
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. `STRIDE_` variables, nested with `__` (e.g. `STRIDE_SERVER__PORT=8080`)
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("STRIDE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Config = config.try_deserialize()?;

        // Secrets never live in TOML
        cfg.openai_api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ConfigError::Message("OPENAI_API_KEY environment variable is required".to_string())
        })?;
        cfg.mongodb_uri = std::env::var("MONGODB_URI").ok();

        Ok(cfg)
    }
}
