use crate::application::use_cases::allowlist_validator::AllowlistRules;
use crate::application::use_cases::retry::RetryPolicy;
use crate::application::PipelineSettings;
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::infrastructure::mcp::McpSettings;
use crate::infrastructure::security::keyring::KeyringManager;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const CONFIG_FILE: &str = "EventScribe.toml";
pub const ENV_PREFIX: &str = "EVENTSCRIBE_";
const KEYRING_SERVICE: &str = "EventScribe";
const KEYRING_GEMINI_ENTRY: &str = "gemini";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub mcp_server_url: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
    pub max_generation_attempts: u32,
    pub backoff_base_ms: u64,
    pub schema_resource_uri: String,
    pub query_tool_name: String,
    pub allowed_tables: Vec<String>,
    pub http_host: String,
    pub http_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        let llm = LLMConfig::default();
        let mcp = McpSettings::default();
        Self {
            mcp_server_url: None,
            gemini_api_key: None,
            gemini_base_url: llm.base_url,
            model: llm.model,
            temperature: llm.temperature.unwrap_or(0.7),
            max_output_tokens: llm.max_tokens.unwrap_or(1024),
            request_timeout_secs: mcp.timeout.as_secs(),
            max_generation_attempts: 3,
            backoff_base_ms: 1000,
            schema_resource_uri: mcp.schema_resource_uri,
            query_tool_name: mcp.query_tool_name,
            allowed_tables: AllowlistRules::default().allowed_tables,
            http_host: "127.0.0.1".to_string(),
            http_port: 3001,
        }
    }
}

impl AppConfig {
    /// Defaults, then `EventScribe.toml`, then the environment. Missing
    /// endpoint or key is not an error here; requests report it when they need it.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Env::raw().only(&["MCP_SERVER_URL", "GEMINI_API_KEY"]))
    }

    pub fn load() -> Result<Self> {
        Self::figment()
            .extract()
            .map_err(|e| AppError::ConfigurationError(format!("Invalid configuration: {}", e)))
    }

    pub fn llm_config(&self) -> LLMConfig {
        LLMConfig {
            base_url: self.gemini_base_url.clone(),
            model: self.model.clone(),
            api_key: self.gemini_api_key.clone(),
            max_tokens: Some(self.max_output_tokens),
            temperature: Some(self.temperature),
        }
    }

    pub fn mcp_settings(&self) -> McpSettings {
        McpSettings {
            endpoint: self.mcp_server_url.clone(),
            schema_resource_uri: self.schema_resource_uri.clone(),
            query_tool_name: self.query_tool_name.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            llm: self.llm_config(),
            retry: RetryPolicy::new(
                self.max_generation_attempts,
                Duration::from_millis(self.backoff_base_ms),
            ),
            allowlist: AllowlistRules::default().with_allowed_tables(self.allowed_tables.clone()),
        }
    }
}

pub struct ConfigService {
    keyring: KeyringManager,
}

impl ConfigService {
    pub fn new() -> Self {
        Self {
            keyring: KeyringManager::new(KEYRING_SERVICE),
        }
    }

    pub fn save_api_key(&self, key: &str) -> Result<()> {
        self.keyring.set_secret(KEYRING_GEMINI_ENTRY, key)
    }

    /// Fills in the Gemini key from the OS keyring when the file and
    /// environment did not provide one.
    pub fn resolve_api_key(&self, config: &mut AppConfig) {
        if config.gemini_api_key.is_some() {
            return;
        }
        match self.keyring.get_secret(KEYRING_GEMINI_ENTRY) {
            Ok(key) => {
                debug!("Gemini API key loaded from keyring");
                config.gemini_api_key = Some(key);
            }
            Err(e) => warn!(error = %e, "No Gemini API key configured"),
        }
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}
