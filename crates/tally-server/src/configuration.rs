use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tally::agents::AgentConfig;
use tally::guard::ResponseGuard;
use tally::model::ModelConfig;
use tally::providers::openai::{OpenAiConfig, OPEN_AI_DEFAULT_HOST, OPEN_AI_DEFAULT_MODEL};
use tally::registry::RemoteToolConfig;
use tally::tools::price::{DEFAULT_CURRENCY, DEFAULT_PRICE_HOST};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a finance AI assistant specializing in credit cards, stocks, and cryptocurrency. \
Always respond in the user's language and translate any retrieved content to match their language.";

#[derive(Debug, Default, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress {
                host: self.host.clone(),
                port: self.port,
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default = "default_max_tokens")]
        max_tokens: Option<i32>,
        #[serde(default = "default_provider_timeout")]
        timeout_secs: u64,
    },
}

impl ProviderSettings {
    pub fn into_config(self) -> OpenAiConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                timeout_secs,
            } => OpenAiConfig {
                host,
                api_key,
                model: ModelConfig::new(model)
                    .with_temperature(temperature)
                    .with_max_tokens(max_tokens),
                timeout: Duration::from_secs(timeout_secs),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_steps: default_max_steps(),
            max_tool_result_chars: default_max_tool_result_chars(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

impl AgentSettings {
    pub fn into_config(self) -> AgentConfig {
        AgentConfig::new(self.system_prompt)
            .with_max_steps(self.max_steps)
            .with_tool_timeout(Duration::from_secs(self.tool_timeout_secs))
            .with_guard(ResponseGuard::new(self.max_tool_result_chars))
    }
}

/// Local tools. Retrieval is only registered when a search service URL is configured.
#[derive(Debug, Deserialize)]
pub struct ToolSettings {
    #[serde(default)]
    pub retrieval_url: Option<String>,
    #[serde(default = "default_retrieval_name")]
    pub retrieval_name: String,
    #[serde(default = "default_retrieval_description")]
    pub retrieval_description: String,
    #[serde(default = "default_price_name")]
    pub price_name: String,
    #[serde(default = "default_price_description")]
    pub price_description: String,
    #[serde(default = "default_price_host")]
    pub price_host: String,
    #[serde(default = "default_currency")]
    pub default_currency: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            retrieval_url: None,
            retrieval_name: default_retrieval_name(),
            retrieval_description: default_retrieval_description(),
            price_name: default_price_name(),
            price_description: default_price_description(),
            price_host: default_price_host(),
            default_currency: default_currency(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoteSettings {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_remote_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_remote_call_timeout")]
    pub call_timeout_secs: u64,
}

impl RemoteSettings {
    pub fn into_config(self) -> RemoteToolConfig {
        let config = RemoteToolConfig::new(self.url).with_timeouts(
            Duration::from_secs(self.connect_timeout_secs),
            Duration::from_secs(self.call_timeout_secs),
        );
        match self.api_key {
            Some(api_key) => config.with_api_key(&api_key),
            None => config,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub remote: Option<RemoteSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("provider.type", "openai")?
            .set_default("provider.host", default_openai_host())?
            .set_default("provider.model", default_model())?
            .add_source(
                Environment::with_prefix("TALLY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // serde reports "missing field `api_key`", optionally followed by " for key `provider`"
                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn missing_field(error: &str) -> Option<String> {
    let rest = error.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    match rest
        .strip_prefix(" for key `")
        .and_then(|key| key.split_once('`'))
    {
        Some((key, _)) => Some(format!("{}.{}", key, field)),
        None => Some(field.to_string()),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_model() -> String {
    OPEN_AI_DEFAULT_MODEL.to_string()
}

fn default_openai_host() -> String {
    OPEN_AI_DEFAULT_HOST.to_string()
}

fn default_max_tokens() -> Option<i32> {
    Some(1000)
}

fn default_provider_timeout() -> u64 {
    600
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_steps() -> usize {
    3
}

fn default_max_tool_result_chars() -> usize {
    tally::guard::DEFAULT_MAX_CHARS
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_retrieval_name() -> String {
    "getBancoPichinchaCreditCardsInfo".to_string()
}

fn default_retrieval_description() -> String {
    "This will pull information from credit cards from banco pichincha".to_string()
}

fn default_price_name() -> String {
    "getCryptoPrices".to_string()
}

fn default_price_description() -> String {
    "This will pull information from crypto prices from the api from coingecko".to_string()
}

fn default_price_host() -> String {
    DEFAULT_PRICE_HOST.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_remote_connect_timeout() -> u64 {
    10
}

fn default_remote_call_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("TALLY_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("TALLY_PROVIDER__API_KEY", "test-key");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);

        let ProviderSettings::OpenAi {
            host,
            api_key,
            model,
            temperature,
            max_tokens,
            timeout_secs,
        } = settings.provider;
        assert_eq!(host, "https://api.openai.com");
        assert_eq!(api_key, "test-key");
        assert_eq!(model, "gpt-4o-mini");
        assert_eq!(temperature, None);
        assert_eq!(max_tokens, Some(1000));
        assert_eq!(timeout_secs, 600);

        assert_eq!(settings.agent.max_steps, 3);
        assert_eq!(settings.agent.max_tool_result_chars, 2000);
        assert!(settings.agent.system_prompt.contains("user's language"));
        assert_eq!(settings.tools.price_name, "getCryptoPrices");
        assert_eq!(settings.tools.retrieval_name, "getBancoPichinchaCreditCardsInfo");
        assert!(settings.tools.retrieval_url.is_none());
        assert!(settings.remote.is_none());

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_api_key_names_env_var() {
        clean_env();

        let err = Settings::new().unwrap_err();
        assert!(
            matches!(&err, ConfigError::MissingEnvVar { env_var } if env_var == "TALLY_PROVIDER__API_KEY"),
            "unexpected error: {}",
            err
        );
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("TALLY_SERVER__PORT", "8080");
        env::set_var("TALLY_PROVIDER__API_KEY", "test-key");
        env::set_var("TALLY_PROVIDER__MODEL", "gpt-4o");
        env::set_var("TALLY_PROVIDER__TEMPERATURE", "0.2");
        env::set_var("TALLY_AGENT__MAX_STEPS", "5");
        env::set_var("TALLY_AGENT__MAX_TOOL_RESULT_CHARS", "500");
        env::set_var("TALLY_TOOLS__RETRIEVAL_URL", "http://localhost:8001/search");
        env::set_var("TALLY_REMOTE__URL", "https://server.example.com/mcp");
        env::set_var("TALLY_REMOTE__API_KEY", "remote-key");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.port, 8080);

        let openai = settings.provider.into_config();
        assert_eq!(openai.model.model_name, "gpt-4o");
        assert_eq!(openai.model.temperature, Some(0.2));
        assert_eq!(openai.model.max_tokens, Some(1000));

        let agent = settings.agent.into_config();
        assert_eq!(agent.max_steps, 5);
        assert_eq!(agent.guard.max_chars(), 500);

        assert_eq!(
            settings.tools.retrieval_url.as_deref(),
            Some("http://localhost:8001/search")
        );

        let remote = settings.remote.unwrap().into_config();
        assert_eq!(remote.url, "https://server.example.com/mcp?api_key=remote-key");
        assert_eq!(remote.connect_timeout, Duration::from_secs(10));

        clean_env();
    }

    #[test]
    fn test_missing_field_parsing() {
        assert_eq!(missing_field("missing field `api_key`").as_deref(), Some("api_key"));
        assert_eq!(
            missing_field("missing field `url` for key `remote`").as_deref(),
            Some("remote.url")
        );
        assert_eq!(missing_field("invalid type"), None);
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");

        let bad = ServerSettings {
            host: "not a host".to_string(),
            port: 3000,
        };
        assert!(bad.socket_addr().is_err());
    }
}
