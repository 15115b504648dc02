//! Runtime configuration for the agent workflow
//!
//! Values come from [`AgentConfig::default`] and can be overridden through
//! `SANDFORGE_*` environment variables with [`AgentConfig::from_env`].

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::tracing::TelemetryConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Error raised for malformed environment overrides
#[derive(Debug, thiserror::Error)]
#[error("invalid value for {key}: {value:?}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
}

/// Configuration for the coding-agent workflow
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model used by the coding agent
    pub model: String,
    /// Model used by the title and response generators
    pub post_processing_model: String,
    /// Sampling temperature of the coding agent
    pub temperature: f32,
    /// Root of the OpenAI-compatible API
    pub api_base_url: String,
    /// Bearer token for the API
    pub api_key: Option<String>,
    /// Custom coding-agent system prompt (uses default if None)
    pub system_prompt: Option<String>,
    /// Maximum number of agent turns before the network stops
    pub max_iterations: usize,
    /// Number of prior conversation messages fed to the agent
    pub history_limit: usize,
    /// Template the sandbox is created from
    pub sandbox_template: String,
    /// Lifetime of a sandbox, set once at creation
    pub sandbox_timeout_secs: u64,
    /// Port of the app served from the sandbox
    pub sandbox_port: u16,
    /// Directory holding local sandboxes
    pub sandbox_root: PathBuf,
    /// Domain appended to sandbox hostnames
    pub sandbox_host_suffix: String,
    /// Directory of template trees new sandboxes are seeded from
    pub sandbox_templates_dir: Option<PathBuf>,
    /// Attempts per durable step (first try included)
    pub step_retries: u32,
    /// Delay between step attempts in milliseconds
    pub step_retry_delay_ms: u64,
    /// Where step journals are kept; in-memory only if None
    pub journal_dir: Option<PathBuf>,
    /// Where the JSON message store keeps project conversations
    pub store_dir: PathBuf,
    /// OTLP gRPC endpoint traces are exported to; console only if None
    pub otlp_endpoint: Option<String>,
    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let base = PathBuf::from(home).join(".sandforge");
        Self {
            model: "gpt-4.1".to_string(),
            post_processing_model: "gpt-4o".to_string(),
            temperature: 0.1,
            api_base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            system_prompt: None,
            max_iterations: 15,
            history_limit: 5,
            sandbox_template: "nextjs".to_string(),
            sandbox_timeout_secs: 30 * 60,
            sandbox_port: 3000,
            sandbox_root: base.join("sandboxes"),
            sandbox_host_suffix: "localhost".to_string(),
            sandbox_templates_dir: None,
            step_retries: 3,
            step_retry_delay_ms: 250,
            journal_dir: Some(base.join("journal")),
            store_dir: base.join("messages"),
            otlp_endpoint: None,
            log_json: false,
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by `SANDFORGE_*` variables
    ///
    /// `OPENAI_API_KEY` and `OPENAI_BASE_URL` are honoured when the
    /// sandforge-specific variables are unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = var("SANDFORGE_MODEL") {
            config.model = v;
        }
        if let Some(v) = var("SANDFORGE_POST_PROCESSING_MODEL") {
            config.post_processing_model = v;
        }
        if let Some(v) = parsed("SANDFORGE_TEMPERATURE")? {
            config.temperature = v;
        }
        if let Some(v) = var("SANDFORGE_API_BASE_URL").or_else(|| var("OPENAI_BASE_URL")) {
            config.api_base_url = v;
        }
        config.api_key = var("SANDFORGE_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        config.system_prompt = var("SANDFORGE_SYSTEM_PROMPT");
        if let Some(v) = parsed("SANDFORGE_MAX_ITERATIONS")? {
            config.max_iterations = v;
        }
        if let Some(v) = parsed("SANDFORGE_HISTORY_LIMIT")? {
            config.history_limit = v;
        }
        if let Some(v) = var("SANDFORGE_SANDBOX_TEMPLATE") {
            config.sandbox_template = v;
        }
        if let Some(v) = parsed("SANDFORGE_SANDBOX_TIMEOUT_SECS")? {
            config.sandbox_timeout_secs = v;
        }
        if let Some(v) = parsed("SANDFORGE_SANDBOX_PORT")? {
            config.sandbox_port = v;
        }
        if let Some(v) = var("SANDFORGE_SANDBOX_ROOT") {
            config.sandbox_root = PathBuf::from(v);
        }
        if let Some(v) = var("SANDFORGE_SANDBOX_HOST_SUFFIX") {
            config.sandbox_host_suffix = v;
        }
        if let Some(v) = var("SANDFORGE_SANDBOX_TEMPLATES_DIR") {
            config.sandbox_templates_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = parsed("SANDFORGE_STEP_RETRIES")? {
            config.step_retries = v;
        }
        if let Some(v) = parsed("SANDFORGE_STEP_RETRY_DELAY_MS")? {
            config.step_retry_delay_ms = v;
        }
        if let Some(v) = var("SANDFORGE_JOURNAL_DIR") {
            config.journal_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("SANDFORGE_STORE_DIR") {
            config.store_dir = PathBuf::from(v);
        }
        if let Some(v) = var("SANDFORGE_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(v);
        }
        if let Some(v) = flag("SANDFORGE_LOG_JSON")? {
            config.log_json = v;
        }

        Ok(config)
    }

    /// Logging options for `service_name`
    pub fn telemetry(&self, service_name: &str) -> TelemetryConfig {
        TelemetryConfig {
            service_name: service_name.to_string(),
            otlp_endpoint: self.otlp_endpoint.clone(),
            json: self.log_json,
        }
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs)
    }

    pub fn step_retry_delay(&self) -> Duration {
        Duration::from_millis(self.step_retry_delay_ms)
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn parsed<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match var(key) {
        Some(value) => value.parse::<T>().map(Some).map_err(|_| ConfigError {
            key: key.to_string(),
            value,
        }),
        None => Ok(None),
    }
}

fn flag(key: &str) -> Result<Option<bool>, ConfigError> {
    match var(key) {
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError {
                key: key.to_string(),
                value,
            }),
        },
        None => Ok(None),
    }
}
