//! Engine configuration - model service endpoint, invocation policy,
//! synchronizer debounce, channel sizing.
//!
//! Every knob has a named default; `EngineConfig::from_env` overrides them
//! from `STEPFLOW_*` environment variables.

use std::time::Duration;

use crate::events::DEFAULT_CHANNEL_CAPACITY;

/// Per-attempt bound on a model invocation.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);
/// Additional attempts after the first one fails transiently.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Window within which snapshot refresh triggers coalesce.
pub const DEFAULT_SYNC_DEBOUNCE: Duration = Duration::from_millis(250);

pub const DEFAULT_MODEL_API_URL: &str = "http://127.0.0.1:8080/v1/chat/completions";

/// Where and how to reach the model-invocation service.
#[derive(Debug, Clone)]
pub struct ModelServiceConfig {
    /// Full URL of an OpenAI-compatible chat-completions endpoint.
    pub api_url: String,
    pub api_key: String,
    /// Transport-level cap; the invoker's attempt timeout normally fires first.
    pub request_timeout: Duration,
}

impl Default for ModelServiceConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_MODEL_API_URL.to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InvokerConfig {
    pub attempt_timeout: Duration,
    pub max_retries: u32,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_SYNC_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_service: ModelServiceConfig,
    pub invoker: InvokerConfig,
    pub sync: SyncConfig,
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_service: ModelServiceConfig::default(),
            invoker: InvokerConfig::default(),
            sync: SyncConfig::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Build a config from the process environment.
    ///
    /// - `STEPFLOW_MODEL_API_URL`, `STEPFLOW_MODEL_API_KEY`
    /// - `STEPFLOW_INVOKE_TIMEOUT_SECS`, `STEPFLOW_INVOKE_MAX_RETRIES`
    /// - `STEPFLOW_SYNC_DEBOUNCE_MS`
    ///
    /// String values may reference other variables (`${VAR}`, `${VAR:-default}`).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_string("STEPFLOW_MODEL_API_URL") {
            config.model_service.api_url = url;
        }
        if let Some(key) = env_string("STEPFLOW_MODEL_API_KEY") {
            config.model_service.api_key = key;
        }
        if let Some(secs) = env_parse::<u64>("STEPFLOW_INVOKE_TIMEOUT_SECS") {
            config.invoker.attempt_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(retries) = env_parse::<u32>("STEPFLOW_INVOKE_MAX_RETRIES") {
            config.invoker.max_retries = retries;
        }
        if let Some(ms) = env_parse::<u64>("STEPFLOW_SYNC_DEBOUNCE_MS") {
            config.sync.debounce = Duration::from_millis(ms);
        }

        if config.model_service.api_key.is_empty() {
            tracing::warn!("[Config] STEPFLOW_MODEL_API_KEY is not set; model calls are unauthenticated");
        }
        config
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| resolve_env_vars(v.trim()))
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("[Config] Ignoring invalid value for {}: '{}'", name, raw);
            None
        }
    }
}

/// Resolve environment variable references in a string.
/// Supports `${ENV_VAR}` and `${ENV_VAR:-default}` syntax.
pub fn resolve_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_expr = &caps[1];
        if let Some(idx) = var_expr.find(":-") {
            let var_name = &var_expr[..idx];
            let default_val = &var_expr[idx + 2..];
            std::env::var(var_name).unwrap_or_else(|_| default_val.to_string())
        } else {
            std::env::var(var_expr).unwrap_or_else(|_| format!("${{{}}}", var_expr))
        }
    })
    .to_string()
}
