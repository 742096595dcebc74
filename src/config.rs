//! Configuration loading and validation.

use crate::error::{ConfigError, Result};

/// Switchboard configuration. Built once at process start and passed by
/// reference into every component — no ambient/global state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path.
    pub data_dir: std::path::PathBuf,

    /// Reasoning model/provider selection.
    pub llm: LlmConfig,

    /// History pruning thresholds.
    pub history: HistoryConfig,

    /// Checkpoint TTL and throughput budget.
    pub checkpoint: CheckpointConfig,

    /// Downstream workflow engine settings.
    pub dispatch: DispatchConfig,
}

/// Reasoning provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model routing string, `provider/model`. A bare model name defaults to
    /// the anthropic provider.
    pub model: String,

    /// Anthropic API key (from env).
    pub anthropic_key: Option<String>,

    /// API key for OpenAI-compatible providers (from env).
    pub openai_key: Option<String>,

    /// Base URL override for the selected provider.
    pub base_url: Option<String>,
}

/// History pruning thresholds.
#[derive(Debug, Clone, Copy)]
pub struct HistoryConfig {
    /// Messages retained when pruning triggers.
    pub min_keep: usize,

    /// Message count above which pruning triggers.
    pub prune_trigger: usize,
}

/// Checkpoint store configuration.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointConfig {
    /// Absolute expiry refreshed on every save, in seconds.
    pub ttl_seconds: u64,

    /// Read operations per second shared across all conversations.
    pub read_units: u32,

    /// Write operations per second shared across all conversations.
    pub write_units: u32,

    /// How long an operation may queue on the budget before failing.
    pub wait_ceiling_ms: u64,
}

/// Downstream workflow engine configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Base URL of the workflow engine.
    pub endpoint: String,

    /// Workflow to start one execution of per routed message.
    pub workflow_id: String,

    /// Target agent used when the reasoner's reply cannot be parsed.
    pub default_agent: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an injected lookup. `load()` wires this to
    /// the process environment; tests pass a map instead of mutating env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = lookup("SWITCHBOARD_DATA_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::PathBuf::from("./data"));

        let model_name = lookup("MODEL_NAME").unwrap_or_else(|| "claude-sonnet-4-20250514".into());
        let model = if model_name.contains('/') {
            model_name
        } else {
            let provider = lookup("PROVIDER_NAME").unwrap_or_else(|| "anthropic".into());
            format!("{provider}/{model_name}")
        };

        let llm = LlmConfig {
            model,
            anthropic_key: lookup("ANTHROPIC_API_KEY"),
            openai_key: lookup("OPENAI_API_KEY"),
            base_url: lookup("PROVIDER_BASE_URL"),
        };

        let history = HistoryConfig {
            min_keep: parse(&lookup, "MSG_HISTORY_TO_KEEP", 20)?,
            prune_trigger: parse(&lookup, "DELETE_TRIGGER_COUNT", 30)?,
        };

        if history.min_keep == 0 {
            return Err(ConfigError::Invalid("MSG_HISTORY_TO_KEEP must be at least 1".into()).into());
        }
        if history.min_keep > history.prune_trigger {
            return Err(ConfigError::Invalid(format!(
                "MSG_HISTORY_TO_KEEP ({}) must not exceed DELETE_TRIGGER_COUNT ({})",
                history.min_keep, history.prune_trigger
            ))
            .into());
        }

        let checkpoint = CheckpointConfig {
            ttl_seconds: parse(&lookup, "CHECKPOINT_TTL_SECONDS", 86_400)?,
            read_units: parse(&lookup, "CHECKPOINT_READ_UNITS", 100)?,
            write_units: parse(&lookup, "CHECKPOINT_WRITE_UNITS", 100)?,
            wait_ceiling_ms: parse(&lookup, "CHECKPOINT_WAIT_CEILING_MS", 5_000)?,
        };

        if checkpoint.read_units == 0 || checkpoint.write_units == 0 {
            return Err(
                ConfigError::Invalid("checkpoint throughput units must be at least 1".into()).into(),
            );
        }

        let dispatch = DispatchConfig {
            endpoint: lookup("WORKFLOW_ENDPOINT")
                .unwrap_or_else(|| "http://127.0.0.1:8800".into()),
            workflow_id: lookup("WORKFLOW_ID").unwrap_or_else(|| "message-router".into()),
            default_agent: lookup("DEFAULT_AGENT").unwrap_or_else(|| "default-agent".into()),
        };

        Ok(Self {
            data_dir,
            llm,
            history,
            checkpoint,
            dispatch,
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{key} is not a valid number: {raw}")).into()),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = Config::from_lookup(lookup_from(&[])).expect("defaults should load");

        assert_eq!(config.history.min_keep, 20);
        assert_eq!(config.history.prune_trigger, 30);
        assert_eq!(config.checkpoint.ttl_seconds, 86_400);
        assert_eq!(config.checkpoint.read_units, 100);
        assert_eq!(config.checkpoint.write_units, 100);
        assert_eq!(config.llm.model, "anthropic/claude-sonnet-4-20250514");
    }

    #[test]
    fn bare_model_name_gets_the_provider_prefix() {
        let config = Config::from_lookup(lookup_from(&[
            ("MODEL_NAME", "gpt-4.1"),
            ("PROVIDER_NAME", "openai"),
        ]))
        .expect("config should load");

        assert_eq!(config.llm.model, "openai/gpt-4.1");
    }

    #[test]
    fn min_keep_above_trigger_is_a_startup_error() {
        let error = Config::from_lookup(lookup_from(&[
            ("MSG_HISTORY_TO_KEEP", "40"),
            ("DELETE_TRIGGER_COUNT", "30"),
        ]))
        .expect_err("min_keep > prune_trigger must be rejected");

        assert!(error.to_string().contains("must not exceed"));
    }

    #[test]
    fn non_numeric_threshold_is_rejected() {
        let error = Config::from_lookup(lookup_from(&[("MSG_HISTORY_TO_KEEP", "twenty")]))
            .expect_err("non-numeric value must be rejected");

        assert!(error.to_string().contains("MSG_HISTORY_TO_KEEP"));
    }
}
