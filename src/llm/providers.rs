//! Provider resolution and retriable-error classification.

/// API dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiDialect {
    Anthropic,
    OpenAiCompatible,
}

/// Split a `provider/model` routing string. A bare model name defaults to
/// the anthropic provider.
pub fn split_model(model: &str) -> (&str, &str) {
    model.split_once('/').unwrap_or(("anthropic", model))
}

/// Which API dialect a provider speaks. Everything that isn't Anthropic is
/// assumed OpenAI-compatible, which holds for the providers below and for
/// self-hosted gateways configured via a base-URL override.
pub fn dialect_for(provider: &str) -> ApiDialect {
    match provider {
        "anthropic" => ApiDialect::Anthropic,
        _ => ApiDialect::OpenAiCompatible,
    }
}

/// Default API base URL per known provider.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("https://api.anthropic.com"),
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        _ => None,
    }
}

/// Whether a provider error message indicates a retriable failure.
pub fn is_retriable_error(error_message: &str) -> bool {
    let lower = error_message.to_lowercase();
    // Rate limits and server errors
    lower.contains("429")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
        || lower.contains("rate limit")
        || lower.contains("overloaded")
        || lower.contains("timeout")
        || lower.contains("connection")
        // Empty/malformed responses are transient provider issues
        || lower.contains("failed to read response body")
}

/// Max retries on retriable provider errors.
pub const MAX_RETRIES: usize = 3;

/// Base delay for exponential backoff between retries (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 500;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_model_honors_the_provider_prefix() {
        assert_eq!(split_model("openai/gpt-4.1"), ("openai", "gpt-4.1"));
        assert_eq!(
            split_model("anthropic/claude-sonnet-4-20250514"),
            ("anthropic", "claude-sonnet-4-20250514")
        );
    }

    #[test]
    fn bare_model_defaults_to_anthropic() {
        assert_eq!(
            split_model("claude-sonnet-4-20250514"),
            ("anthropic", "claude-sonnet-4-20250514")
        );
    }

    #[test]
    fn rate_limits_and_server_errors_are_retriable() {
        assert!(is_retriable_error("HTTP 429: rate limit exceeded"));
        assert!(is_retriable_error("upstream returned 503"));
        assert!(is_retriable_error("connection reset by peer"));
        assert!(!is_retriable_error("invalid api key"));
    }
}
