//! Switchboard: routes inbound multi-channel user messages through a
//! conversational reasoning step and dispatches the resulting routing
//! decision to a downstream workflow engine.

pub mod checkpoint;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod identity;
pub mod llm;
pub mod pipeline;
pub mod prompts;

pub use error::{Error, Result};

use serde::Deserialize;

/// Canonical conversation identity grouping all channel-scoped identities of
/// one logical user. Created when a binding is registered; the pipeline only
/// ever reads it.
pub type ProfileId = String;

/// One inbound queue item as delivered by a channel adapter.
///
/// Fields are optional because adapters occasionally emit partial envelopes.
/// Validation happens per item, so one malformed record never fails the
/// batch it arrived in.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundItem {
    pub channel_type: Option<String>,
    pub from: Option<String>,
    pub messages: Option<String>,
}

impl InboundItem {
    /// Check that every required field is present and non-empty, naming the
    /// first missing one. Empty strings count as missing.
    pub fn validate(&self) -> std::result::Result<InboundMessage, &'static str> {
        let channel_type = self
            .channel_type
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or("channel_type")?;
        let from = self
            .from
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or("from")?;
        let text = self
            .messages
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or("messages")?;

        Ok(InboundMessage {
            channel_type: channel_type.to_string(),
            from: from.to_string(),
            text: text.to_string(),
        })
    }
}

/// A validated inbound message, ready for the pipeline.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_type: String,
    pub from: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_complete_item() {
        let item = InboundItem {
            channel_type: Some("whatsapp".into()),
            from: Some("u1".into()),
            messages: Some("hello".into()),
        };

        let message = item.validate().expect("complete item should validate");
        assert_eq!(message.channel_type, "whatsapp");
        assert_eq!(message.from, "u1");
        assert_eq!(message.text, "hello");
    }

    #[test]
    fn validate_names_the_missing_field() {
        let item = InboundItem {
            channel_type: Some("whatsapp".into()),
            from: Some("u1".into()),
            messages: None,
        };

        assert_eq!(item.validate().unwrap_err(), "messages");
    }

    #[test]
    fn validate_treats_empty_string_as_missing() {
        let item = InboundItem {
            channel_type: Some("".into()),
            from: Some("u1".into()),
            messages: Some("hello".into()),
        };

        assert_eq!(item.validate().unwrap_err(), "channel_type");
    }
}
