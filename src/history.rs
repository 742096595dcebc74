//! Conversation message types and the history pruner.

use serde::{Deserialize, Serialize};

/// Message author role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    Human,
    Agent,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::Human => "human",
            ChatRole::Agent => "agent",
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One conversation message. The position in the containing vector is the
/// sequence position; ordering is significant and monotonic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Human,
            content: content.into(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Agent,
            content: content.into(),
        }
    }
}

/// Enforce the bounded-history policy.
///
/// Histories at or below `prune_trigger` pass through unchanged. Above it,
/// only the most recent `min_keep` messages survive, in their original
/// relative order; if a system message was among the dropped prefix it is
/// reinstated at position 0 so system context never silently disappears.
///
/// Deterministic, side-effect-free, and idempotent. `min_keep <=
/// prune_trigger` is validated at config load, not here.
pub fn prune(messages: Vec<ChatMessage>, min_keep: usize, prune_trigger: usize) -> Vec<ChatMessage> {
    if messages.len() <= prune_trigger {
        return messages;
    }

    let split = messages.len() - min_keep;
    let dropped_system = messages[..split]
        .iter()
        .find(|message| message.role == ChatRole::System)
        .cloned();

    let mut kept: Vec<ChatMessage> = messages.into_iter().skip(split).collect();

    if let Some(system) = dropped_system
        && kept.first().map(|message| message.role) != Some(ChatRole::System)
    {
        kept.insert(0, system);
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(count: usize) -> Vec<ChatMessage> {
        (0..count).map(|i| ChatMessage::human(format!("m{i}"))).collect()
    }

    #[test]
    fn short_history_passes_through_unchanged() {
        let history = numbered(30);
        assert_eq!(prune(history.clone(), 20, 30), history);
    }

    #[test]
    fn long_history_keeps_the_newest_min_keep() {
        // 31 messages, no system among the dropped 11: result is exactly the
        // last 20 in original order.
        let history = numbered(31);
        let pruned = prune(history.clone(), 20, 30);

        assert_eq!(pruned.len(), 20);
        assert_eq!(pruned.as_slice(), &history[11..]);
    }

    #[test]
    fn dropped_system_message_is_reinstated_at_position_zero() {
        let mut history = vec![ChatMessage::system("router rules")];
        history.extend(numbered(31));

        let pruned = prune(history.clone(), 20, 30);

        assert_eq!(pruned.len(), 21);
        assert_eq!(pruned[0], ChatMessage::system("router rules"));
        assert_eq!(&pruned[1..], &history[12..]);
    }

    #[test]
    fn retained_system_message_is_not_duplicated() {
        // System message sits inside the retained suffix already.
        let mut history = numbered(35);
        history[30] = ChatMessage::system("late system");

        let pruned = prune(history, 20, 30);

        assert_eq!(pruned.len(), 20);
        let systems = pruned.iter().filter(|m| m.role == ChatRole::System).count();
        assert_eq!(systems, 1);
    }

    #[test]
    fn prune_is_idempotent() {
        let mut history = vec![ChatMessage::system("rules")];
        history.extend(numbered(40));

        let once = prune(history, 20, 30);
        let twice = prune(once.clone(), 20, 30);

        assert_eq!(once, twice);
    }

    #[test]
    fn prune_is_idempotent_when_min_keep_equals_trigger() {
        let mut history = vec![ChatMessage::system("rules")];
        history.extend(numbered(30));

        let once = prune(history, 30, 30);
        let twice = prune(once.clone(), 30, 30);

        assert_eq!(once, twice);
    }

    #[test]
    fn empty_history_is_untouched() {
        assert!(prune(Vec::new(), 20, 30).is_empty());
    }
}
