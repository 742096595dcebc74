//! Parsing the reasoner's reply into a routing decision.

use serde::Deserialize;

/// Outcome of parsing the reasoning step's structured output.
///
/// The fallback-to-default policy lives at the call site, not here — parsing
/// only reports what the reply contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedDecision {
    Parsed { agent_name: String },
    Unparseable,
}

#[derive(Deserialize)]
struct DecisionBody {
    agent_name: Option<String>,
}

/// Parse a reply into a routing decision. The reply is expected to be a JSON
/// object carrying an `agent_name` field, possibly wrapped in a fenced code
/// block. Anything else is `Unparseable`.
pub fn parse_decision(content: &str) -> ParsedDecision {
    let candidate = strip_fence(content.trim());

    match serde_json::from_str::<DecisionBody>(candidate) {
        Ok(DecisionBody {
            agent_name: Some(name),
        }) if !name.trim().is_empty() => ParsedDecision::Parsed {
            agent_name: name.trim().to_string(),
        },
        _ => ParsedDecision::Unparseable,
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn parses_a_plain_json_object() {
        assert_eq!(
            parse_decision(r#"{"agent_name": "sales-agent"}"#),
            ParsedDecision::Parsed {
                agent_name: "sales-agent".into()
            }
        );
    }

    #[test]
    fn parses_a_fenced_json_object() {
        let reply = indoc! {r#"
            ```json
            {"agent_name": "support-agent"}
            ```
        "#};

        assert_eq!(
            parse_decision(reply),
            ParsedDecision::Parsed {
                agent_name: "support-agent".into()
            }
        );
    }

    #[test]
    fn tolerates_extra_fields_and_whitespace() {
        let reply = r#"  {"agent_name": " billing-agent ", "confidence": 0.9}  "#;

        assert_eq!(
            parse_decision(reply),
            ParsedDecision::Parsed {
                agent_name: "billing-agent".into()
            }
        );
    }

    #[test]
    fn prose_is_unparseable() {
        assert_eq!(
            parse_decision("I think the sales agent should handle this."),
            ParsedDecision::Unparseable
        );
    }

    #[test]
    fn json_without_agent_name_is_unparseable() {
        assert_eq!(
            parse_decision(r#"{"agent": "sales-agent"}"#),
            ParsedDecision::Unparseable
        );
    }

    #[test]
    fn empty_agent_name_is_unparseable() {
        assert_eq!(
            parse_decision(r#"{"agent_name": "  "}"#),
            ParsedDecision::Unparseable
        );
    }
}
