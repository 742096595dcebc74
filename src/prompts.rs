//! Router prompt templating.

use crate::error::Result;
use crate::identity::ChannelBinding;
use anyhow::Context as _;
use minijinja::{Environment, Value, context};

/// The routing supervisor's system prompt, embedded at compile time.
const ROUTER_TEMPLATE: &str = include_str!("prompts/router.j2");

/// Renders the router's system prompt.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("router", ROUTER_TEMPLATE)
            .context("failed to compile router prompt template")?;
        Ok(Self { env })
    }

    /// Render the system prompt for one pipeline run, handing the reasoner
    /// the profile's known channel identities and the fallback target.
    pub fn render_router(
        &self,
        channel_type: &str,
        bindings: &[ChannelBinding],
        default_agent: &str,
    ) -> Result<String> {
        let template = self
            .env
            .get_template("router")
            .context("router prompt template missing")?;

        template
            .render(context! {
                channel_type => channel_type,
                bindings => Value::from_serialize(bindings),
                default_agent => default_agent,
            })
            .context("failed to render router prompt")
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_prompt_lists_the_profile_bindings() {
        let engine = PromptEngine::new().expect("engine should build");
        let bindings = vec![
            ChannelBinding {
                user_id: "u1".into(),
                channel: "whatsapp".into(),
            },
            ChannelBinding {
                user_id: "u2".into(),
                channel: "email".into(),
            },
        ];

        let prompt = engine
            .render_router("whatsapp", &bindings, "default-agent")
            .expect("render");

        assert!(prompt.contains("UserID: u1, Channel: whatsapp"));
        assert!(prompt.contains("UserID: u2, Channel: email"));
        assert!(prompt.contains("agent_name"));
        assert!(prompt.contains("default-agent"));
    }

    #[test]
    fn rendered_prompt_survives_an_empty_binding_list() {
        let engine = PromptEngine::new().expect("engine should build");

        let prompt = engine
            .render_router("email", &[], "default-agent")
            .expect("render");

        assert!(prompt.contains("email"));
    }
}
