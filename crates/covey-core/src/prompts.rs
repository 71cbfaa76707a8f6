// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use covey_config::AgentConfig;

/// Assemble the base system prompt for an agent turn.
///
/// The configured system prompt wins; otherwise a minimal identity line is
/// synthesized from the agent's name and role.  `warnings` (context-window
/// notes and similar) are appended as their own paragraph so hook
/// subscribers that rewrite the prompt can keep or drop them wholesale.
pub fn system_prompt(agent: &AgentConfig, warnings: &[String]) -> String {
    let mut prompt = if agent.system_prompt.trim().is_empty() {
        if agent.role.trim().is_empty() {
            format!("You are {}.", agent.name)
        } else {
            format!("You are {}, {}.", agent.name, agent.role.trim())
        }
    } else {
        agent.system_prompt.clone()
    };

    if !agent.tools.is_empty() {
        prompt.push_str(
            "\n\nUse the provided tools when a task requires external \
             information or side-effects. Never fabricate tool output.",
        );
    }

    for warning in warnings {
        prompt.push_str("\n\n");
        prompt.push_str(warning);
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_prompt_wins() {
        let agent = AgentConfig {
            system_prompt: "You are a pirate.".into(),
            ..AgentConfig::default()
        };
        assert!(system_prompt(&agent, &[]).starts_with("You are a pirate."));
    }

    #[test]
    fn identity_synthesized_from_name_and_role() {
        let agent = AgentConfig {
            name: "Scout".into(),
            role: "a research specialist".into(),
            system_prompt: String::new(),
            ..AgentConfig::default()
        };
        assert!(system_prompt(&agent, &[]).starts_with("You are Scout, a research specialist."));
    }

    #[test]
    fn tool_guidance_only_with_tools() {
        let mut agent = AgentConfig::default();
        assert!(!system_prompt(&agent, &[]).contains("provided tools"));
        agent.tools = vec!["web_search".into()];
        assert!(system_prompt(&agent, &[]).contains("provided tools"));
    }

    #[test]
    fn warnings_are_appended() {
        let agent = AgentConfig::default();
        let text = system_prompt(&agent, &["Note: small context window.".into()]);
        assert!(text.ends_with("Note: small context window."));
    }
}
