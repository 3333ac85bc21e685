//! Prompt assembly for one agent run.

use crate::context::AgentContext;
use crate::message::Message;
use crate::prompts;
use crate::tool::ToolSet;

/// Build the system message: a persisted base prompt with capability guides
/// appended, or a freshly built prompt from the agent description, tool
/// catalog, and guides. Guides are joined with a two-blank-line separator
/// either way.
pub(crate) fn build_system_message(ctx: &AgentContext, tools: &ToolSet) -> Message {
    let agent = ctx.agent();
    let guides: Vec<String> = agent.capabilities().iter().map(|c| c.guide()).collect();
    let text = match agent.base_system_prompt() {
        Some(base) => prompts::append_guides(&base, &guides),
        None => prompts::agent_system_prompt(
            agent.name(),
            agent.description(),
            &tools.names(),
            &guides,
        ),
    };
    Message::system(text)
}

/// Build the user message from the workflow-node task, the main task
/// prompt, and the current variables.
pub(crate) fn build_user_message(ctx: &AgentContext) -> Message {
    let variables = ctx.task().variables();
    let text = prompts::agent_user_prompt(ctx.node(), &ctx.task().task_prompt(), &variables);
    Message::user(text)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::{Agent, BaseAgent};
    use crate::callback::NoopCallback;
    use crate::capability::StaticCapability;
    use crate::chain::AgentChain;
    use crate::config::Config;
    use crate::context::TaskContext;

    fn agent_ctx(agent: BaseAgent) -> AgentContext {
        let task = Arc::new(TaskContext::new(
            "task-1",
            "main task",
            Arc::new(Config::default()),
            Arc::new(NoopCallback),
        ));
        let agent: Arc<dyn Agent> = Arc::new(agent);
        let chain = Arc::new(AgentChain::new(agent.name(), None));
        AgentContext::new(task, agent, chain, None)
    }

    #[test]
    fn fresh_prompt_includes_description_and_guides() {
        let capability = Arc::new(StaticCapability::new("fs", vec![], "Use the filesystem."));
        let ctx = agent_ctx(
            BaseAgent::new("Coder", "Writes programs").with_capability(capability),
        );
        let msg = build_system_message(&ctx, &ToolSet::new());
        let text = msg.text();
        assert!(text.contains("Coder"));
        assert!(text.contains("Writes programs"));
        assert!(text.contains("\n\n\nUse the filesystem."));
    }

    #[test]
    fn persisted_prompt_wins_and_still_gets_guides() {
        let capability = Arc::new(StaticCapability::new("fs", vec![], "Guide."));
        let ctx = agent_ctx(
            BaseAgent::new("Coder", "ignored")
                .with_base_system_prompt("PERSISTED")
                .with_capability(capability),
        );
        let msg = build_system_message(&ctx, &ToolSet::new());
        let text = msg.text();
        assert!(text.starts_with("PERSISTED"));
        assert!(text.contains("\n\n\nGuide."));
        assert!(!text.contains("ignored"));
    }

    #[test]
    fn user_message_carries_main_task() {
        let ctx = agent_ctx(BaseAgent::new("Coder", "d"));
        let msg = build_user_message(&ctx);
        assert!(msg.text().contains("main task"));
    }
}
