//! Prompt text for planning, agent runs, and maintenance passes.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde_json::Value;

use crate::workflow::WorkflowAgent;

/// Planning system prompt. `{agents}` is replaced with the agent catalog.
pub const PLANNING_SYSTEM_PROMPT: &str = r#"You are a task planner. Decompose the user's task into a workflow of agent invocations and output ONLY an XML document in this exact format:

<root>
  <name>short task name</name>
  <thought>one paragraph of planning rationale</thought>
  <agents>
    <agent name="AgentName" id="0" dependsOn="">
      <task>what this agent must achieve</task>
      <nodes>
        <node>concrete step</node>
        <node output="varName">step that stores a result</node>
        <node input="varName">step that uses a stored result</node>
        <forEach items="varName or literal list">
          <node>step repeated per item</node>
        </forEach>
      </nodes>
    </agent>
  </agents>
</root>

Rules:
- Use only the agents listed below; reference them by exact name.
- Give each agent a unique numeric id. Use dependsOn="id,id" for ordering; agents without ordering constraints may run in parallel.
- Keep the plan as short as the task allows.

Available agents:
{agents}"#;

/// Header prepended to drained user interventions.
pub const INTERVENTION_HEADER: &str = "The user interjected with the following instructions. \
Re-plan your next actions around these points before continuing:";

/// User message asking for a progress snapshot during compression.
pub const SNAPSHOT_REQUEST: &str = "The conversation is being compressed. Call the \
`task_snapshot` tool now: report which step ids are done and write a dense snapshot of \
everything attempted, learned, and still pending, so the task can continue from the \
snapshot alone.";

/// User message asking for a completion judgement (expert mode).
pub const RESULT_CHECK_REQUEST: &str = "Before finishing, judge the answer above against the \
assigned task. Call the `task_result_check` tool with completed=true only if every part of \
the task is actually done.";

/// User message asking for a todo rewrite (expert mode).
pub const TODO_MAINTENANCE_REQUEST: &str = "Maintenance pass: call the `todo_list_manager` \
tool with the updated todo list, checking off what is finished and keeping remaining work \
in priority order.";

/// One catalog line per agent for the planning prompt.
#[must_use]
pub fn agent_catalog(agents: &[(String, String, Vec<String>)]) -> String {
    let mut out = String::new();
    for (name, description, tools) in agents {
        let _ = write!(out, "- {name}: {description}");
        if !tools.is_empty() {
            let _ = write!(out, " (tools: {})", tools.join(", "));
        }
        out.push('\n');
    }
    out
}

/// Build the planning system prompt from the agent catalog and optional
/// plan-prompt augmentations.
#[must_use]
pub fn planning_system_prompt(
    catalog: &str,
    ext_prompt: Option<&str>,
    task_website: Option<&str>,
) -> String {
    let mut prompt = PLANNING_SYSTEM_PROMPT.replace("{agents}", catalog);
    if let Some(website) = task_website {
        let _ = write!(prompt, "\n\nThe task concerns this website: {website}");
    }
    if let Some(ext) = ext_prompt {
        let _ = write!(prompt, "\n\n{ext}");
    }
    prompt
}

/// Frame the raw task prompt for the planning request.
#[must_use]
pub fn planning_user_prompt(task_prompt: &str) -> String {
    format!("Plan a workflow for the following task:\n\n{task_prompt}")
}

/// Build an agent's system prompt from its description, tool catalog, and
/// capability guides. Guides are separated by two blank lines.
#[must_use]
pub fn agent_system_prompt(
    agent_name: &str,
    agent_description: &str,
    tool_names: &[String],
    guides: &[String],
) -> String {
    let mut prompt = format!(
        "You are {agent_name}, an agent in a multi-agent workflow.\n{agent_description}\n\n\
         Work step by step: think, call tools to act, observe the results, and continue \
         until the node task is complete. When it is complete, answer with the final \
         result as plain text and stop calling tools."
    );
    if !tool_names.is_empty() {
        let _ = write!(prompt, "\n\nAvailable tools: {}", tool_names.join(", "));
    }
    for guide in guides {
        if !guide.is_empty() {
            let _ = write!(prompt, "\n\n\n{guide}");
        }
    }
    prompt
}

/// Append capability guide text to a persisted base prompt, using the same
/// two-blank-line separator.
#[must_use]
pub fn append_guides(base_prompt: &str, guides: &[String]) -> String {
    let mut prompt = base_prompt.to_owned();
    for guide in guides {
        if !guide.is_empty() {
            let _ = write!(prompt, "\n\n\n{guide}");
        }
    }
    prompt
}

/// Build the user message for an agent run from the workflow node, the main
/// task prompt, and the current variables.
#[must_use]
pub fn agent_user_prompt(
    node: Option<&WorkflowAgent>,
    task_prompt: &str,
    variables: &HashMap<String, Value>,
) -> String {
    let mut prompt = String::new();
    let _ = write!(prompt, "Main task: {task_prompt}");
    if let Some(node) = node {
        let _ = write!(prompt, "\n\nYour node task: {}", node.task);
        if !node.nodes.is_empty() {
            let _ = write!(
                prompt,
                "\n\nNode steps:\n{}",
                crate::workflow::nodes_to_xml(&node.nodes, None)
            );
        }
    }
    let mut names: Vec<&String> = variables.keys().collect();
    if !names.is_empty() {
        names.sort();
        prompt.push_str("\n\nCurrent variables: ");
        prompt.push_str(
            &names
                .iter()
                .map(|name| name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );
    }
    prompt
}

/// Join drained user interventions into one replan instruction.
#[must_use]
pub fn intervention_message(items: &[String]) -> String {
    let bullets = items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{INTERVENTION_HEADER}\n{bullets}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_tools() {
        let catalog = agent_catalog(&[(
            "Browser".to_owned(),
            "Operates web pages".to_owned(),
            vec!["navigate".to_owned(), "click".to_owned()],
        )]);
        assert!(catalog.contains("- Browser: Operates web pages (tools: navigate, click)"));
    }

    #[test]
    fn planning_prompt_injects_catalog_and_extras() {
        let prompt = planning_system_prompt("- A: does a\n", Some("extra"), Some("example.com"));
        assert!(prompt.contains("- A: does a"));
        assert!(prompt.contains("example.com"));
        assert!(prompt.ends_with("extra"));
        assert!(!prompt.contains("{agents}"));
    }

    #[test]
    fn guides_are_separated_by_two_blank_lines() {
        let prompt = agent_system_prompt(
            "Coder",
            "Writes code",
            &["read".to_owned()],
            &["Guide one".to_owned(), "Guide two".to_owned()],
        );
        assert!(prompt.contains("\n\n\nGuide one"));
        assert!(prompt.contains("\n\n\nGuide two"));
    }

    #[test]
    fn intervention_message_bullets_items() {
        let msg = intervention_message(&["stop using site A".to_owned(), "prefer B".to_owned()]);
        assert!(msg.starts_with(INTERVENTION_HEADER));
        assert!(msg.contains("- stop using site A"));
        assert!(msg.contains("- prefer B"));
    }

    #[test]
    fn user_prompt_mentions_node_and_variables() {
        let mut variables = HashMap::new();
        variables.insert("urls".to_owned(), serde_json::json!([]));
        let prompt = agent_user_prompt(None, "Do the thing", &variables);
        assert!(prompt.contains("Main task: Do the thing"));
        assert!(prompt.contains("urls"));
    }
}
