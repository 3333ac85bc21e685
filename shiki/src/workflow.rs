//! Workflow model: the DAG of agent nodes produced by the planner.
//!
//! A [`Workflow`] is an ordered sequence of [`WorkflowAgent`] nodes. Each
//! node may declare `depends_on` edges to other nodes; the graph must be a
//! DAG. Execution builds a traversal tree ([`AgentNode`]) by topological
//! layering: nodes whose dependencies have all completed and that have no
//! ordering constraint between them form a parallel group, remaining
//! singletons become normal nodes.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Execution status of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Not yet executed.
    Init,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Error,
}

impl NodeStatus {
    /// Returns `true` once the node finished (successfully or not).
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// One step of an agent's node body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskNode {
    /// A plain step.
    Normal {
        /// Document-order id used by snapshot annotation.
        id: usize,
        /// The step text.
        text: String,
        /// Input variable name, if the step consumes one.
        input: Option<String>,
        /// Output variable name, if the step produces one.
        output: Option<String>,
    },
    /// A repeated step over a list.
    ForEach {
        /// Document-order id.
        id: usize,
        /// The items expression (literal list or variable name).
        items: String,
        /// The steps repeated per item.
        nodes: Vec<TaskNode>,
    },
    /// An event watch with trigger steps.
    Watch {
        /// Document-order id.
        id: usize,
        /// The event kind being watched.
        event: String,
        /// Whether the watch re-arms after triggering.
        repeat: bool,
        /// Human description of the watch condition.
        description: String,
        /// The steps run when the watch fires.
        triggers: Vec<TaskNode>,
    },
}

impl TaskNode {
    /// The document-order id.
    #[must_use]
    pub const fn id(&self) -> usize {
        match self {
            Self::Normal { id, .. } | Self::ForEach { id, .. } | Self::Watch { id, .. } => *id,
        }
    }

    /// Whether this node (or a child) declares variable input/output.
    #[must_use]
    pub fn has_variable_io(&self) -> bool {
        match self {
            Self::Normal { input, output, .. } => input.is_some() || output.is_some(),
            Self::ForEach { nodes, .. } => nodes.iter().any(Self::has_variable_io),
            Self::Watch { triggers, .. } => triggers.iter().any(Self::has_variable_io),
        }
    }

    fn write_xml(&self, out: &mut String, done_ids: Option<&[usize]>) {
        let status = |id: usize| -> &'static str {
            match done_ids {
                Some(ids) if ids.contains(&id) => " status=\"done\"",
                Some(_) => " status=\"todo\"",
                None => "",
            }
        };
        match self {
            Self::Normal {
                id,
                text,
                input,
                output,
            } => {
                let _ = write!(out, "<node{}", status(*id));
                if let Some(input) = input {
                    let _ = write!(out, " input=\"{}\"", escape_attr(input));
                }
                if let Some(output) = output {
                    let _ = write!(out, " output=\"{}\"", escape_attr(output));
                }
                let _ = write!(out, ">{}</node>", escape_text(text));
            }
            Self::ForEach { id, items, nodes } => {
                let _ = write!(
                    out,
                    "<forEach{} items=\"{}\">",
                    status(*id),
                    escape_attr(items)
                );
                for node in nodes {
                    node.write_xml(out, done_ids);
                }
                out.push_str("</forEach>");
            }
            Self::Watch {
                id,
                event,
                repeat,
                description,
                triggers,
            } => {
                let _ = write!(
                    out,
                    "<watch{} event=\"{}\" loop=\"{}\">",
                    status(*id),
                    escape_attr(event),
                    repeat
                );
                let _ = write!(out, "<description>{}</description>", escape_text(description));
                out.push_str("<trigger>");
                for node in triggers {
                    node.write_xml(out, done_ids);
                }
                out.push_str("</trigger></watch>");
            }
        }
    }
}

/// Escape an XML attribute value.
fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

/// Escape XML text content.
fn escape_text(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;")
}

/// Serialize a node list, optionally annotating each node with
/// `status="done|todo"` based on the given done ids.
#[must_use]
pub fn nodes_to_xml(nodes: &[TaskNode], done_ids: Option<&[usize]>) -> String {
    let mut out = String::from("<nodes>");
    for node in nodes {
        node.write_xml(&mut out, done_ids);
    }
    out.push_str("</nodes>");
    out
}

/// One agent node of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAgent {
    /// Node id, unique within the workflow.
    pub id: String,
    /// Name of the declared agent that executes this node.
    pub name: String,
    /// The node's task text.
    pub task: String,
    /// Ids of nodes that must complete before this one starts.
    pub depends_on: Vec<String>,
    /// Execution status.
    pub status: NodeStatus,
    /// The opaque XML body, kept for re-parsing on replan.
    pub xml: String,
    /// Parsed body steps.
    pub nodes: Vec<TaskNode>,
}

impl WorkflowAgent {
    /// Whether any body step declares variable input/output.
    #[must_use]
    pub fn has_variable_io(&self) -> bool {
        self.nodes.iter().any(TaskNode::has_variable_io)
    }

    /// Whether the body contains a repeated step.
    #[must_use]
    pub fn has_foreach(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n, TaskNode::ForEach { .. }))
    }

    /// Whether the body contains an event watch.
    #[must_use]
    pub fn has_watch(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n, TaskNode::Watch { .. }))
    }

    /// Serialize this node as an `<agent>` element.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "<agent name=\"{}\" id=\"{}\"",
            escape_attr(&self.name),
            escape_attr(&self.id)
        );
        if !self.depends_on.is_empty() {
            let _ = write!(out, " dependsOn=\"{}\"", escape_attr(&self.depends_on.join(",")));
        }
        out.push('>');
        let _ = write!(out, "<task>{}</task>", escape_text(&self.task));
        out.push_str(&nodes_to_xml(&self.nodes, None));
        out.push_str("</agent>");
        out
    }
}

/// The runtime traversal tree, rebuilt whenever the workflow is modified.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentNode {
    /// The node kind: one agent or a parallel group.
    pub kind: AgentNodeKind,
    /// The next node in traversal order.
    pub next: Option<Box<AgentNode>>,
}

/// Kind of a traversal node.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentNodeKind {
    /// A single workflow node.
    Normal {
        /// The workflow node id.
        node_id: String,
    },
    /// A group of workflow nodes with no ordering constraint between them.
    Parallel {
        /// The workflow node ids, in declaration order.
        node_ids: Vec<String>,
    },
}

impl AgentNode {
    /// All node ids covered by this traversal node.
    #[must_use]
    pub fn node_ids(&self) -> Vec<&str> {
        match &self.kind {
            AgentNodeKind::Normal { node_id } => vec![node_id.as_str()],
            AgentNodeKind::Parallel { node_ids } => {
                node_ids.iter().map(String::as_str).collect()
            }
        }
    }
}

/// A planned workflow: an ordered list of agent nodes forming a DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Id of the owning task.
    pub task_id: String,
    /// Short workflow name produced by the planner.
    pub name: String,
    /// The planner's reasoning text, if any.
    pub thought: Option<String>,
    /// The agent nodes in declaration order.
    pub agents: Vec<WorkflowAgent>,
    /// Set when the workflow was changed mid-execution; forces the
    /// orchestrator to rebuild its traversal from remaining `init` nodes.
    pub modified: bool,
}

impl Workflow {
    /// Look up a node by id.
    #[must_use]
    pub fn agent(&self, node_id: &str) -> Option<&WorkflowAgent> {
        self.agents.iter().find(|a| a.id == node_id)
    }

    /// Mutable lookup by id.
    #[must_use]
    pub fn agent_mut(&mut self, node_id: &str) -> Option<&mut WorkflowAgent> {
        self.agents.iter_mut().find(|a| a.id == node_id)
    }

    /// Validate the structure: non-empty, unique ids, every `depends_on`
    /// resolves, and the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(Error::workflow("workflow has no agents"));
        }
        let mut ids = HashSet::new();
        for agent in &self.agents {
            if !ids.insert(agent.id.as_str()) {
                return Err(Error::workflow(format!("duplicate node id '{}'", agent.id)));
            }
        }
        for agent in &self.agents {
            for dep in &agent.depends_on {
                if dep == &agent.id {
                    return Err(Error::workflow(format!(
                        "node '{}' depends on itself",
                        agent.id
                    )));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(Error::workflow(format!(
                        "node '{}' depends on unknown node '{dep}'",
                        agent.id
                    )));
                }
            }
        }
        // Acyclicity falls out of the layering.
        self.layers_from(&HashSet::new(), |_| true).map(|_| ())
    }

    /// Topological layers over the nodes selected by `filter`, treating the
    /// given ids (plus every already-completed node) as satisfied.
    fn layers_from(
        &self,
        completed: &HashSet<String>,
        filter: impl Fn(&WorkflowAgent) -> bool,
    ) -> Result<Vec<Vec<String>>> {
        let mut satisfied: HashSet<String> = completed.clone();
        let mut remaining: Vec<&WorkflowAgent> =
            self.agents.iter().filter(|a| filter(a)).collect();
        // Nodes outside the filter count as satisfied dependencies.
        for agent in &self.agents {
            if !filter(agent) {
                satisfied.insert(agent.id.clone());
            }
        }

        let mut layers = Vec::new();
        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|a| a.depends_on.iter().all(|d| satisfied.contains(d)))
                .map(|a| a.id.clone())
                .collect();
            if ready.is_empty() {
                return Err(Error::workflow("dependency cycle in workflow"));
            }
            for id in &ready {
                satisfied.insert(id.clone());
            }
            remaining.retain(|a| !ready.contains(&a.id));
            layers.push(ready);
        }
        Ok(layers)
    }

    /// Build the traversal tree from all nodes still in status `init`.
    ///
    /// Layers with more than one node become parallel groups. Returns `None`
    /// when nothing is left to execute.
    pub fn build_tree(&self) -> Result<Option<AgentNode>> {
        let completed: HashSet<String> = self
            .agents
            .iter()
            .filter(|a| a.status.is_completed())
            .map(|a| a.id.clone())
            .collect();
        let layers = self.layers_from(&completed, |a| a.status == NodeStatus::Init)?;

        let mut head: Option<AgentNode> = None;
        for layer in layers.into_iter().rev() {
            let kind = if layer.len() == 1 {
                AgentNodeKind::Normal {
                    node_id: layer.into_iter().next().unwrap_or_default(),
                }
            } else {
                AgentNodeKind::Parallel { node_ids: layer }
            };
            head = Some(AgentNode {
                kind,
                next: head.map(Box::new),
            });
        }
        Ok(head)
    }

    /// Serialize the workflow as the planner DSL.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<root>");
        let _ = write!(out, "<name>{}</name>", escape_text(&self.name));
        if let Some(thought) = &self.thought {
            let _ = write!(out, "<thought>{}</thought>", escape_text(thought));
        }
        out.push_str("<agents>");
        for agent in &self.agents {
            out.push_str(&agent.to_xml());
        }
        out.push_str("</agents></root>");
        out
    }
}
