//! Workflow DSL parsing.
//!
//! The planner's model output is an XML document:
//!
//! ```xml
//! <root>
//!   <name>short name</name>
//!   <thought>why this plan</thought>
//!   <agents>
//!     <agent name="Browser" id="0" dependsOn="">
//!       <task>what this agent does</task>
//!       <nodes>
//!         <node input="q" output="urls">step text</node>
//!         <forEach items="urls"><node>per-item step</node></forEach>
//!         <watch event="dom" loop="true">
//!           <description>condition</description>
//!           <trigger><node>on fire</node></trigger>
//!         </watch>
//!       </nodes>
//!     </agent>
//!   </agents>
//! </root>
//! ```
//!
//! The parser runs in two modes: **tolerant** parsing accepts in-flight,
//! truncated documents (used for streaming progress events) and returns
//! every fully-closed agent seen so far; **strict** parsing rejects
//! malformed documents and validates the resulting DAG.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};
use crate::workflow::{NodeStatus, TaskNode, Workflow, WorkflowAgent, nodes_to_xml};

/// A workflow DSL parser.
///
/// Implementations must support both tolerant and strict modes; the default
/// implementation is [`XmlWorkflowParser`].
pub trait WorkflowParser: Send + Sync {
    /// Parse planner output into a workflow.
    fn parse(&self, task_id: &str, text: &str, strict: bool) -> Result<Workflow>;
}

/// The built-in XML parser for the planner DSL.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlWorkflowParser;

impl WorkflowParser for XmlWorkflowParser {
    fn parse(&self, task_id: &str, text: &str, strict: bool) -> Result<Workflow> {
        let Some(xml) = extract_root(text) else {
            if strict {
                return Err(Error::plan_parse("no <root> element in plan output"));
            }
            return Ok(empty_workflow(task_id));
        };
        let workflow = parse_root(task_id, xml, strict)?;
        if strict {
            workflow.validate()?;
        }
        Ok(workflow)
    }
}

/// Cut the `<root>…</root>` region out of surrounding prose or fences.
/// Without a closing tag the remainder of the text is used (tolerant mode).
fn extract_root(text: &str) -> Option<&str> {
    let start = text.find("<root")?;
    let body = &text[start..];
    match body.find("</root>") {
        Some(end) => Some(&body[..end + "</root>".len()]),
        None => Some(body),
    }
}

fn empty_workflow(task_id: &str) -> Workflow {
    Workflow {
        task_id: task_id.to_owned(),
        name: String::new(),
        thought: None,
        agents: Vec::new(),
        modified: false,
    }
}

/// Nested container being filled while parsing an agent body.
enum Frame {
    ForEach {
        id: usize,
        items: String,
        nodes: Vec<TaskNode>,
    },
    Watch {
        id: usize,
        event: String,
        repeat: bool,
        description: String,
        triggers: Vec<TaskNode>,
        in_trigger: bool,
    },
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().filter_map(std::result::Result::ok).find_map(|a| {
        if a.key.as_ref() == name.as_bytes() {
            a.unescape_value()
                .map(std::borrow::Cow::into_owned)
                .ok()
                .or_else(|| Some(String::from_utf8_lossy(&a.value).into_owned()))
        } else {
            None
        }
    })
}

fn push_node(frames: &mut [Frame], agent: Option<&mut WorkflowAgent>, node: TaskNode) {
    match frames.last_mut() {
        Some(Frame::ForEach { nodes, .. }) => nodes.push(node),
        Some(Frame::Watch {
            triggers,
            in_trigger,
            ..
        }) => {
            if *in_trigger {
                triggers.push(node);
            }
        }
        None => {
            if let Some(agent) = agent {
                agent.nodes.push(node);
            }
        }
    }
}

#[allow(clippy::too_many_lines)]
fn parse_root(task_id: &str, xml: &str, strict: bool) -> Result<Workflow> {
    let mut reader = Reader::from_str(xml);
    let mut workflow = empty_workflow(task_id);

    let mut current: Option<WorkflowAgent> = None;
    let mut frames: Vec<Frame> = Vec::new();
    let mut capture: Option<String> = None;
    let mut node_attrs: (Option<String>, Option<String>) = (None, None);
    let mut node_counter: usize = 0;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(err) => {
                if strict {
                    return Err(Error::plan_parse(err.to_string()));
                }
                break;
            }
        };
        match event {
            Event::Eof => break,
            Event::Start(e) => match e.name().as_ref() {
                b"agent" => {
                    node_counter = 0;
                    frames.clear();
                    current = Some(WorkflowAgent {
                        id: attr(&e, "id").unwrap_or_else(|| workflow.agents.len().to_string()),
                        name: attr(&e, "name").unwrap_or_default(),
                        task: String::new(),
                        depends_on: attr(&e, "dependsOn")
                            .map(|s| {
                                s.split(',')
                                    .map(str::trim)
                                    .filter(|p| !p.is_empty())
                                    .map(str::to_owned)
                                    .collect()
                            })
                            .unwrap_or_default(),
                        status: NodeStatus::Init,
                        xml: String::new(),
                        nodes: Vec::new(),
                    });
                }
                b"node" => {
                    node_attrs = (attr(&e, "input"), attr(&e, "output"));
                    capture = Some(String::new());
                }
                b"forEach" => {
                    frames.push(Frame::ForEach {
                        id: node_counter,
                        items: attr(&e, "items").unwrap_or_default(),
                        nodes: Vec::new(),
                    });
                    node_counter += 1;
                }
                b"watch" => {
                    frames.push(Frame::Watch {
                        id: node_counter,
                        event: attr(&e, "event").unwrap_or_default(),
                        repeat: attr(&e, "loop").as_deref() == Some("true"),
                        description: String::new(),
                        triggers: Vec::new(),
                        in_trigger: false,
                    });
                    node_counter += 1;
                }
                b"trigger" => {
                    if let Some(Frame::Watch { in_trigger, .. }) = frames.last_mut() {
                        *in_trigger = true;
                    }
                }
                b"name" | b"thought" | b"task" | b"description" => {
                    capture = Some(String::new());
                }
                _ => {}
            },
            Event::Empty(e) => {
                if e.name().as_ref() == b"node" {
                    let node = TaskNode::Normal {
                        id: node_counter,
                        text: String::new(),
                        input: attr(&e, "input"),
                        output: attr(&e, "output"),
                    };
                    node_counter += 1;
                    push_node(&mut frames, current.as_mut(), node);
                }
            }
            Event::Text(t) => {
                if let Some(buffer) = capture.as_mut() {
                    match t.unescape() {
                        Ok(text) => buffer.push_str(&text),
                        Err(_) => buffer.push_str(&String::from_utf8_lossy(&t)),
                    }
                }
            }
            Event::CData(t) => {
                if let Some(buffer) = capture.as_mut() {
                    buffer.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"name" => {
                    workflow.name = capture.take().unwrap_or_default().trim().to_owned();
                }
                b"thought" => {
                    let text = capture.take().unwrap_or_default().trim().to_owned();
                    if !text.is_empty() {
                        workflow.thought = Some(text);
                    }
                }
                b"task" => {
                    if let Some(agent) = current.as_mut() {
                        agent.task = capture.take().unwrap_or_default().trim().to_owned();
                    } else {
                        capture = None;
                    }
                }
                b"description" => {
                    let text = capture.take().unwrap_or_default().trim().to_owned();
                    if let Some(Frame::Watch { description, .. }) = frames.last_mut() {
                        *description = text;
                    }
                }
                b"node" => {
                    let text = capture.take().unwrap_or_default().trim().to_owned();
                    let (input, output) = std::mem::take(&mut node_attrs);
                    let node = TaskNode::Normal {
                        id: node_counter,
                        text,
                        input,
                        output,
                    };
                    node_counter += 1;
                    push_node(&mut frames, current.as_mut(), node);
                }
                b"forEach" => {
                    if let Some(Frame::ForEach { id, items, nodes }) = frames.pop() {
                        push_node(
                            &mut frames,
                            current.as_mut(),
                            TaskNode::ForEach { id, items, nodes },
                        );
                    }
                }
                b"trigger" => {
                    if let Some(Frame::Watch { in_trigger, .. }) = frames.last_mut() {
                        *in_trigger = false;
                    }
                }
                b"watch" => {
                    if let Some(Frame::Watch {
                        id,
                        event,
                        repeat,
                        description,
                        triggers,
                        ..
                    }) = frames.pop()
                    {
                        push_node(
                            &mut frames,
                            current.as_mut(),
                            TaskNode::Watch {
                                id,
                                event,
                                repeat,
                                description,
                                triggers,
                            },
                        );
                    }
                }
                b"agent" => {
                    if let Some(mut agent) = current.take() {
                        agent.xml = format!(
                            "<task>{}</task>{}",
                            agent.task,
                            nodes_to_xml(&agent.nodes, None)
                        );
                        workflow.agents.push(agent);
                    }
                    frames.clear();
                }
                _ => {}
            },
            _ => {}
        }
    }

    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"Some preamble text.
<root>
  <name>Research task</name>
  <thought>Split into search and summary.</thought>
  <agents>
    <agent name="Searcher" id="0">
      <task>Find sources</task>
      <nodes>
        <node output="urls">Search the web</node>
        <forEach items="urls">
          <node input="urls">Open each result</node>
        </forEach>
      </nodes>
    </agent>
    <agent name="Writer" id="1" dependsOn="0">
      <task>Summarize findings</task>
      <nodes>
        <node>Write the summary</node>
      </nodes>
    </agent>
  </agents>
</root>"#;

    mod strict {
        use super::*;

        #[test]
        fn parses_full_plan() {
            let wf = XmlWorkflowParser.parse("task-1", PLAN, true).unwrap();
            assert_eq!(wf.name, "Research task");
            assert_eq!(wf.thought.as_deref(), Some("Split into search and summary."));
            assert_eq!(wf.agents.len(), 2);

            let searcher = &wf.agents[0];
            assert_eq!(searcher.name, "Searcher");
            assert_eq!(searcher.id, "0");
            assert!(searcher.depends_on.is_empty());
            assert_eq!(searcher.nodes.len(), 2);
            assert!(searcher.has_foreach());
            assert!(searcher.has_variable_io());

            let writer = &wf.agents[1];
            assert_eq!(writer.depends_on, vec!["0"]);
            assert!(!writer.has_foreach());
        }

        #[test]
        fn node_ids_follow_document_order() {
            let wf = XmlWorkflowParser.parse("task-1", PLAN, true).unwrap();
            let nodes = &wf.agents[0].nodes;
            assert_eq!(nodes[0].id(), 0);
            assert_eq!(nodes[1].id(), 1);
            if let TaskNode::ForEach { nodes: inner, .. } = &nodes[1] {
                assert_eq!(inner[0].id(), 2);
            } else {
                panic!("expected forEach");
            }
        }

        #[test]
        fn missing_root_fails() {
            let err = XmlWorkflowParser.parse("t", "no xml here", true).unwrap_err();
            assert!(matches!(err, Error::PlanParse { .. }));
        }

        #[test]
        fn unknown_dependency_fails_validation() {
            let plan = r#"<root><name>x</name><agents>
                <agent name="A" id="0" dependsOn="7"><task>t</task><nodes><node>n</node></nodes></agent>
            </agents></root>"#;
            assert!(XmlWorkflowParser.parse("t", plan, true).is_err());
        }

        #[test]
        fn stores_reparsable_body_xml() {
            let wf = XmlWorkflowParser.parse("task-1", PLAN, true).unwrap();
            assert!(wf.agents[0].xml.starts_with("<task>Find sources</task><nodes>"));
            assert!(wf.agents[0].xml.contains("forEach"));
        }

        #[test]
        fn parses_watch_blocks() {
            let plan = r#"<root><name>w</name><agents>
              <agent name="A" id="0"><task>t</task><nodes>
                <watch event="dom" loop="true">
                  <description>price changes</description>
                  <trigger><node>notify</node></trigger>
                </watch>
              </nodes></agent>
            </agents></root>"#;
            let wf = XmlWorkflowParser.parse("t", plan, true).unwrap();
            let agent = &wf.agents[0];
            assert!(agent.has_watch());
            if let TaskNode::Watch {
                event,
                repeat,
                description,
                triggers,
                ..
            } = &agent.nodes[0]
            {
                assert_eq!(event, "dom");
                assert!(*repeat);
                assert_eq!(description, "price changes");
                assert_eq!(triggers.len(), 1);
            } else {
                panic!("expected watch");
            }
        }
    }

    mod tolerant {
        use super::*;

        #[test]
        fn truncated_stream_returns_complete_agents() {
            // Cut mid-way through the second agent.
            let cut = PLAN.find("<agent name=\"Writer\"").unwrap() + 30;
            let wf = XmlWorkflowParser.parse("task-1", &PLAN[..cut], false).unwrap();
            assert_eq!(wf.name, "Research task");
            assert_eq!(wf.agents.len(), 1);
            assert_eq!(wf.agents[0].name, "Searcher");
        }

        #[test]
        fn no_root_yet_returns_empty() {
            let wf = XmlWorkflowParser.parse("task-1", "<roo", false).unwrap();
            assert!(wf.agents.is_empty());
            assert!(wf.name.is_empty());
        }

        #[test]
        fn prefix_before_name_closes() {
            let wf = XmlWorkflowParser
                .parse("task-1", "<root><name>partial", false)
                .unwrap();
            assert!(wf.agents.is_empty());
        }
    }
}
