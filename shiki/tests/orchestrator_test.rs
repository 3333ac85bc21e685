//! End-to-end orchestrator tests against scripted mock providers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use shiki::callback::{CallbackEvent, CallbackMessage, TaskCallback};
use shiki::config::Config;
use shiki::context::AgentContext;
use shiki::error::{Error, Result};
use shiki::message::{Role, ToolCallPart, ToolOutput, ToolResult};
use shiki::orchestrator::{Orchestrator, TaskStopReason};
use shiki::prompts::INTERVENTION_HEADER;
use shiki::provider::mock::{MockAction, MockProvider, script};
use shiki::provider::{Provider, ProviderSet, ToolChoice};
use shiki::stream::{FinishReason, StreamEvent};
use shiki::tool::Tool;
use shiki::usage::Usage;
use shiki::workflow::NodeStatus;

const CHAT_PLAN: &str = r#"<root><name>chat</name><agents>
<agent name="Chat" id="0"><task>Say hello</task><nodes><node>say hello</node></nodes></agent>
</agents></root>"#;

const MATH_PLAN: &str = r#"<root><name>math</name><agents>
<agent name="Math" id="0"><task>Compute the sum</task><nodes><node>add the numbers</node></nodes></agent>
</agents></root>"#;

const TWO_AGENT_PLAN: &str = r#"<root><name>pair</name><agents>
<agent name="A" id="0"><task>first half</task><nodes><node>do a</node></nodes></agent>
<agent name="B" id="1"><task>second half</task><nodes><node>do b</node></nodes></agent>
</agents></root>"#;

// ── Test support ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Recording(Mutex<Vec<CallbackMessage>>);

#[async_trait]
impl TaskCallback for Recording {
    async fn on_message(&self, message: CallbackMessage) {
        self.0.lock().unwrap().push(message);
    }
}

impl Recording {
    fn count(&self, pred: impl Fn(&CallbackEvent) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|m| pred(&m.event)).count()
    }
}

#[derive(Deserialize, JsonSchema)]
struct AddArgs {
    a: i64,
    b: i64,
}

struct Adder;

impl Tool for Adder {
    const NAME: &'static str = "add";
    type Args = AddArgs;

    fn description(&self) -> String {
        "Add two numbers".to_owned()
    }

    async fn execute(
        &self,
        args: AddArgs,
        _ctx: &AgentContext,
        _call: &ToolCallPart,
    ) -> Result<ToolResult> {
        Ok(ToolResult::text((args.a + args.b).to_string()))
    }
}

#[derive(Deserialize, JsonSchema)]
struct EmptyArgs {}

struct AlwaysFails;

impl Tool for AlwaysFails {
    const NAME: &'static str = "flaky";
    type Args = EmptyArgs;

    fn description(&self) -> String {
        "Fails on every call".to_owned()
    }

    async fn execute(
        &self,
        _args: EmptyArgs,
        _ctx: &AgentContext,
        _call: &ToolCallPart,
    ) -> Result<ToolResult> {
        Err(Error::internal("backend unavailable"))
    }
}

#[derive(Deserialize, JsonSchema)]
struct SleepArgs {
    ms: u64,
    tag: String,
}

struct Sleeper;

impl Tool for Sleeper {
    const NAME: &'static str = "sleeper";
    type Args = SleepArgs;

    fn description(&self) -> String {
        "Sleeps then returns its tag".to_owned()
    }

    fn support_parallel_calls(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        args: SleepArgs,
        _ctx: &AgentContext,
        _call: &ToolCallPart,
    ) -> Result<ToolResult> {
        tokio::time::sleep(Duration::from_millis(args.ms)).await;
        Ok(ToolResult::text(args.tag))
    }
}

struct StopSetter;

impl Tool for StopSetter {
    const NAME: &'static str = "stop_setter";
    type Args = EmptyArgs;

    fn description(&self) -> String {
        "Requests an immediate stop".to_owned()
    }

    async fn execute(
        &self,
        _args: EmptyArgs,
        ctx: &AgentContext,
        _call: &ToolCallPart,
    ) -> Result<ToolResult> {
        ctx.task().set_variable("forceStop", serde_json::json!("X"));
        Ok(ToolResult::text("stopping"))
    }
}

fn chat_agent() -> Arc<shiki::agent::BaseAgent> {
    Arc::new(shiki::agent::BaseAgent::new("Chat", "Answers questions"))
}

fn orchestrator_with(
    config: Config,
    provider: Arc<MockProvider>,
    callback: Arc<Recording>,
) -> Orchestrator {
    Orchestrator::new(config, ProviderSet::single(provider))
        .with_callback(callback)
        .with_agent(chat_agent())
}

// ── Pure-text answer ─────────────────────────────────────────────────────

#[tokio::test]
async fn pure_text_answer() {
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(CHAT_PLAN),
        script::text_answer("Hi"),
    ]));
    let callback = Arc::new(Recording::default());
    let orchestrator = orchestrator_with(Config::default(), Arc::clone(&provider), Arc::clone(&callback));

    let result = orchestrator.run("Say hello.").await;

    assert!(result.success);
    assert_eq!(result.stop_reason, TaskStopReason::Done);
    assert_eq!(result.result, "Hi");
    assert_eq!(
        callback.count(|e| matches!(e, CallbackEvent::LlmResponseFinished { .. })),
        1
    );
    assert_eq!(
        callback.count(|e| matches!(
            e,
            CallbackEvent::ToolUse { .. } | CallbackEvent::ToolResult { .. }
        )),
        0
    );

    let task_id = orchestrator.task_ids().pop().unwrap();
    let workflow = orchestrator.task(&task_id).unwrap().workflow().unwrap();
    assert_eq!(workflow.agents[0].status, NodeStatus::Done);
}

// ── Single tool round-trip ───────────────────────────────────────────────

#[tokio::test]
async fn single_tool_round_trip() {
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(MATH_PLAN),
        script::tool_call("t1", "add", r#"{"a":1,"b":2}"#),
        script::text_answer("3"),
    ]));
    let callback = Arc::new(Recording::default());
    let orchestrator = Orchestrator::new(Config::default(), ProviderSet::single(Arc::clone(&provider) as Arc<dyn Provider>))
        .with_callback(Arc::clone(&callback) as Arc<dyn TaskCallback>)
        .with_agent(Arc::new(
            shiki::agent::BaseAgent::new("Math", "Does arithmetic").with_tool(Arc::new(Adder)),
        ));

    let result = orchestrator.run("What is 1 + 2?").await;
    assert_eq!(result.result, "3");
    assert!(result.success);

    // Tool continuity: in the second turn's request, the assistant message
    // with the tool call is immediately followed by a matching tool message.
    let requests = provider.requests();
    let turn2 = &requests[2].messages;
    let assistant_idx = turn2
        .iter()
        .position(|m| m.role == Role::Assistant && m.has_tool_calls())
        .unwrap();
    let tool_msg = &turn2[assistant_idx + 1];
    assert_eq!(tool_msg.role, Role::Tool);
    let results = tool_msg.tool_results().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_call_id, "t1");
    assert_eq!(results[0].output, ToolOutput::text("3"));

    assert_eq!(
        callback.count(|e| matches!(e, CallbackEvent::ToolResult { .. })),
        1
    );
}

// ── Length-finish compression ────────────────────────────────────────────

#[tokio::test]
async fn length_finish_triggers_snapshot_compression() {
    let snapshot_args = r#"{"doneIds":[0],"taskSnapshot":"snap-note"}"#;
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(MATH_PLAN),
        script::tool_call("t1", "add", r#"{"a":1,"b":2}"#),
        script::tool_call("t2", "add", r#"{"a":2,"b":3}"#),
        vec![MockAction::Event(StreamEvent::finish(
            FinishReason::Length,
            Usage::new(10, 5),
        ))],
        script::tool_call("ts", "task_snapshot", snapshot_args),
        script::text_answer("done"),
    ]));
    let orchestrator = Orchestrator::new(Config::default(), ProviderSet::single(Arc::clone(&provider) as Arc<dyn Provider>))
        .with_agent(Arc::new(
            shiki::agent::BaseAgent::new("Math", "Does arithmetic").with_tool(Arc::new(Adder)),
        ));

    let result = orchestrator.run("Add some numbers").await;
    assert_eq!(result.result, "done");

    let requests = provider.requests();
    assert_eq!(requests.len(), 6);

    // Exactly one forced snapshot call, offered the used tools plus
    // task_snapshot.
    let snapshot_requests: Vec<_> = requests
        .iter()
        .filter(|r| {
            r.tool_choice
                == Some(ToolChoice::Tool {
                    tool_name: "task_snapshot".to_owned(),
                })
        })
        .collect();
    assert_eq!(snapshot_requests.len(), 1);
    assert!(snapshot_requests[0].tool_names.contains(&"add".to_owned()));
    assert!(
        snapshot_requests[0]
            .tool_names
            .contains(&"task_snapshot".to_owned())
    );

    // The retried turn sees the spliced buffer:
    // [system, user, assistant, tool(first), snapshot-user, tool(last)].
    let retried = &requests[5].messages;
    assert_eq!(retried.len(), 6);
    assert_eq!(retried[3].role, Role::Tool);
    assert_eq!(retried[4].role, Role::User);
    assert!(retried[4].text().contains("snap-note"));
    assert!(retried[4].text().contains("status=\"done\""));
    assert_eq!(retried[5].role, Role::Tool);
}

// ── Abort mid-stream ─────────────────────────────────────────────────────

#[tokio::test]
async fn abort_mid_stream() {
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(CHAT_PLAN),
        vec![
            MockAction::Event(StreamEvent::TextStart),
            MockAction::Event(StreamEvent::text_delta("one ")),
            MockAction::Event(StreamEvent::text_delta("two ")),
            MockAction::Event(StreamEvent::text_delta("three")),
            MockAction::Hang,
        ],
    ]));
    let callback = Arc::new(Recording::default());
    let orchestrator = Arc::new(orchestrator_with(
        Config::default(),
        Arc::clone(&provider),
        Arc::clone(&callback),
    ));

    orchestrator
        .generate("Long answer", Some("task-abort".to_owned()), None)
        .await
        .unwrap();
    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.execute("task-abort").await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = std::time::Instant::now();
    orchestrator.abort_task("task-abort").await.unwrap();
    let result = runner.await.unwrap();

    assert!(!result.success);
    assert_eq!(result.stop_reason, TaskStopReason::Abort);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        callback.count(|e| matches!(e, CallbackEvent::ToolResult { .. })),
        0
    );
    // The stream reader was released.
    assert_eq!(provider.live_streams(), 0);
}

// ── Parallel agents ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn parallel_agents_run_concurrently_and_keep_order() {
    // Each sibling's stream starts with a delay, so under parallel
    // execution both requests are issued before either stream completes.
    let sibling = |text: &str| {
        vec![
            MockAction::Delay(50),
            MockAction::Event(StreamEvent::TextStart),
            MockAction::Event(StreamEvent::text_delta(text)),
            MockAction::Event(StreamEvent::TextEnd),
            MockAction::Event(StreamEvent::finish(FinishReason::Stop, Usage::new(5, 5))),
        ]
    };
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(TWO_AGENT_PLAN),
        sibling("done-by-first"),
        sibling("done-by-second"),
    ]));

    let orchestrator = Orchestrator::new(
        Config::default().with_agent_parallel(true),
        ProviderSet::single(Arc::clone(&provider) as Arc<dyn Provider>),
    )
    .with_agent(Arc::new(shiki::agent::BaseAgent::new("A", "first worker")))
    .with_agent(Arc::new(shiki::agent::BaseAgent::new("B", "second worker")));

    let result = orchestrator.run("split work").await;
    assert!(result.success);

    // Both sibling streams were live at the same time.
    assert_eq!(provider.max_live_streams(), 2);

    // Chains were appended in declaration order regardless of completion.
    let task_id = orchestrator.task_ids().pop().unwrap();
    let chain = orchestrator.task(&task_id).unwrap().chain().clone();
    let names: Vec<String> = chain
        .agents()
        .iter()
        .map(|a| a.agent_name().to_owned())
        .collect();
    assert_eq!(names, vec!["A", "B"]);

    // Both agents completed and the final result is the last node's.
    let results: Vec<Option<String>> = chain.agents().iter().map(|a| a.agent_result()).collect();
    assert!(results.iter().all(Option::is_some));
    assert_eq!(result.result, results[1].clone().unwrap());

    let workflow = orchestrator.task(&task_id).unwrap().workflow().unwrap();
    assert!(workflow.agents.iter().all(|a| a.status == NodeStatus::Done));
}

// ── Tool error cascade ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn tool_error_cascade_fails_after_ten() {
    let provider = Arc::new(
        MockProvider::new(vec![
            script::text_answer(
                r#"<root><name>f</name><agents><agent name="Flaky" id="0"><task>try the tool</task><nodes><node>call it</node></nodes></agent></agents></root>"#,
            ),
            script::tool_call("t1", "flaky", "{}"),
        ])
        .with_loop_last(),
    );
    let callback = Arc::new(Recording::default());
    let orchestrator = Orchestrator::new(Config::default(), ProviderSet::single(Arc::clone(&provider) as Arc<dyn Provider>))
        .with_callback(Arc::clone(&callback) as Arc<dyn TaskCallback>)
        .with_agent(Arc::new(
            shiki::agent::BaseAgent::new("Flaky", "Uses a broken tool")
                .with_tool(Arc::new(AlwaysFails)),
        ));

    let result = orchestrator.run("Use the tool").await;

    assert!(!result.success);
    assert_eq!(result.stop_reason, TaskStopReason::Error);
    let error_results = callback.count(|e| {
        matches!(e, CallbackEvent::ToolResult { result, .. } if result.is_error)
    });
    assert_eq!(error_results, 10);
}

// ── Parallel dispatch ordering ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn parallel_tool_results_keep_call_order() {
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(
            r#"<root><name>s</name><agents><agent name="S" id="0"><task>sleep twice</task><nodes><node>sleep</node></nodes></agent></agents></root>"#,
        ),
        vec![
            MockAction::Event(StreamEvent::tool_call(
                "t1",
                "sleeper",
                r#"{"ms":100,"tag":"slow"}"#,
            )),
            MockAction::Event(StreamEvent::tool_call(
                "t2",
                "sleeper",
                r#"{"ms":10,"tag":"fast"}"#,
            )),
            MockAction::Event(StreamEvent::finish(
                FinishReason::ToolCalls,
                Usage::new(5, 5),
            )),
        ],
        script::text_answer("ok"),
    ]));
    let orchestrator = Orchestrator::new(Config::default(), ProviderSet::single(Arc::clone(&provider) as Arc<dyn Provider>))
        .with_agent(Arc::new(
            shiki::agent::BaseAgent::new("S", "Sleeps").with_tool(Arc::new(Sleeper)),
        ));

    let result = orchestrator.run("Sleep in parallel").await;
    assert_eq!(result.result, "ok");

    // The tool message in the follow-up request preserves issuing order
    // even though the second call finished first.
    let requests = provider.requests();
    let turn2 = &requests[2].messages;
    let tool_msg = turn2.iter().rev().find(|m| m.role == Role::Tool).unwrap();
    let results = tool_msg.tool_results().unwrap();
    assert_eq!(results[0].tool_call_id, "t1");
    assert_eq!(results[0].output, ToolOutput::text("slow"));
    assert_eq!(results[1].tool_call_id, "t2");
    assert_eq!(results[1].output, ToolOutput::text("fast"));
}

// ── Retry cap ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn retry_budget_bounds_stream_calls() {
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(CHAT_PLAN),
        vec![MockAction::Fail("connection reset".to_owned())],
        vec![MockAction::Fail("connection reset".to_owned())],
    ]));
    let callback = Arc::new(Recording::default());
    let orchestrator = orchestrator_with(
        Config::default().with_max_retry_num(1),
        Arc::clone(&provider),
        Arc::clone(&callback),
    );

    let result = orchestrator.run("Hello").await;
    assert!(!result.success);
    assert_eq!(result.stop_reason, TaskStopReason::Error);
    // One plan call plus at most max_retry_num + 1 stream calls.
    assert_eq!(provider.request_count(), 3);
}

// ── Force stop ───────────────────────────────────────────────────────────

#[tokio::test]
async fn force_stop_returns_before_next_model_call() {
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(
            r#"<root><name>st</name><agents><agent name="Stopper" id="0"><task>stop</task><nodes><node>stop</node></nodes></agent></agents></root>"#,
        ),
        script::tool_call("t1", "stop_setter", "{}"),
    ]));
    let orchestrator = Orchestrator::new(Config::default(), ProviderSet::single(Arc::clone(&provider) as Arc<dyn Provider>))
        .with_agent(Arc::new(
            shiki::agent::BaseAgent::new("Stopper", "Stops itself")
                .with_tool(Arc::new(StopSetter)),
        ));

    let result = orchestrator.run("Stop early").await;
    assert!(result.success);
    assert_eq!(result.result, "X");
    // Plan + one agent turn; no further model call after forceStop was set.
    assert_eq!(provider.request_count(), 2);
}

// ── Expert mode: completion check runs once ──────────────────────────────

#[tokio::test]
async fn expert_mode_checks_first_answer_only() {
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(CHAT_PLAN),
        script::text_answer("first"),
        script::tool_call(
            "c1",
            "task_result_check",
            r#"{"completed":false,"reason":"missing details"}"#,
        ),
        script::text_answer("second"),
    ]));
    let orchestrator = orchestrator_with(
        Config::default().with_expert_mode(true),
        Arc::clone(&provider),
        Arc::new(Recording::default()),
    );

    let result = orchestrator.run("Say hello.").await;
    // The second answer is returned unchecked.
    assert_eq!(result.result, "second");

    let requests = provider.requests();
    assert_eq!(requests.len(), 4);
    let forced: Vec<_> = requests
        .iter()
        .filter(|r| {
            r.tool_choice
                == Some(ToolChoice::Tool {
                    tool_name: "task_result_check".to_owned(),
                })
        })
        .collect();
    assert_eq!(forced.len(), 1);
}

// ── User intervention queue ──────────────────────────────────────────────

#[tokio::test]
async fn chat_messages_drain_into_next_turn() {
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(CHAT_PLAN),
        script::text_answer("Bonjour"),
    ]));
    let orchestrator = orchestrator_with(
        Config::default(),
        Arc::clone(&provider),
        Arc::new(Recording::default()),
    );

    orchestrator
        .generate("Say hello.", Some("task-chat".to_owned()), None)
        .await
        .unwrap();
    orchestrator.chat("task-chat", "answer in French").unwrap();
    let result = orchestrator.execute("task-chat").await;
    assert_eq!(result.result, "Bonjour");

    let requests = provider.requests();
    let turn1 = &requests[1].messages;
    let intervention = turn1
        .iter()
        .find(|m| m.role == Role::User && m.text().contains(INTERVENTION_HEADER))
        .expect("intervention message present");
    assert!(intervention.text().contains("answer in French"));
}

// ── Pause with step abort, then resume ───────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pause_aborts_step_and_resume_retries_it() {
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(CHAT_PLAN),
        vec![
            MockAction::Event(StreamEvent::TextStart),
            MockAction::Event(StreamEvent::text_delta("partial")),
            MockAction::Hang,
        ],
        script::text_answer("recovered"),
    ]));
    let orchestrator = Arc::new(orchestrator_with(
        Config::default(),
        Arc::clone(&provider),
        Arc::new(Recording::default()),
    ));

    orchestrator
        .generate("Slow answer", Some("task-pause".to_owned()), None)
        .await
        .unwrap();
    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.execute("task-pause").await })
    };

    // Let the first stream get stuck, then pause aborting the step.
    tokio::time::sleep(Duration::from_millis(50)).await;
    orchestrator.pause_task("task-pause", true, true).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!runner.is_finished());

    // Resume: the turn is retried and completes.
    orchestrator.pause_task("task-pause", false, false).unwrap();
    let result = runner.await.unwrap();
    assert!(result.success);
    assert_eq!(result.result, "recovered");
    assert_eq!(provider.request_count(), 3);
    assert_eq!(provider.live_streams(), 0);
}

// ── DAG traversal statuses ───────────────────────────────────────────────

#[tokio::test]
async fn dependent_agents_run_in_order() {
    let plan = r#"<root><name>dep</name><agents>
<agent name="A" id="0"><task>produce</task><nodes><node>make</node></nodes></agent>
<agent name="B" id="1" dependsOn="0"><task>consume</task><nodes><node>use</node></nodes></agent>
</agents></root>"#;
    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(plan),
        script::text_answer("made"),
        script::text_answer("used"),
    ]));
    let orchestrator = Orchestrator::new(Config::default(), ProviderSet::single(Arc::clone(&provider) as Arc<dyn Provider>))
        .with_agent(Arc::new(shiki::agent::BaseAgent::new("A", "producer")))
        .with_agent(Arc::new(shiki::agent::BaseAgent::new("B", "consumer")));

    let result = orchestrator.run("produce then consume").await;
    assert!(result.success);
    assert_eq!(result.result, "used");

    let task_id = orchestrator.task_ids().pop().unwrap();
    let workflow = orchestrator.task(&task_id).unwrap().workflow().unwrap();
    assert!(workflow.agents.iter().all(|a| a.status == NodeStatus::Done));

    // B's request went out after A's answer existed: request order is
    // plan, A, B.
    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].messages[0].text().contains("You are A"));
    assert!(requests[2].messages[0].text().contains("You are B"));
}

// ── Unknown agent in workflow fails the task ─────────────────────────────

#[tokio::test]
async fn unknown_agent_name_is_a_workflow_error() {
    let plan = r#"<root><name>x</name><agents>
<agent name="Ghost" id="0"><task>boo</task><nodes><node>boo</node></nodes></agent>
</agents></root>"#;
    let provider = Arc::new(MockProvider::new(vec![script::text_answer(plan)]));
    let orchestrator = orchestrator_with(
        Config::default(),
        Arc::clone(&provider),
        Arc::new(Recording::default()),
    );

    let result = orchestrator.run("haunt").await;
    assert!(!result.success);
    assert_eq!(result.stop_reason, TaskStopReason::Error);
    assert!(result.result.contains("Ghost"));
}
