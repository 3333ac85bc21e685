//! End-to-end orchestration against the scripted mock provider.
//!
//! Run with: `cargo run --example hello_orchestrator`

use std::sync::Arc;

use shiki::prelude::*;
use shiki::provider::mock::script;

const PLAN: &str = r#"<root><name>hello</name><agents>
<agent name="Chat" id="0"><task>Say hello</task><nodes><node>greet the user</node></nodes></agent>
</agents></root>"#;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let provider = Arc::new(MockProvider::new(vec![
        script::text_answer(PLAN),
        script::text_answer("Hello from the mock model!"),
    ]));

    let orchestrator = Orchestrator::new(Config::default(), ProviderSet::single(provider))
        .with_agent(Arc::new(BaseAgent::new("Chat", "Answers questions")));

    let result = orchestrator.run("Say hello.").await;
    tracing::info!(
        success = result.success,
        stop_reason = result.stop_reason.as_str(),
        result = %result.result,
        "task finished",
    );
}
