use std::sync::Arc;

use serde_json::json;
use toolgauge_core::completion::{CompletionClient, CompletionFuture, CompletionRequest};
use toolgauge_core::evaluator::StartOutcome;
use toolgauge_core::progress::ProgressChannel;
use toolgauge_core::{
    EvaluationError, EvaluationState, Evaluator, EvaluatorConfig, HttpTargetConfig, SessionDriver,
};
use toolgauge_test_support::{stub_resource, tool_with_schema, ScriptedTransport};

struct ScriptedCompletion(String);

impl CompletionClient for ScriptedCompletion {
    fn complete<'a>(&'a self, _request: CompletionRequest) -> CompletionFuture<'a> {
        let text = self.0.clone();
        Box::pin(async move { Ok(text) })
    }
}

fn config() -> EvaluatorConfig {
    EvaluatorConfig {
        target: HttpTargetConfig::new("https://example.test/mcp"),
        ..EvaluatorConfig::default()
    }
}

fn project_tools() -> Vec<rmcp::model::Tool> {
    vec![
        tool_with_schema(
            "create_project",
            "Creates a project",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
        ),
        tool_with_schema(
            "get_project",
            "Reads a project",
            json!({
                "type": "object",
                "properties": {"project_id": {"type": "string"}},
                "required": ["project_id"]
            }),
        ),
    ]
}

async fn ready_evaluator(transport: ScriptedTransport) -> (Evaluator, ProgressChannel) {
    let mut evaluator = Evaluator::new(config(), None);
    let (progress, _receiver) = ProgressChannel::new();
    let session = SessionDriver::connect_with_transport(transport)
        .await
        .expect("connect");
    let outcome = evaluator
        .start_with_session(session, &progress)
        .await
        .expect("start");
    assert!(matches!(outcome, StartOutcome::Ready));
    (evaluator, progress)
}

#[tokio::test]
async fn discovery_synthesizes_a_case_per_tool() {
    let (evaluator, _progress) = ready_evaluator(ScriptedTransport::new(project_tools())).await;

    assert_eq!(evaluator.state(), EvaluationState::Ready);
    let cases = evaluator.test_cases();
    assert_eq!(cases.len(), 2);
    assert!(cases[0].arguments.contains_key("name"));
    assert!(cases[1].arguments.contains_key("project_id"));
    assert!(!cases[0].executed);
}

#[tokio::test]
async fn unsupported_resource_listing_is_a_passed_probe() {
    let (evaluator, _progress) = ready_evaluator(ScriptedTransport::new(project_tools())).await;
    let result = evaluator.result();
    let probe = result
        .probes
        .iter()
        .find(|probe| probe.name == "resources/list")
        .expect("resource probe");
    assert!(probe.passed);
    assert!(probe.note.as_deref().expect("note").contains("-32601"));
}

#[tokio::test]
async fn supported_resource_listing_is_noted() {
    let transport = ScriptedTransport::new(project_tools())
        .with_resources(vec![stub_resource("file:///demo.txt", "demo")]);
    let (evaluator, _progress) = ready_evaluator(transport).await;
    let result = evaluator.result();
    let probe = result
        .probes
        .iter()
        .find(|probe| probe.name == "resources/list")
        .expect("resource probe");
    assert!(probe.passed);
    assert!(probe.note.as_deref().expect("note").contains("1 resources"));
}

#[tokio::test]
async fn zero_tools_is_a_valid_synthesis_outcome() {
    let (evaluator, _progress) = ready_evaluator(ScriptedTransport::new(Vec::new())).await;
    assert_eq!(evaluator.state(), EvaluationState::Ready);
    assert!(evaluator.test_cases().is_empty());
}

#[tokio::test]
async fn executing_a_creator_feeds_the_dependent_case() {
    let transport = ScriptedTransport::new(project_tools())
        .with_structured_result("create_project", json!({"id": "proj_123"}));
    let (mut evaluator, progress) = ready_evaluator(transport).await;

    evaluator
        .execute("create_project", &progress)
        .await
        .expect("execute");

    let cases = evaluator.test_cases();
    let create = &cases[0];
    assert!(create.executed);
    assert!(create.passed);

    let get = &cases[1];
    assert!(!get.executed);
    assert_eq!(get.arguments["project_id"], json!("proj_123"));
    assert!(get.unresolved_dependencies.is_empty());
}

#[tokio::test]
async fn unresolved_dependency_is_reported_with_prerequisites() {
    let tools = vec![
        tool_with_schema(
            "create_widget",
            "Creates a widget",
            json!({
                "type": "object",
                "properties": {"label": {"type": "string"}},
                "required": ["label"]
            }),
        ),
        tool_with_schema(
            "create_project",
            "Creates a project",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
        ),
        tool_with_schema(
            "get_project",
            "Reads a project",
            json!({
                "type": "object",
                "properties": {"project_id": {"type": "string"}},
                "required": ["project_id"]
            }),
        ),
    ];
    let transport = ScriptedTransport::new(tools)
        .with_structured_result("create_widget", json!({"id": "wid_1"}));
    let (mut evaluator, progress) = ready_evaluator(transport).await;

    // Widget output must not satisfy project_id, but it does populate the
    // store, which is what turns the placeholder into a reported dependency.
    evaluator
        .execute("create_widget", &progress)
        .await
        .expect("execute");

    let get = evaluator
        .test_cases()
        .iter()
        .find(|case| case.tool_name == "get_project")
        .expect("get_project case");
    assert_eq!(get.unresolved_dependencies, vec!["project_id"]);
    assert_eq!(get.prerequisites, vec!["create_project", "get_project"]);
}

#[tokio::test]
async fn execute_all_covers_every_pending_case() {
    let transport = ScriptedTransport::new(project_tools())
        .with_structured_result("create_project", json!({"id": "proj_9"}))
        .with_structured_result("get_project", json!({"id": "proj_9", "name": "demo"}));
    let (mut evaluator, progress) = ready_evaluator(transport).await;

    evaluator.execute_all(&progress).await.expect("execute all");

    assert_eq!(evaluator.state(), EvaluationState::Ready);
    assert!(evaluator.test_cases().iter().all(|case| case.executed));
    assert!(evaluator.result().all_passed());
}

#[tokio::test]
async fn in_band_errors_fail_the_case_with_the_raw_message() {
    let transport = ScriptedTransport::new(project_tools())
        .with_error_result("create_project", "boom: upstream rejected the request");
    let (mut evaluator, progress) = ready_evaluator(transport).await;

    evaluator
        .execute("create_project", &progress)
        .await
        .expect("execute");

    let case = &evaluator.test_cases()[0];
    assert!(case.executed);
    assert!(!case.passed);
    let record = case.result.as_ref().expect("record");
    assert!(record.is_error);
    assert!(record
        .error_message
        .as_deref()
        .expect("message")
        .contains("boom"));
    assert!(record.diagnosis.is_none());
}

#[tokio::test]
async fn relative_url_failures_carry_a_diagnosis() {
    let transport = ScriptedTransport::new(project_tools()).with_error_result(
        "create_project",
        "fetch failed: Failed to parse URL from /api/projects",
    );
    let (mut evaluator, progress) = ready_evaluator(transport).await;

    evaluator
        .execute("create_project", &progress)
        .await
        .expect("execute");

    let record = evaluator.test_cases()[0].result.as_ref().expect("record");
    assert!(record
        .diagnosis
        .as_deref()
        .expect("diagnosis")
        .contains("base URL"));
}

#[tokio::test]
async fn failed_executions_do_not_enter_the_context() {
    let transport = ScriptedTransport::new(project_tools())
        .with_error_result("create_project", "boom");
    let (mut evaluator, progress) = ready_evaluator(transport).await;

    evaluator
        .execute("create_project", &progress)
        .await
        .expect("execute");

    // With no successful execution recorded, regeneration has nothing to
    // work from and is rejected.
    let error = evaluator
        .regenerate(&progress)
        .await
        .expect_err("empty context");
    assert!(matches!(error, EvaluationError::EmptyContext));
}

#[tokio::test]
async fn regenerate_replaces_pending_arguments() {
    let response = json!({
        "get_project": {"project_id": "proj_from_model"}
    })
    .to_string();
    let transport = ScriptedTransport::new(project_tools())
        .with_structured_result("create_project", json!({"renamed": "no_id_here"}));
    let mut evaluator = Evaluator::new(
        config(),
        Some(Arc::new(ScriptedCompletion(response))),
    );
    let (progress, _receiver) = ProgressChannel::new();
    let session = SessionDriver::connect_with_transport(transport)
        .await
        .expect("connect");
    evaluator
        .start_with_session(session, &progress)
        .await
        .expect("start");

    evaluator
        .execute("create_project", &progress)
        .await
        .expect("execute");
    evaluator.regenerate(&progress).await.expect("regenerate");

    let get = evaluator
        .test_cases()
        .iter()
        .find(|case| case.tool_name == "get_project")
        .expect("get_project case");
    assert_eq!(get.arguments["project_id"], json!("proj_from_model"));

    let create = evaluator
        .test_cases()
        .iter()
        .find(|case| case.tool_name == "create_project")
        .expect("create_project case");
    assert!(create.executed);
}
