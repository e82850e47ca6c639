//! Evaluation orchestration: connect, discover, synthesize, execute.

use std::fmt;
use std::sync::Arc;

use rmcp::model::Tool;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::auth::{
    decode_state, AuthContext, AuthError, AuthFlow, AuthFlowConfig, AuthorizationSession,
    PendingAuthorization,
};
use crate::completion::CompletionClient;
use crate::context::{result_payload, ContextEntry, ContextStore};
use crate::enhance::{BatchEnhancer, EnhanceRequest};
use crate::progress::ProgressChannel;
use crate::resolver;
use crate::session::{SessionDriver, SessionError};
use crate::synthesis::{Synthesizer, SynthesizerConfig};
use crate::{
    ArgumentSet, EvaluationResult, ExecutionRecord, HttpTargetConfig, JsonObject, ProbeResult,
    TestCase,
};

/// States of one evaluation session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationState {
    Idle,
    Connecting,
    Discovering,
    AwaitingAuth,
    Synthesizing,
    Ready,
    Executing,
    Regenerating,
}

/// Errors surfaced by the orchestrator.
#[derive(Debug)]
pub enum EvaluationError {
    /// Connection-level failure; the user may re-attempt, nothing retries
    /// internally.
    Transport(SessionError),
    /// Authorization flow failure.
    Auth(AuthError),
    /// Regeneration was requested without any observed output to use.
    EmptyContext,
    /// The requested operation is not valid in the current state.
    InvalidState(&'static str),
    /// The named tool was not discovered on this server.
    UnknownTool(String),
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationError::Transport(error) => write!(f, "transport failure: {error}"),
            EvaluationError::Auth(error) => write!(f, "authorization failure: {error}"),
            EvaluationError::EmptyContext => write!(
                f,
                "regeneration requires at least one executed tool in the context"
            ),
            EvaluationError::InvalidState(message) => write!(f, "invalid state: {message}"),
            EvaluationError::UnknownTool(name) => write!(f, "unknown tool: {name}"),
        }
    }
}

impl std::error::Error for EvaluationError {}

impl From<SessionError> for EvaluationError {
    fn from(error: SessionError) -> Self {
        EvaluationError::Transport(error)
    }
}

impl From<AuthError> for EvaluationError {
    fn from(error: AuthError) -> Self {
        EvaluationError::Auth(error)
    }
}

/// Outcome of starting (or resuming) an evaluation.
#[derive(Debug)]
pub enum StartOutcome {
    /// Discovery and synthesis finished; test cases are pending approval.
    Ready,
    /// The server demands authorization. The caller presents the URL and
    /// holds the pending session opaquely until the redirect returns.
    AuthorizationRequired(PendingAuthorization),
    /// The evaluation ended without test cases, e.g. an informative
    /// authorization failure.
    Completed(EvaluationResult),
}

/// Configuration for one evaluation session.
#[derive(Clone, Debug, Default)]
pub struct EvaluatorConfig {
    pub target: HttpTargetConfig,
    pub synthesizer: SynthesizerConfig,
    pub auth: AuthFlowConfig,
}

/// Drives one evaluation session through its state machine.
pub struct Evaluator {
    config: EvaluatorConfig,
    synthesizer: Synthesizer,
    enhancer: BatchEnhancer,
    state: EvaluationState,
    auth: AuthContext,
    session: Option<SessionDriver>,
    tools: Vec<Tool>,
    cases: Vec<TestCase>,
    context: ContextStore,
    probes: Vec<ProbeResult>,
}

impl Evaluator {
    /// Creates an evaluator; pass `None` to run without enhancement.
    pub fn new(config: EvaluatorConfig, completion: Option<Arc<dyn CompletionClient>>) -> Self {
        let synthesizer = Synthesizer::new(config.synthesizer);
        Self {
            config,
            synthesizer,
            enhancer: BatchEnhancer::new(completion),
            state: EvaluationState::Idle,
            auth: AuthContext::Unauthenticated,
            session: None,
            tools: Vec::new(),
            cases: Vec::new(),
            context: ContextStore::new(),
            probes: Vec::new(),
        }
    }

    pub fn state(&self) -> EvaluationState {
        self.state
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Point-in-time result snapshot.
    pub fn result(&self) -> EvaluationResult {
        EvaluationResult {
            server_url: self.config.target.url.clone(),
            probes: self.probes.clone(),
            test_cases: self.cases.clone(),
        }
    }

    /// Connects to the target and runs discovery and synthesis.
    ///
    /// An authorization signal on connect hands back an authorization URL
    /// instead of failing; any other connection error is a transport error
    /// left to the user to re-attempt.
    pub async fn start(
        &mut self,
        progress: &ProgressChannel,
    ) -> Result<StartOutcome, EvaluationError> {
        if !matches!(
            self.state,
            EvaluationState::Idle | EvaluationState::AwaitingAuth
        ) {
            return Err(EvaluationError::InvalidState(
                "start is only valid before discovery",
            ));
        }
        self.state = EvaluationState::Connecting;
        progress.log(format!("Connecting to {}", self.config.target.url));

        let mut target = self.config.target.clone();
        if let Some(tokens) = self.auth.token() {
            target.auth_token = Some(tokens.access_token.clone());
        }

        match SessionDriver::connect_http(&target).await {
            Ok(session) => self.run_discovery(session, progress).await,
            Err(error) if error.is_auth_required() => {
                self.handle_auth_required(error, progress).await
            }
            Err(error) => {
                self.state = EvaluationState::Idle;
                Err(EvaluationError::Transport(error))
            }
        }
    }

    /// Runs discovery and synthesis over an already-connected session.
    ///
    /// Embedders holding their own transport use this directly; [`start`]
    /// lands here after connecting.
    ///
    /// [`start`]: Evaluator::start
    pub async fn start_with_session(
        &mut self,
        session: SessionDriver,
        progress: &ProgressChannel,
    ) -> Result<StartOutcome, EvaluationError> {
        self.run_discovery(session, progress).await
    }

    /// Resumes the authorization flow with the code from the redirect.
    ///
    /// The session is the opaque value handed out with
    /// [`StartOutcome::AuthorizationRequired`]; the state round-trips the
    /// target server URL so no other context is needed.
    pub async fn resume_with_code(
        &mut self,
        session: AuthorizationSession,
        code: &str,
        state: &str,
        progress: &ProgressChannel,
    ) -> Result<StartOutcome, EvaluationError> {
        let resume = decode_state(state)?;
        self.config.target.url = resume.server_url;
        self.state = EvaluationState::AwaitingAuth;

        let flow = AuthFlow::new(self.config.auth.clone())?;
        progress.log("Exchanging authorization code for a token");
        match flow.exchange(session, code).await {
            Ok(tokens) => {
                self.auth = AuthContext::Authenticated(tokens);
                self.probes.push(ProbeResult {
                    name: "authorization".to_string(),
                    passed: true,
                    note: Some("authorization code flow completed".to_string()),
                });
                self.start(progress).await
            }
            Err(error) => Ok(self.complete_with_auth_failure(error, progress)),
        }
    }

    async fn handle_auth_required(
        &mut self,
        error: SessionError,
        progress: &ProgressChannel,
    ) -> Result<StartOutcome, EvaluationError> {
        if self.auth.token().is_some() {
            // The exchanged token was rejected; report instead of looping.
            let failure = AuthError::TokenExchangeFailed(format!(
                "server rejected the exchanged token: {error}"
            ));
            return Ok(self.complete_with_auth_failure(failure, progress));
        }
        self.state = EvaluationState::AwaitingAuth;
        progress.log("Server requires authorization, starting PKCE flow");

        let flow = AuthFlow::new(self.config.auth.clone())?;
        match flow.begin(&self.config.target.url).await {
            Ok(pending) => {
                self.auth = AuthContext::Authenticating(pending.session.clone());
                progress.log("Authorization URL ready, waiting for the redirect to return");
                Ok(StartOutcome::AuthorizationRequired(pending))
            }
            Err(error) => Ok(self.complete_with_auth_failure(error, progress)),
        }
    }

    fn complete_with_auth_failure(
        &mut self,
        error: AuthError,
        progress: &ProgressChannel,
    ) -> StartOutcome {
        progress.log(format!("Authorization attempt failed: {error}"));
        self.probes.push(ProbeResult {
            name: "authorization".to_string(),
            passed: false,
            note: Some(format!(
                "{error}; the server demands authorization but the flow could not \
                 complete, so tools were not evaluated"
            )),
        });
        self.state = EvaluationState::Ready;
        StartOutcome::Completed(self.result())
    }

    async fn run_discovery(
        &mut self,
        session: SessionDriver,
        progress: &ProgressChannel,
    ) -> Result<StartOutcome, EvaluationError> {
        self.state = EvaluationState::Discovering;
        self.tools = session.list_tools().await?;
        progress.log(format!("Discovered {} tools", self.tools.len()));

        self.probe_resources(&session, progress).await;
        self.session = Some(session);

        self.state = EvaluationState::Synthesizing;
        let arguments = self.synthesize_arguments(progress).await;
        self.cases = self
            .tools
            .iter()
            .map(|tool| {
                let mut case = TestCase::pending(
                    tool.name.to_string(),
                    arguments
                        .get(tool.name.as_ref())
                        .cloned()
                        .unwrap_or_default(),
                );
                case.description = tool.description.as_ref().map(|text| text.to_string());
                case
            })
            .collect();
        self.annotate_pending_cases().await;
        self.state = EvaluationState::Ready;
        progress.log(format!("{} test cases ready", self.cases.len()));
        Ok(StartOutcome::Ready)
    }

    async fn probe_resources(&mut self, session: &SessionDriver, progress: &ProgressChannel) {
        let probe = match session.list_resources().await {
            Ok(resources) => ProbeResult {
                name: "resources/list".to_string(),
                passed: true,
                note: Some(format!("{} resources listed", resources.len())),
            },
            Err(error) if error.is_method_not_found() => ProbeResult {
                name: "resources/list".to_string(),
                passed: true,
                note: Some(
                    "resources/list is not supported (-32601); the capability is optional"
                        .to_string(),
                ),
            },
            Err(error) => ProbeResult {
                name: "resources/list".to_string(),
                passed: false,
                note: Some(format!("resources/list failed: {error}")),
            },
        };
        progress.log(format!(
            "Resource probe {}",
            if probe.passed { "passed" } else { "failed" }
        ));
        self.probes.push(probe);
    }

    /// Fallback synthesis fans out per tool and joins before enhancement;
    /// cross-tool consistency comes from the single batch completion call.
    async fn synthesize_arguments(&self, progress: &ProgressChannel) -> ArgumentSet {
        let jobs = self.tools.iter().map(|tool| async move {
            (
                tool.name.to_string(),
                self.synthesizer.synthesize(tool.input_schema.as_ref()),
            )
        });
        let fallback: ArgumentSet = futures::future::join_all(jobs).await.into_iter().collect();

        if self.enhancer.is_available() {
            progress.log("Refining arguments with the completion service");
        }
        let entries = self.context.snapshot().await;
        self.enhancer
            .enhance(EnhanceRequest {
                server_url: &self.config.target.url,
                tools: &self.tools,
                fallback: &fallback,
                context: &entries,
            })
            .await
    }

    /// Executes one approved test case.
    pub async fn execute(
        &mut self,
        tool_name: &str,
        progress: &ProgressChannel,
    ) -> Result<(), EvaluationError> {
        if self.state != EvaluationState::Ready {
            return Err(EvaluationError::InvalidState("execute requires Ready"));
        }
        let index = self
            .cases
            .iter()
            .position(|case| case.tool_name == tool_name)
            .ok_or_else(|| EvaluationError::UnknownTool(tool_name.to_string()))?;
        let session = self
            .session
            .as_ref()
            .ok_or(EvaluationError::InvalidState("no connected session"))?;

        self.state = EvaluationState::Executing;
        progress.log(format!("Executing {tool_name}"));
        let case = &self.cases[index];
        let record = execute_case(
            session,
            &self.context,
            &case.tool_name,
            case.description.clone(),
            &case.arguments,
        )
        .await;
        apply_record(&mut self.cases[index], record, progress);
        self.annotate_pending_cases().await;
        self.state = EvaluationState::Ready;
        Ok(())
    }

    /// Executes every not-yet-executed case, one concurrent task per case;
    /// each success updates the context store independently.
    pub async fn execute_all(
        &mut self,
        progress: &ProgressChannel,
    ) -> Result<(), EvaluationError> {
        if self.state != EvaluationState::Ready {
            return Err(EvaluationError::InvalidState("execute requires Ready"));
        }
        let session = self
            .session
            .as_ref()
            .ok_or(EvaluationError::InvalidState("no connected session"))?;

        self.state = EvaluationState::Executing;
        let pending: Vec<usize> = self
            .cases
            .iter()
            .enumerate()
            .filter(|(_, case)| !case.executed)
            .map(|(index, _)| index)
            .collect();
        progress.log(format!("Executing {} test cases", pending.len()));

        let jobs = pending.iter().map(|&index| {
            let case = &self.cases[index];
            let context = self.context.clone();
            async move {
                (
                    index,
                    execute_case(
                        session,
                        &context,
                        &case.tool_name,
                        case.description.clone(),
                        &case.arguments,
                    )
                    .await,
                )
            }
        });
        let records = futures::future::join_all(jobs).await;
        for (index, record) in records {
            apply_record(&mut self.cases[index], record, progress);
        }
        self.annotate_pending_cases().await;
        self.state = EvaluationState::Ready;
        Ok(())
    }

    /// Re-runs enhancement over the not-yet-executed cases with the current
    /// execution context, replacing their arguments wholesale.
    pub async fn regenerate(
        &mut self,
        progress: &ProgressChannel,
    ) -> Result<(), EvaluationError> {
        if self.state != EvaluationState::Ready {
            return Err(EvaluationError::InvalidState("regenerate requires Ready"));
        }
        let entries = self.context.snapshot().await;
        self.state = EvaluationState::Regenerating;
        progress.log("Regenerating arguments for unexecuted test cases");

        let pending_names: Vec<String> = self
            .cases
            .iter()
            .filter(|case| !case.executed)
            .map(|case| case.tool_name.clone())
            .collect();
        let tools: Vec<Tool> = self
            .tools
            .iter()
            .filter(|tool| pending_names.contains(&tool.name.to_string()))
            .cloned()
            .collect();
        let fallback: ArgumentSet = self
            .cases
            .iter()
            .filter(|case| !case.executed)
            .map(|case| (case.tool_name.clone(), case.arguments.clone()))
            .collect();

        let regenerated = regenerate_arguments(
            &tools,
            &self.config.target.url,
            &entries,
            &fallback,
            &self.enhancer,
        )
        .await;
        let regenerated = match regenerated {
            Ok(regenerated) => regenerated,
            Err(error) => {
                self.state = EvaluationState::Ready;
                return Err(error);
            }
        };
        for case in self.cases.iter_mut().filter(|case| !case.executed) {
            if let Some(arguments) = regenerated.get(&case.tool_name) {
                case.arguments = arguments.clone();
            }
        }
        self.annotate_pending_cases().await;
        self.state = EvaluationState::Ready;
        Ok(())
    }

    /// Re-derives placeholder arguments from the context and refreshes the
    /// dependency guidance on every unexecuted case.
    async fn annotate_pending_cases(&mut self) {
        let entries = self.context.snapshot().await;
        for case in self.cases.iter_mut().filter(|case| !case.executed) {
            let Some(schema) = schema_for(&self.tools, &case.tool_name) else {
                continue;
            };
            let outcome = resolver::resolve_arguments(&case.arguments, &schema, &entries);
            case.arguments = outcome.arguments;
            case.unresolved_dependencies =
                resolver::unresolved_dependencies(&case.arguments, &schema, &entries);
            case.placeholder_fields =
                resolver::placeholder_fields(&case.arguments, &schema, &outcome.touched);
            let mut prerequisites: Vec<String> = Vec::new();
            for field in &case.unresolved_dependencies {
                for tool in resolver::prerequisite_tools(field, &self.tools) {
                    if !prerequisites.contains(&tool) {
                        prerequisites.push(tool);
                    }
                }
            }
            case.prerequisites = prerequisites;
        }
    }
}

fn schema_for(tools: &[Tool], name: &str) -> Option<JsonObject> {
    tools
        .iter()
        .find(|tool| tool.name == name)
        .map(|tool| tool.input_schema.as_ref().clone())
}

/// The §6 regenerate contract: tools, target, and a non-empty execution
/// context in; arguments-by-tool out. Regeneration with nothing observed is
/// rejected because it has no information advantage over discovery-time
/// synthesis.
pub async fn regenerate_arguments(
    tools: &[Tool],
    server_url: &str,
    entries: &[ContextEntry],
    fallback: &ArgumentSet,
    enhancer: &BatchEnhancer,
) -> Result<ArgumentSet, EvaluationError> {
    if entries.is_empty() {
        return Err(EvaluationError::EmptyContext);
    }
    Ok(enhancer
        .enhance(EnhanceRequest {
            server_url,
            tools,
            fallback,
            context: entries,
        })
        .await)
}

async fn execute_case(
    session: &SessionDriver,
    context: &ContextStore,
    tool_name: &str,
    description: Option<String>,
    arguments: &JsonObject,
) -> ExecutionRecord {
    match session.call_tool(tool_name, Some(arguments.clone())).await {
        Ok(result) => {
            let payload = result_payload(&result);
            if result.is_error.unwrap_or(false) {
                let message = error_text(&payload);
                let diagnosis = diagnose_relative_path(&message);
                ExecutionRecord {
                    content: payload,
                    is_error: true,
                    error_message: Some(message),
                    diagnosis,
                }
            } else {
                context
                    .record(ContextEntry::new(tool_name, description, payload.clone()))
                    .await;
                ExecutionRecord {
                    content: payload,
                    is_error: false,
                    error_message: None,
                    diagnosis: None,
                }
            }
        }
        Err(error) => {
            let message = error.to_string();
            let diagnosis = diagnose_relative_path(&message);
            ExecutionRecord {
                content: JsonValue::Null,
                is_error: true,
                error_message: Some(message),
                diagnosis,
            }
        }
    }
}

fn apply_record(case: &mut TestCase, record: ExecutionRecord, progress: &ProgressChannel) {
    case.executed = true;
    case.passed = !record.is_error;
    progress.log(format!(
        "{} {}",
        case.tool_name,
        if case.passed { "passed" } else { "failed" }
    ));
    case.result = Some(record);
}

fn error_text(payload: &JsonValue) -> String {
    match payload {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Flags the common failure mode of a tool issuing relative-path HTTP calls
/// that resolve against the wrong host.
pub(crate) fn diagnose_relative_path(message: &str) -> Option<String> {
    let looks_relative = message.contains("Failed to parse URL")
        || message.contains("Invalid URL")
        || message.contains("relative URL without a base");
    looks_relative.then(|| {
        "the tool appears to issue relative-path HTTP requests that resolve against the \
         wrong host; its upstream base URL is likely misconfigured"
            .to_string()
    })
}
