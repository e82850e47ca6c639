//! Public API types for configuring and reporting toolgauge evaluations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod auth;
pub mod completion;
pub mod context;
pub mod enhance;
pub mod evaluator;
pub mod progress;
pub mod resolver;
pub mod session;
pub mod synthesis;

pub use rmcp::model::{ErrorCode, ErrorData, JsonObject, Tool};
pub use rmcp::service::{ClientInitializeError, ServiceError};

pub use auth::{
    AuthContext, AuthError, AuthFlow, AuthorizationSession, PendingAuthorization, TokenSet,
};
pub use completion::{ChatCompletionsClient, CompletionClient, CompletionConfig};
pub use context::{ContextEntry, ContextStore};
pub use enhance::BatchEnhancer;
pub use evaluator::{EvaluationError, EvaluationState, Evaluator, EvaluatorConfig, StartOutcome};
pub use progress::{ProgressChannel, ProgressMessage};
pub use session::{SessionDriver, SessionError};
pub use synthesis::{Synthesizer, SynthesizerConfig};

/// Arguments for every discovered tool, keyed by tool name.
pub type ArgumentSet = BTreeMap<String, JsonObject>;

/// Configuration for the HTTP MCP endpoint under evaluation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HttpTargetConfig {
    /// The HTTP endpoint URL for MCP requests.
    pub url: String,
    /// Optional bearer token to attach to Authorization headers.
    pub auth_token: Option<String>,
    /// Timeout in seconds applied to every remote call.
    pub timeout_secs: u64,
}

impl Default for HttpTargetConfig {
    fn default() -> Self {
        Self::new("")
    }
}

impl HttpTargetConfig {
    /// Creates a target configuration with the default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            timeout_secs: 30,
        }
    }

    /// Sets the bearer token attached to MCP requests.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the remote-call timeout.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// One synthesized invocation of a discovered tool, tracked across execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCase {
    /// The MCP tool name.
    pub tool_name: String,
    /// Tool description as reported by the server.
    pub description: Option<String>,
    /// Synthesized call arguments.
    pub arguments: JsonObject,
    /// Whether the case has been executed.
    pub executed: bool,
    /// Whether the executed case passed.
    pub passed: bool,
    /// Execution record, present once executed.
    pub result: Option<ExecutionRecord>,
    /// Required identifier fields still holding placeholder values.
    pub unresolved_dependencies: Vec<String>,
    /// Required fields left on generation placeholders by every pass.
    pub placeholder_fields: Vec<String>,
    /// Tools whose output would satisfy the unresolved fields.
    pub prerequisites: Vec<String>,
}

impl TestCase {
    /// Creates a pending test case for a tool.
    pub fn pending(tool_name: impl Into<String>, arguments: JsonObject) -> Self {
        Self {
            tool_name: tool_name.into(),
            description: None,
            arguments,
            executed: false,
            passed: false,
            result: None,
            unresolved_dependencies: Vec::new(),
            placeholder_fields: Vec::new(),
            prerequisites: Vec::new(),
        }
    }
}

/// Raw outcome of executing one test case against the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// The response payload, structured content when available.
    pub content: JsonValue,
    /// Whether the server flagged the response as an error.
    pub is_error: bool,
    /// Remote error message, verbatim, for failed executions.
    pub error_message: Option<String>,
    /// Diagnosis attached when the failure matches a known misconfiguration.
    pub diagnosis: Option<String>,
}

/// Outcome of a protocol probe that is not tied to a single tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Probe name, e.g. `resources/list` or `authorization`.
    pub name: String,
    /// Whether the probe passed.
    pub passed: bool,
    /// Additional context for the outcome.
    pub note: Option<String>,
}

/// Terminal payload of one evaluation session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// URL of the server under evaluation.
    pub server_url: String,
    /// Non-tool protocol probes.
    pub probes: Vec<ProbeResult>,
    /// One entry per discovered tool.
    pub test_cases: Vec<TestCase>,
}

impl EvaluationResult {
    /// Returns true when every executed case and probe passed.
    pub fn all_passed(&self) -> bool {
        self.probes.iter().all(|probe| probe.passed)
            && self
                .test_cases
                .iter()
                .filter(|case| case.executed)
                .all(|case| case.passed)
    }
}
