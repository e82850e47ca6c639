//! Async MCP session driver over the rmcp client service.

use std::fmt;
use std::time::Duration;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, ErrorCode, PaginatedRequestParam, Resource, Tool,
};
use rmcp::service::{ClientInitializeError, RoleClient, RunningService, ServiceError};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::ServiceExt;

use crate::{HttpTargetConfig, JsonObject};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by the session driver.
#[derive(Debug)]
pub enum SessionError {
    /// MCP initialization failed.
    Initialize(ClientInitializeError),
    /// A request failed after initialization.
    Service(ServiceError),
    /// A remote call exceeded the configured timeout.
    Timeout { secs: u64 },
    /// The target configuration could not be turned into a transport.
    InvalidTarget(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Initialize(error) => write!(f, "failed to initialize session: {error}"),
            SessionError::Service(error) => write!(f, "session request failed: {error}"),
            SessionError::Timeout { secs } => {
                write!(f, "session request timed out after {secs}s")
            }
            SessionError::InvalidTarget(message) => write!(f, "invalid target: {message}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl SessionError {
    /// Returns true when the error looks like the server demanding authorization.
    ///
    /// Matches an HTTP 401 status or error text mentioning authentication, the
    /// signal that transitions the evaluation into the authorization flow.
    pub fn is_auth_required(&self) -> bool {
        auth_signal(&self.to_string())
    }

    /// Returns true for the JSON-RPC method-not-found error code.
    pub fn is_method_not_found(&self) -> bool {
        match self {
            SessionError::Service(ServiceError::McpError(data)) => {
                data.code == ErrorCode::METHOD_NOT_FOUND
            }
            _ => false,
        }
    }
}

fn auth_signal(text: &str) -> bool {
    text.contains("401")
        || text.contains("Unauthorized")
        || text.to_ascii_lowercase().contains("authentication")
}

/// Stateful MCP session over a running rmcp client service.
pub struct SessionDriver {
    service: RunningService<RoleClient, ()>,
    timeout: Duration,
}

impl SessionDriver {
    /// Connects to an HTTP MCP endpoint, attaching a bearer token when configured.
    pub async fn connect_http(config: &HttpTargetConfig) -> Result<Self, SessionError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let transport = match &config.auth_token {
            Some(token) => {
                let client = authorized_client(token, timeout)?;
                StreamableHttpClientTransport::with_client(
                    client,
                    StreamableHttpClientTransportConfig {
                        uri: config.url.clone().into(),
                        ..Default::default()
                    },
                )
            }
            None => StreamableHttpClientTransport::from_uri(config.url.as_str()),
        };
        let driver = Self::connect_with_transport(transport).await?;
        Ok(driver.with_timeout(timeout))
    }

    /// Connects over any rmcp transport; used by tests with scripted transports.
    pub async fn connect_with_transport<T, E, A>(transport: T) -> Result<Self, SessionError>
    where
        T: rmcp::transport::IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let service = ()
            .serve(transport)
            .await
            .map_err(SessionError::Initialize)?;
        Ok(Self {
            service,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lists every tool the server exposes, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, SessionError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .take()
                .map(|cursor| PaginatedRequestParam {
                    cursor: Some(cursor),
                    ..Default::default()
                });
            let page = self
                .with_request_timeout(self.service.list_tools(params))
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tools)
    }

    /// Lists server resources; servers without the capability report
    /// method-not-found, which callers treat as an expected outcome.
    pub async fn list_resources(&self) -> Result<Vec<Resource>, SessionError> {
        let page = self
            .with_request_timeout(self.service.list_resources(None))
            .await?;
        Ok(page.resources)
    }

    /// Invokes a tool with the provided arguments.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, SessionError> {
        self.with_request_timeout(self.service.call_tool(CallToolRequestParam {
            name: name.to_string().into(),
            arguments,
            meta: None,
            task: None,
        }))
        .await
    }

    /// Shuts the session down, ignoring cancellation races.
    pub async fn shutdown(self) {
        let _ = self.service.cancel().await;
    }

    async fn with_request_timeout<T>(
        &self,
        request: impl std::future::Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, SessionError> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(SessionError::Service),
            Err(_) => Err(SessionError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

fn authorized_client(token: &str, timeout: Duration) -> Result<reqwest::Client, SessionError> {
    let mut headers = reqwest::header::HeaderMap::new();
    let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|error| SessionError::InvalidTarget(format!("invalid auth token: {error}")))?;
    value.set_sensitive(true);
    headers.insert(reqwest::header::AUTHORIZATION, value);
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|error| SessionError::InvalidTarget(format!("failed to build client: {error}")))
}
