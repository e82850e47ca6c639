//! Scripted in-memory MCP transports and fixtures for toolgauge tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use ctor::ctor;

#[ctor]
fn init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .is_test(true)
        .try_init();
}

use rmcp::model::{
    AnnotateAble, CallToolResult, ClientJsonRpcMessage, ClientRequest, Content, ErrorCode, ErrorData,
    JsonRpcError, JsonRpcMessage, JsonRpcResponse, JsonRpcVersion2_0, ListResourcesResult,
    ListToolsResult, RawResource, RequestId, Resource, ServerInfo, ServerJsonRpcMessage,
    ServerResult, Tool,
};
use rmcp::service::RoleClient;
use rmcp::transport::Transport;
use serde_json::json;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// Builds a tool with the provided input schema.
pub fn tool_with_schema(name: &str, description: &str, input_schema: serde_json::Value) -> Tool {
    Tool::new(
        name.to_string(),
        description.to_string(),
        input_schema
            .as_object()
            .cloned()
            .expect("input schema object"),
    )
}

/// Builds a tool with an empty object schema.
pub fn stub_tool(name: &str) -> Tool {
    tool_with_schema(name, "stub tool", json!({ "type": "object" }))
}

/// Builds a resource fixture.
pub fn stub_resource(uri: &str, name: &str) -> Resource {
    RawResource::new(uri, name.to_string()).no_annotation()
}

pub fn init_response(id: RequestId) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id,
        result: ServerResult::InitializeResult(ServerInfo::default()),
    })
}

pub fn list_tools_response(id: RequestId, tools: Vec<Tool>) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id,
        result: ServerResult::ListToolsResult(ListToolsResult {
            tools,
            ..Default::default()
        }),
    })
}

pub fn list_resources_response(id: RequestId, resources: Vec<Resource>) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id,
        result: ServerResult::ListResourcesResult(ListResourcesResult {
            resources,
            ..Default::default()
        }),
    })
}

pub fn call_tool_response(id: RequestId, response: CallToolResult) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id,
        result: ServerResult::CallToolResult(response),
    })
}

pub fn method_not_found_response(id: RequestId) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Error(JsonRpcError {
        jsonrpc: JsonRpcVersion2_0,
        id,
        error: ErrorData::new(ErrorCode::METHOD_NOT_FOUND, "Method not found", None),
    })
}

/// How the scripted server answers `resources/list`.
#[derive(Clone)]
pub enum ResourceScript {
    Supported(Vec<Resource>),
    MethodNotFound,
}

/// In-memory MCP server transport with scripted tool responses.
///
/// Initialization and `tools/list` answer from fixtures; `tools/call`
/// consumes the per-tool queue when one is scripted and falls back to a
/// structured `{"status": "ok"}` otherwise.
pub struct ScriptedTransport {
    tools: Vec<Tool>,
    resources: ResourceScript,
    call_results: Arc<Mutex<HashMap<String, VecDeque<CallToolResult>>>>,
    responses: Arc<AsyncMutex<mpsc::UnboundedReceiver<ServerJsonRpcMessage>>>,
    response_tx: mpsc::UnboundedSender<ServerJsonRpcMessage>,
}

impl ScriptedTransport {
    pub fn new(tools: Vec<Tool>) -> Self {
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        Self {
            tools,
            resources: ResourceScript::MethodNotFound,
            call_results: Arc::new(Mutex::new(HashMap::new())),
            responses: Arc::new(AsyncMutex::new(response_rx)),
            response_tx,
        }
    }

    /// Queues a result for one tool; repeat to script successive calls.
    pub fn with_call_result(self, tool: &str, result: CallToolResult) -> Self {
        self.call_results
            .lock()
            .expect("call results")
            .entry(tool.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// Scripts a structured success payload for one tool.
    pub fn with_structured_result(self, tool: &str, payload: serde_json::Value) -> Self {
        self.with_call_result(tool, CallToolResult::structured(payload))
    }

    /// Scripts an in-band error response for one tool.
    pub fn with_error_result(self, tool: &str, message: &str) -> Self {
        self.with_call_result(tool, CallToolResult::error(vec![Content::text(message)]))
    }

    /// Makes `resources/list` answer with fixtures instead of -32601.
    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = ResourceScript::Supported(resources);
        self
    }

    fn respond(&self, request: &ClientJsonRpcMessage) -> Option<ServerJsonRpcMessage> {
        let JsonRpcMessage::Request(request) = request else {
            return None;
        };
        let id = request.id.clone();
        match &request.request {
            ClientRequest::InitializeRequest(_) => Some(init_response(id)),
            ClientRequest::ListToolsRequest(_) => {
                Some(list_tools_response(id, self.tools.clone()))
            }
            ClientRequest::ListResourcesRequest(_) => match &self.resources {
                ResourceScript::Supported(resources) => {
                    Some(list_resources_response(id, resources.clone()))
                }
                ResourceScript::MethodNotFound => Some(method_not_found_response(id)),
            },
            ClientRequest::CallToolRequest(call) => {
                let name = call.params.name.to_string();
                let scripted = self
                    .call_results
                    .lock()
                    .expect("call results")
                    .get_mut(&name)
                    .and_then(VecDeque::pop_front);
                let result = scripted
                    .unwrap_or_else(|| CallToolResult::structured(json!({"status": "ok"})));
                Some(call_tool_response(id, result))
            }
            _ => None,
        }
    }
}

impl Transport<RoleClient> for ScriptedTransport {
    type Error = TransportError;

    fn send(
        &mut self,
        item: ClientJsonRpcMessage,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send + 'static {
        if let Some(response) = self.respond(&item) {
            let _ = self.response_tx.send(response);
        }
        std::future::ready(Ok(()))
    }

    fn receive(&mut self) -> impl std::future::Future<Output = Option<ServerJsonRpcMessage>> {
        let responses = Arc::clone(&self.responses);
        async move {
            let mut receiver = responses.lock().await;
            receiver.recv().await
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Transport whose sends always fail, for exercising connect errors.
pub struct FailingConnectTransport;

impl Transport<RoleClient> for FailingConnectTransport {
    type Error = TransportError;

    fn send(
        &mut self,
        _item: ClientJsonRpcMessage,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send + 'static {
        std::future::ready(Err(TransportError("connect")))
    }

    fn receive(&mut self) -> impl std::future::Future<Output = Option<ServerJsonRpcMessage>> {
        std::future::ready(None)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct TransportError(pub &'static str);

impl std::fmt::Display for TransportError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0)
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_message(method: &str) -> ClientJsonRpcMessage {
        serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": {}
        }))
        .expect("client message")
    }

    #[test]
    fn scripted_transport_answers_list_tools() {
        let transport = ScriptedTransport::new(vec![stub_tool("echo")]);
        let message = request_message("tools/list");
        let response = transport.respond(&message).expect("response");
        match response {
            ServerJsonRpcMessage::Response(JsonRpcResponse {
                result: ServerResult::ListToolsResult(result),
                ..
            }) => assert_eq!(result.tools.len(), 1),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn scripted_call_results_are_consumed_in_order() {
        let transport = ScriptedTransport::new(vec![stub_tool("echo")])
            .with_structured_result("echo", json!({"round": 1}))
            .with_structured_result("echo", json!({"round": 2}));
        let first = transport
            .call_results
            .lock()
            .expect("call results")
            .get_mut("echo")
            .and_then(VecDeque::pop_front)
            .expect("first");
        assert_eq!(first.structured_content, Some(json!({"round": 1})));
    }

    #[test]
    fn resources_default_to_method_not_found() {
        let transport = ScriptedTransport::new(Vec::new());
        assert!(matches!(
            transport.resources,
            ResourceScript::MethodNotFound
        ));
    }
}
