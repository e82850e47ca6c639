//! Batch argument enhancement through the completion capability.
//!
//! The whole tool set goes into one completion request so the model can keep
//! values mutually consistent: an identifier invented for a `create` call can
//! be reused by the dependent `read` call. Per-tool requests could never see
//! that relationship. Every failure path lands on the fallback set; nothing
//! here is fatal to the evaluation.

use std::sync::Arc;

use rmcp::model::Tool;
use serde_json::Value as JsonValue;

use crate::completion::{CompletionClient, CompletionRequest};
use crate::context::ContextEntry;
use crate::ArgumentSet;

const SYSTEM_INSTRUCTION: &str = "You generate test arguments for tools exposed by an MCP \
    server. Produce realistic, mutually consistent values: when one tool creates an entity \
    and another consumes it, reuse the same identifier. Prefer identifiers observed in real \
    outputs over invented ones. Respond with a single JSON object keyed by tool name, where \
    each value is the argument object for that tool. No prose, no markdown.";

const TEMPERATURE: f32 = 0.2;

/// Refines fallback arguments with one batch completion request.
pub struct BatchEnhancer {
    client: Option<Arc<dyn CompletionClient>>,
}

/// Inputs for one enhancement pass.
pub struct EnhanceRequest<'a> {
    pub server_url: &'a str,
    pub tools: &'a [Tool],
    pub fallback: &'a ArgumentSet,
    pub context: &'a [ContextEntry],
}

impl BatchEnhancer {
    /// Creates an enhancer; `None` means the capability is absent and every
    /// pass returns the fallback set.
    pub fn new(client: Option<Arc<dyn CompletionClient>>) -> Self {
        Self { client }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    /// Produces the enhanced argument set, falling back per batch on parse
    /// failure and per tool on missing required fields.
    pub async fn enhance(&self, request: EnhanceRequest<'_>) -> ArgumentSet {
        let Some(client) = &self.client else {
            log::debug!("completion capability absent, keeping fallback arguments");
            return request.fallback.clone();
        };
        let prompt = build_prompt(&request);
        let response = match client
            .complete(CompletionRequest {
                prompt,
                system: SYSTEM_INSTRUCTION.to_string(),
                temperature: TEMPERATURE,
            })
            .await
        {
            Ok(text) => text,
            Err(error) => {
                log::warn!("completion request failed, keeping fallback arguments: {error}");
                return request.fallback.clone();
            }
        };
        apply_response(&response, request.tools, request.fallback)
    }
}

/// Merges a completion response into the fallback set.
///
/// An unparseable response abandons the batch entirely; a parseable one is
/// applied tool by tool, reverting any tool whose entry is missing, not an
/// object, or short of a schema-required field.
pub fn apply_response(response: &str, tools: &[Tool], fallback: &ArgumentSet) -> ArgumentSet {
    let stripped = strip_code_fences(response);
    let parsed: JsonValue = match serde_json::from_str(stripped) {
        Ok(parsed) => parsed,
        Err(error) => {
            log::warn!("enhancement response was not JSON, keeping fallback arguments: {error}");
            return fallback.clone();
        }
    };
    let Some(by_tool) = parsed.as_object() else {
        log::warn!("enhancement response was not an object, keeping fallback arguments");
        return fallback.clone();
    };

    let mut output = fallback.clone();
    for tool in tools {
        let name = tool.name.as_ref();
        let Some(enhanced) = by_tool.get(name).and_then(JsonValue::as_object) else {
            log::debug!("no usable enhancement for '{name}', keeping fallback");
            continue;
        };
        if !satisfies_required(tool, enhanced) {
            log::debug!("enhancement for '{name}' misses required fields, keeping fallback");
            continue;
        }
        output.insert(name.to_string(), enhanced.clone());
    }
    output
}

fn satisfies_required(tool: &Tool, arguments: &crate::JsonObject) -> bool {
    tool.input_schema
        .get("required")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(JsonValue::as_str)
        .all(|field| arguments.contains_key(field))
}

/// Strips a surrounding markdown code fence, tolerating a language tag.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.split_once('\n') {
        Some((_language, body)) => body,
        None => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn build_prompt(request: &EnhanceRequest<'_>) -> String {
    let mut prompt = format!(
        "Target MCP server: {}\n\nGenerate one argument object per tool.\n",
        request.server_url
    );

    if !request.context.is_empty() {
        prompt.push_str("\nObserved outputs from tools already executed (reuse these real values):\n");
        for entry in request.context {
            prompt.push_str(&format!("- {}", entry.tool_name));
            if let Some(description) = &entry.description {
                prompt.push_str(&format!(" ({description})"));
            }
            let payload = serde_json::to_string(&entry.raw_result).unwrap_or_default();
            prompt.push_str(&format!(": {payload}\n"));
        }
    }

    prompt.push_str("\nTools:\n");
    for tool in request.tools {
        prompt.push_str(&format!("- name: {}\n", tool.name));
        if let Some(description) = &tool.description {
            prompt.push_str(&format!("  description: {description}\n"));
        }
        let schema = serde_json::to_string(tool.input_schema.as_ref()).unwrap_or_default();
        prompt.push_str(&format!("  input schema: {schema}\n"));
    }

    let fallback = serde_json::to_string(request.fallback).unwrap_or_default();
    prompt.push_str(&format!(
        "\nCurrent draft arguments (improve on these): {fallback}\n"
    ));
    prompt.push_str("\nRespond with one JSON object keyed by tool name.\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionError, CompletionFuture};
    use serde_json::json;

    struct ScriptedCompletion(Result<String, CompletionError>);

    impl CompletionClient for ScriptedCompletion {
        fn complete<'a>(&'a self, _request: CompletionRequest) -> CompletionFuture<'a> {
            let result = self.0.clone();
            Box::pin(async move { result })
        }
    }

    fn tool(name: &str, schema: serde_json::Value) -> Tool {
        Tool::new(
            name.to_string(),
            "test tool",
            schema.as_object().cloned().expect("schema object"),
        )
    }

    fn fallback_for(entries: &[(&str, serde_json::Value)]) -> ArgumentSet {
        entries
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.as_object().cloned().expect("arguments"),
                )
            })
            .collect()
    }

    fn enhancer(result: Result<String, CompletionError>) -> BatchEnhancer {
        BatchEnhancer::new(Some(Arc::new(ScriptedCompletion(result))))
    }

    #[tokio::test]
    async fn absent_capability_returns_fallback_unchanged() {
        let enhancer = BatchEnhancer::new(None);
        let tools = vec![tool("search", json!({"type": "object"}))];
        let fallback = fallback_for(&[("search", json!({"query": "test_query"}))]);
        let output = enhancer
            .enhance(EnhanceRequest {
                server_url: "https://example.test/mcp",
                tools: &tools,
                fallback: &fallback,
                context: &[],
            })
            .await;
        assert_eq!(output, fallback);
    }

    #[tokio::test]
    async fn request_error_returns_fallback_unchanged() {
        let enhancer = enhancer(Err(CompletionError::Request("offline".to_string())));
        let tools = vec![tool("search", json!({"type": "object"}))];
        let fallback = fallback_for(&[("search", json!({"query": "test_query"}))]);
        let output = enhancer
            .enhance(EnhanceRequest {
                server_url: "https://example.test/mcp",
                tools: &tools,
                fallback: &fallback,
                context: &[],
            })
            .await;
        assert_eq!(output, fallback);
    }

    #[tokio::test]
    async fn non_json_response_keeps_every_fallback_entry() {
        let enhancer = enhancer(Ok("I could not produce JSON, sorry.".to_string()));
        let tools = vec![
            tool("alpha", json!({"type": "object"})),
            tool("beta", json!({"type": "object"})),
        ];
        let fallback = fallback_for(&[
            ("alpha", json!({"a": "test_a"})),
            ("beta", json!({"b": "test_b"})),
        ]);
        let output = enhancer
            .enhance(EnhanceRequest {
                server_url: "https://example.test/mcp",
                tools: &tools,
                fallback: &fallback,
                context: &[],
            })
            .await;
        assert_eq!(output, fallback);
    }

    #[tokio::test]
    async fn partial_validation_failure_reverts_only_that_tool() {
        let response = json!({
            "alpha": {"query": "realistic search"},
            "beta": {"unrelated": true}
        })
        .to_string();
        let enhancer = enhancer(Ok(response));
        let tools = vec![
            tool(
                "alpha",
                json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}),
            ),
            tool(
                "beta",
                json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}),
            ),
        ];
        let fallback = fallback_for(&[
            ("alpha", json!({"query": "test_query"})),
            ("beta", json!({"name": "test_name"})),
        ]);
        let output = enhancer
            .enhance(EnhanceRequest {
                server_url: "https://example.test/mcp",
                tools: &tools,
                fallback: &fallback,
                context: &[],
            })
            .await;
        assert_eq!(output["alpha"], *json!({"query": "realistic search"}).as_object().expect("object"));
        assert_eq!(output["beta"], *json!({"name": "test_name"}).as_object().expect("object"));
    }

    #[tokio::test]
    async fn fenced_response_is_unwrapped_before_parsing() {
        let response = "```json\n{\"alpha\": {\"query\": \"from fence\"}}\n```".to_string();
        let enhancer = enhancer(Ok(response));
        let tools = vec![tool(
            "alpha",
            json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}),
        )];
        let fallback = fallback_for(&[("alpha", json!({"query": "test_query"}))]);
        let output = enhancer
            .enhance(EnhanceRequest {
                server_url: "https://example.test/mcp",
                tools: &tools,
                fallback: &fallback,
                context: &[],
            })
            .await;
        assert_eq!(output["alpha"]["query"], json!("from fence"));
    }

    #[test]
    fn strip_code_fences_handles_plain_and_tagged_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  ```json\n{\"a\":1}\n```  "), "{\"a\":1}");
    }

    #[test]
    fn prompt_carries_context_and_tool_schemas() {
        let tools = vec![tool(
            "get_project",
            json!({"type": "object", "properties": {"project_id": {"type": "string"}}}),
        )];
        let fallback = fallback_for(&[("get_project", json!({"project_id": "test_project_id"}))]);
        let context = vec![ContextEntry::new(
            "create_project",
            Some("Creates a project".to_string()),
            json!({"id": "proj_123"}),
        )];
        let prompt = build_prompt(&EnhanceRequest {
            server_url: "https://example.test/mcp",
            tools: &tools,
            fallback: &fallback,
            context: &context,
        });
        assert!(prompt.contains("create_project"));
        assert!(prompt.contains("proj_123"));
        assert!(prompt.contains("get_project"));
        assert!(prompt.contains("project_id"));
    }
}
