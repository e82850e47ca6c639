//! Execution context: real outputs of already-executed tools, made
//! discoverable as inputs to not-yet-executed ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use rmcp::model::CallToolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

/// Accumulated record of one successful execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextEntry {
    /// The tool that produced the result.
    pub tool_name: String,
    /// Parsed result payload.
    pub raw_result: JsonValue,
    /// Tool description, carried for prompt rendering.
    pub description: Option<String>,
    /// Top-level field names the result exposes.
    pub output_fields: Vec<String>,
    /// Schema inferred from the actual payload. Preferred over declared
    /// output schemas, which are frequently stale relative to real payloads.
    pub inferred_schema: JsonValue,
}

impl ContextEntry {
    /// Builds an entry from a parsed result value.
    pub fn new(
        tool_name: impl Into<String>,
        description: Option<String>,
        raw_result: JsonValue,
    ) -> Self {
        let output_fields = match &raw_result {
            JsonValue::Object(object) => object.keys().cloned().collect(),
            _ => Vec::new(),
        };
        let inferred_schema = infer_schema(&raw_result);
        Self {
            tool_name: tool_name.into(),
            raw_result,
            description,
            output_fields,
            inferred_schema,
        }
    }

    /// Builds an entry from a successful tool call result.
    ///
    /// Structured content wins; otherwise the first text block is parsed as
    /// JSON when possible and kept verbatim when not.
    pub fn from_call_result(
        tool_name: impl Into<String>,
        description: Option<String>,
        result: &CallToolResult,
    ) -> Self {
        Self::new(tool_name, description, result_payload(result))
    }

    /// Returns true when the inferred schema exposes an `id`/`ID` property.
    pub fn exposes_id(&self) -> bool {
        self.inferred_schema
            .get("properties")
            .and_then(JsonValue::as_object)
            .is_some_and(|properties| {
                properties.contains_key("id") || properties.contains_key("ID")
            })
    }
}

/// Extracts the most useful payload from a call result.
pub fn result_payload(result: &CallToolResult) -> JsonValue {
    if let Some(structured) = &result.structured_content {
        return structured.clone();
    }
    for content in result.content.iter() {
        if let Some(text) = content.as_text() {
            return match serde_json::from_str(&text.text) {
                Ok(parsed) => parsed,
                Err(_) => JsonValue::String(text.text.clone()),
            };
        }
    }
    JsonValue::Null
}

/// Derives a structural schema from an actual value: objects become property
/// maps of recursively inferred types, arrays take their first element's
/// type, everything else is a leaf tag.
pub fn infer_schema(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(object) => {
            let properties: serde_json::Map<String, JsonValue> = object
                .iter()
                .map(|(key, value)| (key.clone(), infer_schema(value)))
                .collect();
            serde_json::json!({"type": "object", "properties": properties})
        }
        JsonValue::Array(items) => match items.first() {
            Some(first) => serde_json::json!({"type": "array", "items": infer_schema(first)}),
            None => serde_json::json!({"type": "array"}),
        },
        JsonValue::String(_) => serde_json::json!({"type": "string"}),
        JsonValue::Number(_) => serde_json::json!({"type": "number"}),
        JsonValue::Bool(_) => serde_json::json!({"type": "boolean"}),
        JsonValue::Null => serde_json::json!({"type": "null"}),
    }
}

/// Concurrent store of context entries, keyed by tool name.
///
/// Executions fan out, so writers race; the most recent write per tool wins,
/// which is acceptable because tools are rarely re-run within one batch.
#[derive(Clone, Default)]
pub struct ContextStore {
    entries: Arc<RwLock<BTreeMap<String, ContextEntry>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry, replacing any previous entry for the same tool.
    pub async fn record(&self, entry: ContextEntry) {
        let mut entries = self.entries.write().await;
        entries.insert(entry.tool_name.clone(), entry);
    }

    /// Returns a point-in-time copy of every entry.
    pub async fn snapshot(&self) -> Vec<ContextEntry> {
        let entries = self.entries.read().await;
        entries.values().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;
    use serde_json::json;

    #[test]
    fn entry_captures_output_fields_and_schema() {
        let entry = ContextEntry::new(
            "create_project",
            None,
            json!({"id": "proj_123", "name": "demo"}),
        );
        assert_eq!(entry.output_fields, vec!["id", "name"]);
        assert_eq!(entry.inferred_schema["type"], "object");
        assert_eq!(
            entry.inferred_schema["properties"]["id"]["type"],
            "string"
        );
        assert!(entry.exposes_id());
    }

    #[test]
    fn scalar_results_have_no_output_fields() {
        let entry = ContextEntry::new("create_token", None, json!("tok_1"));
        assert!(entry.output_fields.is_empty());
        assert!(!entry.exposes_id());
    }

    #[test]
    fn infer_schema_descends_into_arrays() {
        let schema = infer_schema(&json!({"data": [{"id": 1}]}));
        assert_eq!(
            schema["properties"]["data"]["items"]["properties"]["id"]["type"],
            "number"
        );
    }

    #[test]
    fn structured_content_wins_over_text() {
        let mut result = CallToolResult::success(vec![Content::text("{\"id\": \"text\"}")]);
        result.structured_content = Some(json!({"id": "structured"}));
        assert_eq!(result_payload(&result), json!({"id": "structured"}));
    }

    #[test]
    fn text_content_is_parsed_as_json_when_possible() {
        let result = CallToolResult::success(vec![Content::text("{\"id\": \"proj_1\"}")]);
        assert_eq!(result_payload(&result), json!({"id": "proj_1"}));
    }

    #[test]
    fn non_json_text_is_kept_verbatim() {
        let result = CallToolResult::success(vec![Content::text("done")]);
        assert_eq!(result_payload(&result), json!("done"));
    }

    #[tokio::test]
    async fn later_entries_replace_earlier_ones() {
        let store = ContextStore::new();
        store
            .record(ContextEntry::new("create_project", None, json!({"id": "a"})))
            .await;
        store
            .record(ContextEntry::new("create_project", None, json!({"id": "b"})))
            .await;
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].raw_result, json!({"id": "b"}));
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_distinct_tools() {
        let store = ContextStore::new();
        let writers: Vec<_> = (0..8)
            .map(|index| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .record(ContextEntry::new(
                            format!("tool_{index}"),
                            None,
                            json!({"id": index}),
                        ))
                        .await;
                })
            })
            .collect();
        for writer in writers {
            writer.await.expect("writer");
        }
        assert_eq!(store.snapshot().await.len(), 8);
    }
}
