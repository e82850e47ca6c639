//! Deterministic, schema-driven argument synthesis.
//!
//! The synthesizer produces one argument object per tool input schema without
//! consulting any external service, and never fails: whatever the schema looks
//! like, required fields come back populated with type-appropriate values.
//! Extra fields are never invented, which is equivalent to treating every
//! schema as `additionalProperties: false` during generation.

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::{Number, Value as JsonValue};
use url::Url;

use crate::JsonObject;

const EXAMPLE_EMAIL: &str = "user@example.com";
const EXAMPLE_URL: &str = "https://example.com/resource";
const EXAMPLE_UUID: &str = "123e4567-e89b-12d3-a456-426614174000";
const EXAMPLE_PATH: &str = "/tmp/example.txt";
const EXAMPLE_DATE_TIME: &str = "2024-01-15T10:30:00Z";
const EXAMPLE_DATE: &str = "2024-01-15";

/// Fields that carry pagination state with no meaningful default; omitted
/// from synthesized arguments unless the schema marks them required.
const CURSOR_LIKE: [&str; 5] = ["cursor", "nextcursor", "page", "offset", "jqfilter"];

/// Numeric vocabulary treated as pagination/limit controls.
const LIMIT_LIKE: [&str; 8] = [
    "limit", "count", "size", "max", "top", "take", "perpage", "pagesize",
];
const ZERO_BASED: [&str; 2] = ["offset", "skip"];

const MAX_DEPTH: usize = 6;

/// Configuration for the fallback synthesizer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SynthesizerConfig {
    /// Seed that selects among canonical placeholder spellings; the same seed
    /// always yields the same output for the same schema.
    pub seed: u64,
}

/// Schema-driven argument synthesizer.
pub struct Synthesizer {
    config: SynthesizerConfig,
    email_pattern: Regex,
    uuid_pattern: Regex,
    date_time_pattern: Regex,
}

impl Synthesizer {
    /// Creates a synthesizer; compiled patterns live on the instance rather
    /// than in module state.
    pub fn new(config: SynthesizerConfig) -> Self {
        Self {
            config,
            email_pattern: Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern"),
            uuid_pattern: Regex::new(
                r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
            )
            .expect("uuid pattern"),
            date_time_pattern: Regex::new(
                r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})$",
            )
            .expect("date-time pattern"),
        }
    }

    /// Synthesizes one argument object for a tool input schema.
    ///
    /// Generation walks the schema's properties; a repair pass then enforces
    /// formats, bounds, enum membership, and required-field presence. On a
    /// schema the walker cannot interpret, output degrades to placeholders
    /// for the required fields.
    pub fn synthesize(&self, schema: &JsonObject) -> JsonObject {
        match self.try_synthesize(schema) {
            Some(mut output) => {
                self.repair(schema, &mut output);
                self.post_check(schema, &output);
                output
            }
            None => {
                log::debug!("synthesis degraded to minimal required fields");
                self.minimal_required(schema)
            }
        }
    }

    fn try_synthesize(&self, schema: &JsonObject) -> Option<JsonObject> {
        if let Some(kind) = schema.get("type").and_then(JsonValue::as_str) {
            if kind != "object" {
                return None;
            }
        }
        let required = required_names(schema);
        let mut output = JsonObject::new();
        if let Some(JsonValue::Object(properties)) = schema.get("properties") {
            for (name, property) in properties {
                if !required.contains(name.as_str()) && is_cursor_like(name) {
                    continue;
                }
                let value = match property.as_object() {
                    Some(property) => self.value_for(name, property, 0),
                    None => JsonValue::String(self.placeholder_string(name)),
                };
                output.insert(name.clone(), value);
            }
        }
        Some(output)
    }

    fn value_for(&self, name: &str, schema: &JsonObject, depth: usize) -> JsonValue {
        if depth > MAX_DEPTH {
            return JsonValue::String(self.placeholder_string(name));
        }
        if let Some(value) = schema.get("const") {
            return value.clone();
        }
        if let Some(JsonValue::Array(members)) = schema.get("enum") {
            if let Some(first) = members.first() {
                return first.clone();
            }
        }
        match declared_type(schema) {
            Some("string") => JsonValue::String(self.string_value(name, schema)),
            Some(kind @ ("integer" | "number")) => self.numeric_value(name, schema, kind),
            Some("boolean") => JsonValue::Bool(true),
            Some("array") => self.array_value(name, schema, depth),
            Some("object") => JsonValue::Object(self.object_value(schema, depth)),
            Some("null") => JsonValue::Null,
            _ => {
                // Untyped schemas: fall back on structure, then to a string.
                if schema.get("properties").is_some() {
                    JsonValue::Object(self.object_value(schema, depth))
                } else if schema.get("items").is_some() {
                    self.array_value(name, schema, depth)
                } else {
                    JsonValue::String(self.string_value(name, schema))
                }
            }
        }
    }

    fn string_value(&self, name: &str, schema: &JsonObject) -> String {
        if let Some(format) = schema.get("format").and_then(JsonValue::as_str) {
            if let Some(example) = format_example(format) {
                return example.to_string();
            }
        }
        if let Some(example) = name_hint_example(name) {
            return example.to_string();
        }
        self.placeholder_string(name)
    }

    fn numeric_value(&self, name: &str, schema: &JsonObject, kind: &str) -> JsonValue {
        let minimum = schema.get("minimum").and_then(JsonValue::as_f64);
        let maximum = schema.get("maximum").and_then(JsonValue::as_f64);
        let base = match pagination_role(name) {
            Some(PaginationRole::ZeroBased) => 0.0,
            Some(PaginationRole::LimitLike) => clamp(10.0, Some(1.0), Some(100.0)),
            Some(PaginationRole::OneBased) => 1.0,
            None => 42.0,
        };
        let value = clamp(base, minimum, maximum);
        number_value(value, kind)
    }

    fn array_value(&self, name: &str, schema: &JsonObject, depth: usize) -> JsonValue {
        let count = schema
            .get("minItems")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0)
            .max(1) as usize;
        let element = match schema.get("items").and_then(JsonValue::as_object) {
            Some(items) => self.value_for(name, items, depth + 1),
            None => JsonValue::String(self.placeholder_string(name)),
        };
        JsonValue::Array(vec![element; count])
    }

    fn object_value(&self, schema: &JsonObject, depth: usize) -> JsonObject {
        let properties = schema.get("properties").and_then(JsonValue::as_object);
        let mut output = JsonObject::new();
        for name in required_names(schema) {
            let value = match properties
                .and_then(|properties| properties.get(name))
                .and_then(JsonValue::as_object)
            {
                Some(property) => self.value_for(name, property, depth + 1),
                None => JsonValue::String(self.placeholder_string(name)),
            };
            output.insert(name.to_string(), value);
        }
        output
    }

    /// Enforces formats, bounds, enum membership, and required presence on an
    /// already-generated object.
    fn repair(&self, schema: &JsonObject, output: &mut JsonObject) {
        let properties = schema.get("properties").and_then(JsonValue::as_object);
        if let Some(properties) = properties {
            for (name, property) in properties {
                let Some(property) = property.as_object() else {
                    continue;
                };
                let Some(value) = output.get_mut(name) else {
                    continue;
                };
                self.repair_value(property, value);
            }
        }
        for name in required_names(schema) {
            if !output.contains_key(name) {
                let property = properties
                    .and_then(|properties| properties.get(name))
                    .and_then(JsonValue::as_object);
                output.insert(name.to_string(), self.last_resort(name, property));
            }
        }
    }

    fn repair_value(&self, schema: &JsonObject, value: &mut JsonValue) {
        if let Some(JsonValue::Array(members)) = schema.get("enum") {
            if !members.contains(value) {
                if let Some(first) = members.first() {
                    *value = first.clone();
                }
            }
            return;
        }
        match value {
            JsonValue::String(text) => {
                if let Some(format) = schema.get("format").and_then(JsonValue::as_str) {
                    if !self.matches_format(format, text) {
                        if let Some(example) = format_example(format) {
                            *text = example.to_string();
                        }
                    }
                }
                if let Some(min) = schema.get("minLength").and_then(JsonValue::as_u64) {
                    while text.len() < min as usize {
                        text.push('x');
                    }
                }
                if let Some(max) = schema.get("maxLength").and_then(JsonValue::as_u64) {
                    text.truncate(max as usize);
                }
            }
            JsonValue::Number(number) => {
                let minimum = schema.get("minimum").and_then(JsonValue::as_f64);
                let maximum = schema.get("maximum").and_then(JsonValue::as_f64);
                if let Some(current) = number.as_f64() {
                    let clamped = clamp(current, minimum, maximum);
                    if clamped != current {
                        let kind = declared_type(schema).unwrap_or("number");
                        if let JsonValue::Number(clamped) = number_value(clamped, kind) {
                            *number = clamped;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn matches_format(&self, format: &str, text: &str) -> bool {
        match format {
            "email" => self.email_pattern.is_match(text),
            "uuid" => self.uuid_pattern.is_match(text),
            "date-time" => self.date_time_pattern.is_match(text),
            "uri" | "url" => Url::parse(text).is_ok(),
            _ => true,
        }
    }

    fn last_resort(&self, name: &str, schema: Option<&JsonObject>) -> JsonValue {
        match schema.and_then(declared_type_of) {
            Some("integer") | Some("number") => JsonValue::Number(Number::from(0)),
            Some("boolean") => JsonValue::Bool(false),
            Some("array") => JsonValue::Array(Vec::new()),
            Some("object") => JsonValue::Object(JsonObject::new()),
            _ => JsonValue::String(self.placeholder_string(name)),
        }
    }

    fn minimal_required(&self, schema: &JsonObject) -> JsonObject {
        let properties = schema.get("properties").and_then(JsonValue::as_object);
        let mut output = JsonObject::new();
        for name in required_names(schema) {
            let property = properties
                .and_then(|properties| properties.get(name))
                .and_then(JsonValue::as_object);
            output.insert(name.to_string(), self.last_resort(name, property));
        }
        output
    }

    /// Advisory check against the source schema with extra fields forbidden;
    /// a mismatch is logged, never surfaced.
    fn post_check(&self, schema: &JsonObject, output: &JsonObject) {
        let mut sanitized = schema.clone();
        sanitized.insert("additionalProperties".to_string(), JsonValue::Bool(false));
        let schema_value = JsonValue::Object(sanitized);
        match jsonschema::draft202012::new(&schema_value) {
            Ok(validator) => {
                let instance = JsonValue::Object(output.clone());
                if let Err(error) = validator.validate(&instance) {
                    log::debug!("synthesized arguments kept despite schema mismatch: {error}");
                }
            }
            Err(error) => log::debug!("input schema did not compile for post-check: {error}"),
        }
    }

    fn placeholder_string(&self, name: &str) -> String {
        const NOUNS: [&str; 6] = ["entry", "item", "record", "note", "task", "draft"];
        let words = split_words(name);
        if words.is_empty() {
            return format!("test_{}", NOUNS[(self.config.seed % NOUNS.len() as u64) as usize]);
        }
        format!("test_{}", words.join("_"))
    }
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new(SynthesizerConfig::default())
    }
}

enum PaginationRole {
    ZeroBased,
    LimitLike,
    OneBased,
}

fn pagination_role(name: &str) -> Option<PaginationRole> {
    let words = split_words(name);
    let joined = words.join("");
    if joined.contains("perpage") || joined.contains("pagesize") {
        return Some(PaginationRole::LimitLike);
    }
    for word in &words {
        if ZERO_BASED.contains(&word.as_str()) {
            return Some(PaginationRole::ZeroBased);
        }
        if LIMIT_LIKE.contains(&word.as_str()) {
            return Some(PaginationRole::LimitLike);
        }
        if word == "page" || word == "min" {
            return Some(PaginationRole::OneBased);
        }
    }
    None
}

fn is_cursor_like(name: &str) -> bool {
    let normalized = split_words(name).join("");
    CURSOR_LIKE.contains(&normalized.as_str())
}

fn format_example(format: &str) -> Option<&'static str> {
    match format {
        "email" => Some(EXAMPLE_EMAIL),
        "uri" | "url" => Some(EXAMPLE_URL),
        "uuid" => Some(EXAMPLE_UUID),
        "date-time" => Some(EXAMPLE_DATE_TIME),
        "date" => Some(EXAMPLE_DATE),
        _ => None,
    }
}

fn name_hint_example(name: &str) -> Option<&'static str> {
    let words = split_words(name);
    for word in &words {
        match word.as_str() {
            "email" => return Some(EXAMPLE_EMAIL),
            "url" | "uri" => return Some(EXAMPLE_URL),
            "uuid" | "guid" => return Some(EXAMPLE_UUID),
            "path" => return Some(EXAMPLE_PATH),
            _ => {}
        }
    }
    None
}

fn declared_type(schema: &JsonObject) -> Option<&str> {
    declared_type_of(schema)
}

fn declared_type_of(schema: &JsonObject) -> Option<&str> {
    match schema.get("type") {
        Some(JsonValue::String(kind)) => Some(kind.as_str()),
        Some(JsonValue::Array(kinds)) => kinds
            .iter()
            .filter_map(JsonValue::as_str)
            .find(|kind| *kind != "null"),
        _ => None,
    }
}

fn required_names(schema: &JsonObject) -> BTreeSet<&str> {
    schema
        .get("required")
        .and_then(JsonValue::as_array)
        .map(|names| names.iter().filter_map(JsonValue::as_str).collect())
        .unwrap_or_default()
}

fn clamp(value: f64, minimum: Option<f64>, maximum: Option<f64>) -> f64 {
    let mut value = value;
    if let Some(minimum) = minimum {
        value = value.max(minimum);
    }
    if let Some(maximum) = maximum {
        value = value.min(maximum);
    }
    value
}

fn number_value(value: f64, kind: &str) -> JsonValue {
    if kind == "integer" {
        JsonValue::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::Number(Number::from(0)))
    }
}

/// Splits a field name into lowercase words at separator and camel boundaries.
pub(crate) fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut previous_upper = false;
    for ch in name.chars() {
        if ch == '_' || ch == '-' || ch == '.' || ch == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            previous_upper = false;
        } else if ch.is_uppercase() {
            if !current.is_empty() && !previous_upper {
                words.push(std::mem::take(&mut current));
            }
            current.extend(ch.to_lowercase());
            previous_upper = true;
        } else {
            current.push(ch);
            previous_upper = false;
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: serde_json::Value) -> JsonObject {
        value.as_object().cloned().expect("schema object")
    }

    fn synthesize(value: serde_json::Value) -> JsonObject {
        Synthesizer::default().synthesize(&schema(value))
    }

    #[test]
    fn required_fields_get_type_matching_values() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "total": {"type": "number"},
                "enabled": {"type": "boolean"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "options": {
                    "type": "object",
                    "properties": {"depth": {"type": "integer"}},
                    "required": ["depth"]
                }
            },
            "required": ["name", "total", "enabled", "tags", "options"]
        }));
        assert!(output["name"].is_string());
        assert!(output["total"].is_number());
        assert!(output["enabled"].is_boolean());
        assert!(output["tags"].is_array());
        assert!(output["options"]["depth"].is_number());
    }

    #[test]
    fn declared_formats_use_canonical_examples() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {
                "contact": {"type": "string", "format": "email"},
                "homepage": {"type": "string", "format": "uri"},
                "token": {"type": "string", "format": "uuid"},
                "created": {"type": "string", "format": "date-time"}
            },
            "required": ["contact", "homepage", "token", "created"]
        }));
        assert_eq!(output["contact"], EXAMPLE_EMAIL);
        assert_eq!(output["homepage"], EXAMPLE_URL);
        assert_eq!(output["token"], EXAMPLE_UUID);
        assert_eq!(output["created"], EXAMPLE_DATE_TIME);
    }

    #[test]
    fn name_hints_apply_without_declared_format() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {
                "user_email": {"type": "string"},
                "callback_url": {"type": "string"},
                "file_path": {"type": "string"}
            },
            "required": ["user_email", "callback_url", "file_path"]
        }));
        assert_eq!(output["user_email"], EXAMPLE_EMAIL);
        assert_eq!(output["callback_url"], EXAMPLE_URL);
        assert_eq!(output["file_path"], EXAMPLE_PATH);
    }

    #[test]
    fn limit_stays_within_pagination_bounds() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {"limit": {"type": "integer"}},
            "required": ["limit"]
        }));
        let limit = output["limit"].as_i64().expect("limit");
        assert!((1..=100).contains(&limit));
    }

    #[test]
    fn limit_respects_declared_maximum() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {"limit": {"type": "integer", "maximum": 5}},
            "required": ["limit"]
        }));
        assert!(output["limit"].as_i64().expect("limit") <= 5);
    }

    #[test]
    fn offset_may_be_zero_when_required() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {"offset": {"type": "integer"}},
            "required": ["offset"]
        }));
        assert_eq!(output["offset"], 0);
    }

    #[test]
    fn optional_cursor_fields_are_omitted() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {
                "cursor": {"type": "string"},
                "nextCursor": {"type": "string"},
                "jq_filter": {"type": "string"},
                "query": {"type": "string"}
            },
            "required": ["query"]
        }));
        assert!(!output.contains_key("cursor"));
        assert!(!output.contains_key("nextCursor"));
        assert!(!output.contains_key("jq_filter"));
        assert!(output.contains_key("query"));
    }

    #[test]
    fn required_cursor_fields_are_kept() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {"cursor": {"type": "string"}},
            "required": ["cursor"]
        }));
        assert!(output.contains_key("cursor"));
    }

    #[test]
    fn enums_pick_the_first_member() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {"mode": {"type": "string", "enum": ["fast", "slow"]}},
            "required": ["mode"]
        }));
        assert_eq!(output["mode"], "fast");
    }

    #[test]
    fn arrays_respect_min_items() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}, "minItems": 3}
            },
            "required": ["tags"]
        }));
        assert_eq!(output["tags"].as_array().expect("tags").len(), 3);
    }

    #[test]
    fn min_length_is_padded_and_max_length_truncated() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "minLength": 12},
                "tag": {"type": "string", "maxLength": 4}
            },
            "required": ["code", "tag"]
        }));
        assert!(output["code"].as_str().expect("code").len() >= 12);
        assert!(output["tag"].as_str().expect("tag").len() <= 4);
    }

    #[test]
    fn required_fields_missing_from_properties_still_appear() {
        let output = synthesize(json!({
            "type": "object",
            "properties": {},
            "required": ["mystery"]
        }));
        assert!(output["mystery"].is_string());
    }

    #[test]
    fn synthesis_is_idempotent() {
        let input = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "limit": {"type": "integer"},
                "mode": {"enum": ["a", "b"]}
            },
            "required": ["name", "limit", "mode"]
        });
        let first = synthesize(input.clone());
        let second = synthesize(input);
        assert_eq!(first, second);
    }

    #[test]
    fn non_object_schema_degrades_without_panicking() {
        let output = synthesize(json!({"type": "string"}));
        assert!(output.is_empty());
    }

    #[test]
    fn untyped_schema_with_properties_is_treated_as_object() {
        let output = synthesize(json!({
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        }));
        assert!(output["query"].is_string());
    }

    #[test]
    fn split_words_handles_camel_and_snake_case() {
        assert_eq!(split_words("pageSize"), vec!["page", "size"]);
        assert_eq!(split_words("per_page"), vec!["per", "page"]);
        assert_eq!(split_words("nextCursor"), vec!["next", "cursor"]);
    }
}
