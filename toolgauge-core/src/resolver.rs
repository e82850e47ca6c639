//! Cross-tool dependency resolution.
//!
//! Tool schemas rarely cross-reference each other, so an identifier minted by
//! one tool's output has to be matched to another tool's input by name
//! heuristics. The heuristics are inherently best-effort; everything lives
//! behind [`resolve`] so they can be swapped or tested apart from the
//! orchestrator. Identifier detection is a bare `*_id`/`*Id` suffix match
//! with no negative list, so unrelated fields ending in "Id" can misfire.

use std::collections::BTreeSet;

use rmcp::model::Tool;
use serde_json::Value as JsonValue;

use crate::context::ContextEntry;
use crate::synthesis::split_words;
use crate::JsonObject;

const VERB_PREFIXES: [&str; 6] = ["create", "list", "get", "update", "delete", "upsert"];

/// Canonical example UUID emitted by the synthesizer; treated as a
/// generation artifact during placeholder detection.
const EXAMPLE_UUID: &str = "123e4567-e89b-12d3-a456-426614174000";

/// A value resolved from the execution context.
#[derive(Clone, Debug)]
pub struct ResolvedValue {
    pub value: JsonValue,
    /// Tool whose output supplied the value.
    pub source_tool: String,
    /// Match tier, 0 strongest.
    pub priority: u8,
}

/// Resolves one field against the execution context, returning the
/// highest-priority match found across every entry.
pub fn resolve(
    field: &str,
    schema: &JsonObject,
    entries: &[ContextEntry],
) -> Option<ResolvedValue> {
    if !resolvable_type(schema) {
        return None;
    }
    let entity = identifier_entity(field);
    let mut best: Option<ResolvedValue> = None;
    for entry in entries {
        let Some(candidate) = match_entry(field, entity.as_deref(), entry) else {
            continue;
        };
        let better = best
            .as_ref()
            .map(|best| candidate.priority < best.priority)
            .unwrap_or(true);
        if better {
            let is_top = candidate.priority == 0;
            best = Some(candidate);
            if is_top {
                break;
            }
        }
    }
    best
}

fn match_entry(field: &str, entity: Option<&str>, entry: &ContextEntry) -> Option<ResolvedValue> {
    let tool_core = stripped_tool_name(&entry.tool_name);

    // Priority 0: bare scalar output of an entity-matched tool.
    if let Some(entity) = entity {
        let scalar = matches!(
            entry.raw_result,
            JsonValue::String(_) | JsonValue::Number(_)
        );
        if scalar && corresponds(entity, &tool_core) {
            return Some(resolved(entry, entry.raw_result.clone(), 0));
        }
    }

    let object = entry.raw_result.as_object();

    // Priority 1: exact property name.
    if let Some(value) = object.and_then(|object| object.get(field)) {
        return Some(resolved(entry, value.clone(), 1));
    }

    // Priority 2: camelCase/snake_case alternate spelling.
    if let Some(object) = object {
        for alternate in alternate_spellings(field) {
            if let Some(value) = object.get(&alternate) {
                return Some(resolved(entry, value.clone(), 2));
            }
        }
    }

    if let Some(entity) = entity {
        if corresponds(entity, &tool_core) {
            let id_value = object.and_then(|object| object.get("id").or_else(|| object.get("ID")));
            if let Some(value) = id_value {
                // Priority 3 with schema confirmation, 4 without.
                let priority = if entry.exposes_id() { 3 } else { 4 };
                return Some(resolved(entry, value.clone(), priority));
            }

            // Priority 5: paginated list envelope.
            if let Some(first_id) = object
                .and_then(|object| object.get("data"))
                .and_then(JsonValue::as_array)
                .and_then(|data| data.first())
                .and_then(JsonValue::as_object)
                .and_then(|first| first.get("id"))
            {
                return Some(resolved(entry, first_id.clone(), 5));
            }
        }
    }

    None
}

fn resolved(entry: &ContextEntry, value: JsonValue, priority: u8) -> ResolvedValue {
    ResolvedValue {
        value,
        source_tool: entry.tool_name.clone(),
        priority,
    }
}

/// Outcome of applying resolution across one argument object.
#[derive(Clone, Debug, Default)]
pub struct ResolutionOutcome {
    pub arguments: JsonObject,
    /// Fields whose values were replaced by a context match.
    pub touched: BTreeSet<String>,
}

/// Re-derives placeholder-valued arguments from the execution context.
///
/// Only values that still look like generation artifacts are replaced;
/// enhanced values the completion service produced are left alone.
pub fn resolve_arguments(
    arguments: &JsonObject,
    input_schema: &JsonObject,
    entries: &[ContextEntry],
) -> ResolutionOutcome {
    let mut outcome = ResolutionOutcome {
        arguments: arguments.clone(),
        touched: BTreeSet::new(),
    };
    let Some(properties) = input_schema.get("properties").and_then(JsonValue::as_object) else {
        return outcome;
    };
    for (field, property) in properties {
        let Some(property) = property.as_object() else {
            continue;
        };
        let placeholder = outcome
            .arguments
            .get(field)
            .map(looks_like_placeholder)
            .unwrap_or(false);
        if !placeholder {
            continue;
        }
        if let Some(resolution) = resolve(field, property, entries) {
            log::debug!(
                "resolved '{field}' from '{}' output (tier {})",
                resolution.source_tool,
                resolution.priority
            );
            outcome.arguments.insert(field.clone(), resolution.value);
            outcome.touched.insert(field.clone());
        }
    }
    outcome
}

/// Returns true for values that look like generation artifacts rather than
/// real data: `test_*`/`sample_*` strings, the canonical example UUID, or
/// empty strings.
pub fn looks_like_placeholder(value: &JsonValue) -> bool {
    match value {
        JsonValue::String(text) => {
            text.is_empty()
                || text.starts_with("test_")
                || text.starts_with("sample_")
                || text == EXAMPLE_UUID
        }
        _ => false,
    }
}

/// Schema-required identifier fields still holding placeholders, reported
/// only once the store has something to resolve against.
pub fn unresolved_dependencies(
    arguments: &JsonObject,
    input_schema: &JsonObject,
    entries: &[ContextEntry],
) -> Vec<String> {
    if entries.is_empty() {
        return Vec::new();
    }
    required_fields(input_schema)
        .filter(|field| identifier_entity(field).is_some())
        .filter(|field| {
            arguments
                .get(*field)
                .map(looks_like_placeholder)
                .unwrap_or(false)
        })
        .map(str::to_string)
        .collect()
}

/// Schema-required fields left on placeholders that no resolution pass
/// touched, identifier-shaped or not.
pub fn placeholder_fields(
    arguments: &JsonObject,
    input_schema: &JsonObject,
    touched: &BTreeSet<String>,
) -> Vec<String> {
    required_fields(input_schema)
        .filter(|field| !touched.contains(*field))
        .filter(|field| {
            arguments
                .get(*field)
                .map(looks_like_placeholder)
                .unwrap_or(false)
        })
        .map(str::to_string)
        .collect()
}

/// Discovered tools whose outputs would satisfy an identifier field, with
/// `create`-verb tools listed first.
pub fn prerequisite_tools(field: &str, tools: &[Tool]) -> Vec<String> {
    let Some(entity) = identifier_entity(field) else {
        return Vec::new();
    };
    let mut creates = Vec::new();
    let mut others = Vec::new();
    for tool in tools {
        let name = tool.name.to_string();
        if !corresponds(&entity, &stripped_tool_name(&name)) {
            continue;
        }
        if split_words(&name).first().map(String::as_str) == Some("create") {
            creates.push(name);
        } else {
            others.push(name);
        }
    }
    creates.extend(others);
    creates
}

/// Extracts the entity prefix of an identifier-shaped field name
/// (`project_id`, `projectId`, `projectid` → `project`).
fn identifier_entity(field: &str) -> Option<String> {
    let words = split_words(field);
    let last = words.last()?;
    if last == "id" {
        let entity = words[..words.len() - 1].join("");
        return (!entity.is_empty()).then_some(entity);
    }
    if let Some(prefix) = last.strip_suffix("id") {
        if !prefix.is_empty() {
            let mut entity = words[..words.len() - 1].join("");
            entity.push_str(prefix);
            return Some(entity);
        }
    }
    None
}

fn stripped_tool_name(name: &str) -> String {
    let words = split_words(name);
    match words.first() {
        Some(first) if VERB_PREFIXES.contains(&first.as_str()) => words[1..].join(""),
        _ => words.join(""),
    }
}

fn corresponds(entity: &str, tool_core: &str) -> bool {
    !entity.is_empty()
        && !tool_core.is_empty()
        && (tool_core.contains(entity) || entity.contains(tool_core))
}

fn resolvable_type(schema: &JsonObject) -> bool {
    match schema.get("type").and_then(JsonValue::as_str) {
        Some("array") | Some("object") | Some("boolean") => false,
        _ => true,
    }
}

fn alternate_spellings(field: &str) -> Vec<String> {
    let words = split_words(field);
    if words.is_empty() {
        return Vec::new();
    }
    let snake = words.join("_");
    let mut camel = words[0].clone();
    for word in &words[1..] {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            camel.extend(first.to_uppercase());
            camel.push_str(chars.as_str());
        }
    }
    [snake, camel]
        .into_iter()
        .filter(|spelling| spelling != field)
        .collect()
}

fn required_fields(schema: &JsonObject) -> impl Iterator<Item = &str> {
    schema
        .get("required")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(JsonValue::as_str)
}
