//! Parsing of the agent's line-delimited JSON transcript.
//!
//! The last well-formed JSON object line is authoritative. Everything else
//! (blank lines, diagnostics printed to stdout, truncated lines) is skipped.

use crate::types::{Message, ResultMessage};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::OnceLock;

/// Lines kept for the raw tail of a malformed transcript.
const RAW_TAIL_LINES: usize = 20;
const RAW_TAIL_CHARS: usize = 4_000;
const EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedOutput {
    /// The final JSON object of the transcript.
    pub result: Value,
    pub summary: Value,
    pub session_id: Option<String>,
    /// Non-blank lines seen.
    pub line_count: usize,
}

impl ParsedOutput {
    /// The result as a typed stream-json `result` message, if it is one.
    pub fn result_message(&self) -> Option<ResultMessage> {
        Message::from_value(&self.result).and_then(|m| m.as_result().cloned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptParse {
    Success(ParsedOutput),
    Malformed { raw_tail: String },
}

pub fn parse_lines<I, S>(lines: I) -> TranscriptParse
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut last: Option<Value> = None;
    let mut session_id: Option<String> = None;
    let mut tail: VecDeque<String> = VecDeque::with_capacity(RAW_TAIL_LINES);
    let mut line_count = 0;

    for line in lines {
        let trimmed = line.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        line_count += 1;
        if tail.len() == RAW_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(trimmed.to_string());

        let value = match serde_json::from_str::<Value>(trimmed) {
            Ok(value @ Value::Object(_)) => value,
            _ => {
                tracing::trace!(line = trimmed, "skipping non-object transcript line");
                continue;
            }
        };
        if let Some(id) = Message::from_value(&value).as_ref().and_then(Message::session_id) {
            session_id = Some(id.to_string());
        }
        last = Some(value);
    }

    let Some(result) = last else {
        return TranscriptParse::Malformed {
            raw_tail: cap_tail(tail),
        };
    };
    let summary = extract_summary(&result);
    TranscriptParse::Success(ParsedOutput {
        result,
        summary,
        session_id,
        line_count,
    })
}

fn cap_tail(tail: VecDeque<String>) -> String {
    let joined = Vec::from(tail).join("\n");
    let count = joined.chars().count();
    if count <= RAW_TAIL_CHARS {
        return joined;
    }
    joined.chars().skip(count - RAW_TAIL_CHARS).collect()
}

// ─── Summary extraction ───────────────────────────────────────────────────

/// Summary object for a final transcript object.
///
/// For a stream-json `result` message the result text is searched for an
/// embedded JSON object; failing that, a summary is built from the typed
/// fields. Other objects contribute an excerpt of their `result` field.
pub fn extract_summary(result: &Value) -> Value {
    if let Some(Message::Result(msg)) = Message::from_value(result) {
        if let Some(embedded) = msg.result_text().and_then(embedded_json) {
            return embedded;
        }
        let mut summary = json!({
            "is_error": msg.is_error(),
            "num_turns": msg.num_turns,
            "total_cost_usd": msg.total_cost_usd,
        });
        if !msg.session_id.is_empty() {
            summary["session_id"] = json!(msg.session_id);
        }
        if let Some(text) = msg.result_text() {
            summary["excerpt"] = json!(excerpt(text));
        }
        return summary;
    }

    match result.get("result") {
        Some(Value::String(text)) => json!({ "excerpt": excerpt(text) }),
        Some(other) => json!({ "excerpt": excerpt(&other.to_string()) }),
        None => json!({}),
    }
}

static FENCED_JSON_RE: OnceLock<Regex> = OnceLock::new();

fn fenced_json_re() -> &'static Regex {
    FENCED_JSON_RE.get_or_init(|| Regex::new(r"(?s)```json\s*\n(.*?)```").unwrap())
}

/// A JSON object embedded in free text: the last fenced ```json block that
/// parses, else the outermost `{ ... }` span.
fn embedded_json(text: &str) -> Option<Value> {
    let fenced = fenced_json_re()
        .captures_iter(text)
        .filter_map(|c| serde_json::from_str::<Value>(c[1].trim()).ok())
        .filter(Value::is_object)
        .last();
    if fenced.is_some() {
        return fenced;
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    out.push_str("...");
    out
}
