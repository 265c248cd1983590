//! Typed stream-json messages emitted by `claude --output-format stream-json`.
//!
//! Only the fields the orchestrator reads are modelled; everything else is
//! ignored by serde. Fields default where the CLI has been seen to omit them,
//! so older and newer CLI versions both parse.

use serde::{Deserialize, Serialize};

// ─── Outer Message enum ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    Result(ResultMessage),
}

impl Message {
    /// Parse one transcript line. Unknown `type` values and non-message JSON
    /// return `None`.
    pub fn from_value(value: &serde_json::Value) -> Option<Message> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn session_id(&self) -> Option<&str> {
        let id = match self {
            Message::System(m) => &m.session_id,
            Message::Assistant(m) => &m.session_id,
            Message::User(m) => &m.session_id,
            Message::Result(m) => &m.session_id,
        };
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }

    pub fn as_result(&self) -> Option<&ResultMessage> {
        if let Message::Result(r) = self {
            Some(r)
        } else {
            None
        }
    }
}

// ─── System messages ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub session_id: String,
    #[serde(flatten)]
    pub payload: SystemPayload,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum SystemPayload {
    Init(SystemInit),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemInit {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, alias = "permissionMode")]
    pub permission_mode: Option<String>,
}

// ─── Assistant / user messages ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    pub message: AssistantContent,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantContent {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserMessage {
    #[serde(default)]
    pub message: serde_json::Value,
    #[serde(default)]
    pub session_id: String,
}

// ─── Result messages ──────────────────────────────────────────────────────

/// Terminal message of a stream-json transcript.
///
/// `subtype` is `success` or one of the `error_*` variants; error subtypes
/// carry no `result` text.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ResultMessage {
    pub fn is_error(&self) -> bool {
        self.is_error || (!self.subtype.is_empty() && self.subtype != "success")
    }

    pub fn result_text(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// Human-readable reason for an error result.
    pub fn error_message(&self) -> String {
        if !self.errors.is_empty() {
            return self.errors.join("; ");
        }
        match self.result_text() {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => format!("agent finished with subtype '{}'", self.subtype),
        }
    }
}
