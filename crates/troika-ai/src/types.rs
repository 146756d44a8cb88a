//! Conversation and streaming types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who produced it.
    pub role: MessageRole,
    /// What it carries.
    pub content: MessageContent,
}

impl Message {
    /// A user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// An assistant text message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// An assistant message carrying tool calls.
    #[must_use]
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::ToolCalls(calls),
        }
    }

    /// A tool result message.
    #[must_use]
    pub fn tool_result(result: ToolCallResult) -> Self {
        Self {
            role: MessageRole::Tool,
            content: MessageContent::ToolResult(result),
        }
    }

    /// Text content, when this is a plain text message.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user.
    User,
    /// The assistant.
    Assistant,
    /// A tool result.
    Tool,
}

/// Message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Tool calls requested by the assistant.
    ToolCalls(Vec<ToolCall>),
    /// A tool's result.
    ToolResult(ToolCallResult),
}

/// One tool call requested by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Vendor-assigned call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments as JSON.
    pub arguments: Value,
}

/// Result handed back for one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The call this answers.
    pub call_id: String,
    /// Result content (JSON or error text).
    pub content: String,
    /// Whether this is an error result.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A successful result.
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// An error result, surfaced to the model for retry.
    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// A tool surfaced to the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable purpose.
    pub description: String,
    /// JSON schema of the arguments.
    pub input_schema: Value,
}

/// One event of a streamed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Partial assistant text.
    TextDelta(String),
    /// The assistant started requesting a tool call.
    ToolCallStart {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
    },
    /// Partial tool-call arguments.
    ToolCallDelta {
        /// Call id.
        id: String,
        /// Argument JSON fragment.
        args_delta: String,
    },
    /// The tool call's arguments are complete.
    ToolCallEnd {
        /// Call id.
        id: String,
    },
    /// The run finished.
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(Message::user("hi").role, MessageRole::User);
        assert_eq!(Message::assistant("yo").role, MessageRole::Assistant);
        assert_eq!(
            Message::tool_result(ToolCallResult::success("1", "{}")).role,
            MessageRole::Tool
        );
    }

    #[test]
    fn text_accessor_only_for_text() {
        assert_eq!(Message::user("hi").text(), Some("hi"));
        assert_eq!(
            Message::assistant_tool_calls(vec![ToolCall {
                id: "1".into(),
                name: "t".into(),
                arguments: serde_json::json!({}),
            }])
            .text(),
            None
        );
    }

    #[test]
    fn tool_result_error_flag() {
        assert!(!ToolCallResult::success("1", "ok").is_error);
        assert!(ToolCallResult::error("1", "nope").is_error);
    }

    #[test]
    fn message_serializes_round_trip() {
        let msg = Message::assistant_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "get_active_promotions".into(),
            arguments: serde_json::json!({"limit": 3}),
        }]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert!(matches!(back.content, MessageContent::ToolCalls(ref c) if c.len() == 1));
    }
}
