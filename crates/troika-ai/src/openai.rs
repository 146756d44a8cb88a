//! OpenAI-compatible assistant vendor.
//!
//! Speaks the chat-completions wire format with SSE streaming. Works with
//! the public endpoint and with any compatible gateway via a base-URL
//! override.

use async_stream::try_stream;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{AiError, AiResult};
use crate::types::{Message, MessageContent, MessageRole, StreamEvent, ToolDefinition};
use crate::vendor::{AssistantVendor, EventStream};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible vendor client.
pub struct OpenAiVendor {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: usize,
}

impl OpenAiVendor {
    /// Vendor against the public endpoint.
    #[must_use]
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 2048,
        }
    }

    /// Override the endpoint (compatible gateways, test servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Override the completion budget.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(
        &self,
        system: &str,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> Value {
        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for msg in history {
            messages.push(convert_message(msg));
        }

        let mut request = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "stream": true,
        });

        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
            request["tools"] = Value::Array(wire_tools);
        }

        request
    }
}

fn convert_message(msg: &Message) -> Value {
    let role = match msg.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };

    match &msg.content {
        MessageContent::Text(text) => {
            serde_json::json!({"role": role, "content": text})
        },
        MessageContent::ToolCalls(calls) => {
            let wire_calls: Vec<Value> = calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": serde_json::to_string(&c.arguments)
                                .unwrap_or_default(),
                        }
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": wire_calls,
            })
        },
        MessageContent::ToolResult(result) => {
            serde_json::json!({
                "role": "tool",
                "tool_call_id": result.call_id,
                "content": result.content,
            })
        },
    }
}

#[async_trait]
impl AssistantVendor for OpenAiVendor {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn stream_run(
        &self,
        system: &str,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> AiResult<EventStream> {
        let body = self.build_request(system, history, tools);

        debug!(model = %self.model, "starting assistant run");

        let mut auth_value =
            reqwest::header::HeaderValue::try_from(format!("Bearer {}", self.api_key))
                .map_err(|e| AiError::RequestFailed(format!("bad api key characters: {e}")))?;
        auth_value.set_sensitive(true);

        let response = self
            .client
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .header("Authorization", auth_value)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AiError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "assistant endpoint error");
            if status.is_server_error() {
                return Err(AiError::Streaming(format!("HTTP {status}")));
            }
            return Err(AiError::RequestFailed(format!("HTTP {status}: {body}")));
        }

        let stream = try_stream! {
            use futures::StreamExt as _;

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut open_call: Option<String> = None;

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| AiError::Streaming(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(boundary) = buffer.find("\n\n") {
                    let event_text = buffer[..boundary].to_string();
                    buffer = buffer.split_off(boundary.saturating_add(2));

                    for line in event_text.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data.trim() == "[DONE]" {
                            if let Some(id) = open_call.take() {
                                yield StreamEvent::ToolCallEnd { id };
                            }
                            yield StreamEvent::Done;
                            return;
                        }
                        let Ok(event) = serde_json::from_str::<WireStreamEvent>(data) else {
                            continue;
                        };
                        let Some(choice) = event.choices.first() else {
                            continue;
                        };

                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty() {
                                yield StreamEvent::TextDelta(content.clone());
                            }
                        }

                        if let Some(calls) = &choice.delta.tool_calls {
                            for call in calls {
                                let Some(function) = &call.function else {
                                    continue;
                                };
                                if call.id.is_some() || open_call.is_none() {
                                    if let Some(previous) = open_call.take() {
                                        yield StreamEvent::ToolCallEnd { id: previous };
                                    }
                                    let id = call.id.clone().unwrap_or_else(|| {
                                        format!("call_{}", call.index)
                                    });
                                    yield StreamEvent::ToolCallStart {
                                        id: id.clone(),
                                        name: function.name.clone().unwrap_or_default(),
                                    };
                                    open_call = Some(id);
                                }
                                if let (Some(args), Some(id)) =
                                    (&function.arguments, open_call.as_ref())
                                {
                                    yield StreamEvent::ToolCallDelta {
                                        id: id.clone(),
                                        args_delta: args.clone(),
                                    };
                                }
                            }
                        }

                        if choice.finish_reason.is_some() {
                            if let Some(id) = open_call.take() {
                                yield StreamEvent::ToolCallEnd { id };
                            }
                            yield StreamEvent::Done;
                            return;
                        }
                    }
                }
            }

            if let Some(id) = open_call.take() {
                yield StreamEvent::ToolCallEnd { id };
            }
            yield StreamEvent::Done;
        };

        Ok(Box::pin(stream))
    }
}

impl std::fmt::Debug for OpenAiVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiVendor")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("has_api_key", &!self.api_key.is_empty())
            .finish_non_exhaustive()
    }
}

// Wire types for the SSE payloads.

#[derive(Debug, Deserialize)]
struct WireStreamEvent {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    index: usize,
    id: Option<String>,
    function: Option<WireFunction>,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCall, ToolCallResult};

    #[test]
    fn request_includes_system_and_history() {
        let vendor = OpenAiVendor::new("key", "support-model");
        let history = vec![Message::user("hello")];
        let request = vendor.build_request("be helpful", &history, &[]);

        let messages = request["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hello");
        assert_eq!(request["stream"], true);
    }

    #[test]
    fn request_carries_tools() {
        let vendor = OpenAiVendor::new("key", "m");
        let tools = vec![ToolDefinition {
            name: "get_active_promotions".into(),
            description: "List active promotions".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }];
        let request = vendor.build_request("", &[], &tools);
        assert_eq!(
            request["tools"][0]["function"]["name"],
            "get_active_promotions"
        );
    }

    #[test]
    fn tool_call_message_converts_to_wire_form() {
        let msg = Message::assistant_tool_calls(vec![ToolCall {
            id: "call_9".into(),
            name: "lookup_partner".into(),
            arguments: serde_json::json!({"user_id": 5}),
        }]);
        let wire = convert_message(&msg);
        assert_eq!(wire["tool_calls"][0]["id"], "call_9");
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            r#"{"user_id":5}"#
        );
    }

    #[test]
    fn tool_result_message_converts_to_wire_form() {
        let msg = Message::tool_result(ToolCallResult::success("call_9", "[]"));
        let wire = convert_message(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_9");
    }

    #[test]
    fn wire_event_parses() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let event: WireStreamEvent = serde_json::from_str(data).unwrap();
        assert_eq!(event.choices[0].delta.content.as_deref(), Some("Hel"));
    }
}
