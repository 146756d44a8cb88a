//! Troika AI — per-user assistant sessions.
//!
//! The session manager owns one conversation per user and enforces
//! single-flight: a session runs at most one turn at a time, and a new
//! user message cancels the in-flight turn before starting its own. Turn
//! output streams out as typed events; the vendor behind it is an
//! OpenAI-compatible chat endpoint reached over SSE, abstracted behind
//! [`AssistantVendor`] so tests script it.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod escalation;
mod events;
mod history;
mod openai;
mod session;
mod tools;
mod types;
mod vendor;

pub use error::{AiError, AiResult};
pub use escalation::should_escalate;
pub use events::TurnEvent;
pub use history::HistoryWriter;
pub use openai::OpenAiVendor;
pub use session::{SessionConfig, SessionManager};
pub use tools::{
    ActivePromotionsTool, CapabilityError, KnowledgeSearch, KnowledgeSearchTool, KnowledgeSnippet,
    PartnerCard, PartnerLookup, PartnerLookupTool, PromotionSummary, PromotionsLookup, Tool,
    ToolRegistry,
};
pub use types::{
    Message, MessageContent, MessageRole, StreamEvent, ToolCall, ToolCallResult, ToolDefinition,
};
pub use vendor::{AssistantVendor, EventStream};
