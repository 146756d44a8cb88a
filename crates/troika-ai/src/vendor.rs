//! The assistant-vendor capability.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::AiResult;
use crate::types::{Message, StreamEvent, ToolDefinition};

/// Boxed stream of run events.
pub type EventStream = Pin<Box<dyn Stream<Item = AiResult<StreamEvent>> + Send>>;

/// One LLM vendor.
///
/// A "run" is one streamed completion over the session history. The
/// session manager drives the agentic loop (run, dispatch tools, run
/// again) above this trait.
#[async_trait]
pub trait AssistantVendor: Send + Sync {
    /// Vendor name for logs.
    fn name(&self) -> &str;

    /// Start a streamed run over the given history.
    async fn stream_run(
        &self,
        system: &str,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> AiResult<EventStream>;

    /// Best-effort stop of the current run; the default does nothing.
    async fn stop(&self) {}
}
