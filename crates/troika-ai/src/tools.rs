//! Tool dispatch.
//!
//! The assistant reaches back into the system through three tools. Each
//! tool wraps a narrow capability trait injected at wiring time, so this
//! crate never depends on the broadcaster or the auth service themselves.
//! Dispatch is time-bounded; a timeout becomes an error result the model
//! can react to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use troika_core::UserId;

use crate::types::{ToolCall, ToolCallResult, ToolDefinition};

/// Failure inside a capability implementation.
#[derive(Debug, Clone)]
pub struct CapabilityError(pub String);

impl std::fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CapabilityError {}

/// A promotion as surfaced to the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionSummary {
    /// Title.
    pub title: String,
    /// Short description.
    pub description: String,
    /// Start date as shown in the sheet.
    pub start_date: String,
    /// End date as shown in the sheet.
    pub end_date: String,
    /// Optional deep link.
    pub link: Option<String>,
}

/// Read access to the active promotions snapshot.
#[async_trait]
pub trait PromotionsLookup: Send + Sync {
    /// Currently active promotions.
    async fn list_active(&self) -> Result<Vec<PromotionSummary>, CapabilityError>;
}

/// A partner identity as surfaced to the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerCard {
    /// Partner contract code.
    pub partner_code: String,
    /// Contact name.
    pub name: String,
    /// Whether the partner is currently authorized.
    pub authorized: bool,
}

/// Read access to partner identities.
#[async_trait]
pub trait PartnerLookup: Send + Sync {
    /// The identity bound to a user, if any.
    async fn lookup(&self, user: UserId) -> Result<Option<PartnerCard>, CapabilityError>;
}

/// One knowledge-base fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    /// Source document title.
    pub source: String,
    /// Matching fragment.
    pub text: String,
}

/// Full-text search over the knowledge base.
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    /// Best-matching fragments for a query.
    async fn search(&self, query: &str) -> Result<Vec<KnowledgeSnippet>, CapabilityError>;
}

/// One dispatchable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Definition surfaced to the assistant.
    fn definition(&self) -> ToolDefinition;

    /// Execute with parsed arguments.
    async fn invoke(&self, args: Value) -> Result<Value, CapabilityError>;
}

/// `get_active_promotions` over a [`PromotionsLookup`].
pub struct ActivePromotionsTool {
    lookup: Arc<dyn PromotionsLookup>,
}

impl ActivePromotionsTool {
    /// Wrap a promotions capability.
    #[must_use]
    pub fn new(lookup: Arc<dyn PromotionsLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl Tool for ActivePromotionsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_active_promotions".to_string(),
            description: "List the partner promotions that are currently active".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    async fn invoke(&self, _args: Value) -> Result<Value, CapabilityError> {
        let promotions = self.lookup.list_active().await?;
        serde_json::to_value(promotions).map_err(|e| CapabilityError(e.to_string()))
    }
}

/// `lookup_partner` over a [`PartnerLookup`].
pub struct PartnerLookupTool {
    lookup: Arc<dyn PartnerLookup>,
}

impl PartnerLookupTool {
    /// Wrap a partner-lookup capability.
    #[must_use]
    pub fn new(lookup: Arc<dyn PartnerLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl Tool for PartnerLookupTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "lookup_partner".to_string(),
            description: "Look up the partner identity bound to a messenger user id".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "user_id": {"type": "integer", "description": "Messenger user id"}
                },
                "required": ["user_id"]
            }),
        }
    }

    async fn invoke(&self, args: Value) -> Result<Value, CapabilityError> {
        let user_id = args
            .get("user_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| CapabilityError("user_id argument missing".to_string()))?;
        let card = self.lookup.lookup(UserId(user_id)).await?;
        serde_json::to_value(card).map_err(|e| CapabilityError(e.to_string()))
    }
}

/// `search_knowledge_base` over a [`KnowledgeSearch`].
pub struct KnowledgeSearchTool {
    search: Arc<dyn KnowledgeSearch>,
}

impl KnowledgeSearchTool {
    /// Wrap a knowledge-search capability.
    #[must_use]
    pub fn new(search: Arc<dyn KnowledgeSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_knowledge_base".to_string(),
            description: "Search the support knowledge base".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn invoke(&self, args: Value) -> Result<Value, CapabilityError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError("query argument missing".to_string()))?;
        let snippets = self.search.search(query).await?;
        serde_json::to_value(snippets).map_err(|e| CapabilityError(e.to_string()))
    }
}

/// Named tool collection with bounded dispatch.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    /// Tool dispatch time budget.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// An empty registry with the default time budget.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Override the dispatch budget (tests).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a tool under its own name.
    #[must_use]
    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.definition().name, tool);
        self
    }

    /// Definitions of every registered tool.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Whether any tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one call to completion, timeout, or cancellation.
    ///
    /// Never panics and never blocks past the budget; every failure mode
    /// folds into an error [`ToolCallResult`] the model sees.
    pub async fn dispatch(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolCallResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolCallResult::error(&call.id, format!("unknown tool {}", call.name));
        };

        let work = tool.invoke(call.arguments.clone());
        tokio::select! {
            () = cancel.cancelled() => {
                ToolCallResult::error(&call.id, "cancelled")
            },
            outcome = tokio::time::timeout(self.timeout, work) => match outcome {
                Err(_) => {
                    warn!(tool = %call.name, "tool dispatch timed out");
                    ToolCallResult::error(
                        &call.id,
                        format!("tool {} timed out", call.name),
                    )
                },
                Ok(Err(e)) => {
                    warn!(tool = %call.name, error = %e, "tool failed");
                    ToolCallResult::error(&call.id, e.to_string())
                },
                Ok(Ok(value)) => {
                    ToolCallResult::success(&call.id, value.to_string())
                },
            },
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePromotions;

    #[async_trait]
    impl PromotionsLookup for FakePromotions {
        async fn list_active(&self) -> Result<Vec<PromotionSummary>, CapabilityError> {
            Ok(vec![PromotionSummary {
                title: "Autumn bonus".into(),
                description: "Extra points".into(),
                start_date: "2026-09-01".into(),
                end_date: "2026-09-30".into(),
                link: None,
            }])
        }
    }

    struct SlowPromotions;

    #[async_trait]
    impl PromotionsLookup for SlowPromotions {
        async fn list_active(&self) -> Result<Vec<PromotionSummary>, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn registered_tool_dispatches() {
        let registry = ToolRegistry::new()
            .register(Arc::new(ActivePromotionsTool::new(Arc::new(FakePromotions))));

        let result = registry
            .dispatch(
                &call("get_active_promotions", serde_json::json!({})),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("Autumn bonus"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let registry = ToolRegistry::new();
        let result = registry
            .dispatch(
                &call("no_such_tool", serde_json::json!({})),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("unknown tool"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_produces_error_result() {
        let registry = ToolRegistry::new()
            .with_timeout(Duration::from_secs(10))
            .register(Arc::new(ActivePromotionsTool::new(Arc::new(SlowPromotions))));

        let result = registry
            .dispatch(
                &call("get_active_promotions", serde_json::json!({})),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch() {
        let registry = ToolRegistry::new()
            .register(Arc::new(ActivePromotionsTool::new(Arc::new(SlowPromotions))));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = registry
            .dispatch(&call("get_active_promotions", serde_json::json!({})), &cancel)
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("cancelled"));
    }

    #[tokio::test]
    async fn partner_lookup_requires_user_id() {
        struct NoPartner;
        #[async_trait]
        impl PartnerLookup for NoPartner {
            async fn lookup(&self, _user: UserId) -> Result<Option<PartnerCard>, CapabilityError> {
                Ok(None)
            }
        }

        let registry =
            ToolRegistry::new().register(Arc::new(PartnerLookupTool::new(Arc::new(NoPartner))));

        let missing = registry
            .dispatch(
                &call("lookup_partner", serde_json::json!({})),
                &CancellationToken::new(),
            )
            .await;
        assert!(missing.is_error);

        let ok = registry
            .dispatch(
                &call("lookup_partner", serde_json::json!({"user_id": 42})),
                &CancellationToken::new(),
            )
            .await;
        assert!(!ok.is_error);
        assert_eq!(ok.content, "null");
    }

    #[tokio::test]
    async fn definitions_sorted_by_name() {
        struct NoKnowledge;
        #[async_trait]
        impl KnowledgeSearch for NoKnowledge {
            async fn search(
                &self,
                _query: &str,
            ) -> Result<Vec<KnowledgeSnippet>, CapabilityError> {
                Ok(Vec::new())
            }
        }

        let registry = ToolRegistry::new()
            .register(Arc::new(KnowledgeSearchTool::new(Arc::new(NoKnowledge))))
            .register(Arc::new(ActivePromotionsTool::new(Arc::new(FakePromotions))));

        let names: Vec<_> = registry
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["get_active_promotions", "search_knowledge_base"]);
    }
}
