//! Capability adapters for the assistant's tools.
//!
//! The session manager only sees narrow traits; these adapters bridge
//! them to the broadcaster snapshot and the auth service without letting
//! the AI crate depend on either.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use troika_ai::{
    CapabilityError, KnowledgeSearch, KnowledgeSnippet, PartnerCard, PartnerLookup,
    PromotionSummary, PromotionsLookup,
};
use troika_auth::AuthService;
use troika_broadcast::Broadcaster;
use troika_core::UserId;

/// Promotions tool backed by the broadcaster's last scan.
pub(crate) struct SnapshotPromotions {
    broadcaster: Arc<Broadcaster>,
}

impl SnapshotPromotions {
    /// Adapter over the broadcaster.
    #[must_use]
    pub(crate) fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl PromotionsLookup for SnapshotPromotions {
    async fn list_active(&self) -> Result<Vec<PromotionSummary>, CapabilityError> {
        Ok(self
            .broadcaster
            .active_snapshot()
            .await
            .into_iter()
            .map(|p| PromotionSummary {
                title: p.title,
                description: p.description,
                start_date: p.start_date,
                end_date: p.end_date,
                link: p.link,
            })
            .collect())
    }
}

/// Partner-lookup tool backed by the auth service.
pub(crate) struct SheetPartnerLookup {
    auth: Arc<AuthService>,
}

impl SheetPartnerLookup {
    /// Adapter over the auth service.
    #[must_use]
    pub(crate) fn new(auth: Arc<AuthService>) -> Self {
        Self { auth }
    }
}

#[async_trait]
impl PartnerLookup for SheetPartnerLookup {
    async fn lookup(&self, user: UserId) -> Result<Option<PartnerCard>, CapabilityError> {
        let identity = self
            .auth
            .lookup(user, &CancellationToken::new())
            .await
            .map_err(|e| CapabilityError(e.to_string()))?;
        Ok(identity.map(|i| PartnerCard {
            partner_code: i.partner_code,
            name: i.name,
            authorized: i.authorized,
        }))
    }
}

/// Knowledge search when no knowledge source is configured.
///
/// The drive-backed index is an external collaborator; without a folder
/// id the tool simply finds nothing, and the assistant says so.
pub(crate) struct NoKnowledge;

#[async_trait]
impl KnowledgeSearch for NoKnowledge {
    async fn search(&self, _query: &str) -> Result<Vec<KnowledgeSnippet>, CapabilityError> {
        Ok(Vec::new())
    }
}
