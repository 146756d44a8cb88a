//! Troika Broadcast — promotion fan-out.
//!
//! Scans the promotions sheet for active entries and delivers each one to
//! every authorized partner exactly once. The SENT ledger on disk is the
//! deduplication record: a (promotion, user) pair is written only after a
//! successful send, so crashes re-deliver only to recipients who never
//! got their copy.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod broadcaster;
mod error;
mod ledger;
mod media;
mod promotion;

pub use broadcaster::{Broadcaster, BroadcasterConfig};
pub use error::{BroadcastError, BroadcastResult};
pub use ledger::SentLedger;
pub use media::{MediaCache, MediaCacheConfig};
pub use promotion::{promotion_id, Promotion, PromotionStatus};
