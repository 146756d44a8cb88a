//! Troika Core — shared primitives for the support-bot coordinator.
//!
//! This crate carries everything the domain crates have in common:
//!
//! - typed identifiers ([`UserId`], [`PromotionId`])
//! - the circuit breaker gating calls to external backends
//! - retry with exponential backoff and jitter
//! - outbound send rate limiting (global and per-chat)
//! - the [`Messenger`] trait the router and monitors send through
//! - the polling heartbeat read by the watchdog
//! - the background task tracker and the single-instance PID lock
//! - PII masking for log output

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod breaker;
pub mod heartbeat;
pub mod ids;
pub mod instance;
pub mod mask;
pub mod messenger;
pub mod rate_limit;
pub mod retry;
pub mod tracker;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use heartbeat::Heartbeat;
pub use ids::{PromotionId, UserId};
pub use instance::{InstanceError, PidLock};
pub use messenger::{
    Keyboard, KeyboardButton, MessageRef, Messenger, MessengerError, MessengerResult, OutboundText,
};
pub use rate_limit::SendLimiter;
pub use retry::{retry, RetryConfig, RetryOutcome};
pub use tracker::{TaskState, TaskTracker};
