//! Troika Monitor — the background guardians.
//!
//! Three loops with one job each:
//!
//! - the response monitor walks the appeals sheet and delivers specialist
//!   replies to users, exactly once per reply in the happy path
//! - the health monitor pings the messenger and every sheet contour,
//!   rebuilding stale clients and escalating a dead messenger
//! - the watchdog verifies the long-poll loop still produces fetches and
//!   forces a restart when it does not

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod health;
mod responses;
mod watchdog;

pub use error::{MonitorError, MonitorResult};
pub use health::{HealthMonitor, HealthMonitorConfig};
pub use responses::{ResponseMonitor, ResponseMonitorConfig};
pub use watchdog::{Watchdog, WatchdogConfig, WatchdogVerdict};
