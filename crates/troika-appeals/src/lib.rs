//! Troika Appeals — the support-thread state machine.
//!
//! Each user's appeal is one row of the appeals sheet. The row accumulates
//! the conversation (newest first, 30-day retention), carries a status the
//! specialists drive by color, and holds the cell a specialist writes
//! their reply into.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod log;
mod service;

pub use error::{AppealsError, AppealsResult};
pub use log::{entry, prune, RETENTION_DAYS};
pub use service::{AppealContact, AppealStatus, AppealsService, SpecialistReply};
