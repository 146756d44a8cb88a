//! Troika Sheets — async gateway over the blocking spreadsheet client.
//!
//! The vendor client is row-oriented, blocking, and shared. This crate
//! makes it safe to use from the rest of the process:
//!
//! - every RPC runs on a bounded `spawn_blocking` pool
//! - a single write lock serializes all mutating calls
//! - transient failures are retried with backoff and jitter
//! - each sheet contour sits behind its own circuit breaker
//! - the authorized client handle is cached and rebuilt on auth errors
//!
//! Callers see the four-way error taxonomy of [`SheetError`] and nothing
//! of the retry/breaker machinery.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod api;
pub mod color;
pub mod error;
pub mod gateway;
pub mod memory;

pub use api::{ApiError, CellUpdate, Row, SheetsApi};
pub use color::Color;
pub use error::{SheetError, SheetResult};
pub use gateway::{Connector, GatewayConfig, SheetEndpoint, SheetHandle, SheetsGateway};
pub use memory::InMemorySheets;
