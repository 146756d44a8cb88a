//! Troika Auth — partner identity lookup and binding.
//!
//! Partners authorize once through a web form; the resulting identity row
//! lives in the auth sheet. This crate owns that sheet contour and the
//! 24-hour authorization cache in front of it.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod cache;
mod error;
mod phone;
mod service;

pub use cache::AuthCache;
pub use error::{AuthError, AuthResult};
pub use phone::normalize_phone;
pub use service::{AuthService, PartnerIdentity};
