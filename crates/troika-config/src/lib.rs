//! Troika configuration.
//!
//! All configuration comes from the environment; there are no config
//! files. [`Config::from_env`] reads and validates every variable in one
//! pass and reports *all* problems together, so a misconfigured deployment
//! fails with a single complete diagnostic instead of dying one variable
//! at a time.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod types;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::{Config, CredentialsSource, SheetRef};
