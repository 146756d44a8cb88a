//! Troika — Telegram support bot for authorized partners.
//!
//! Wires the sheets gateway, auth, appeals, the assistant session
//! manager, the broadcaster and the monitors together behind a Telegram
//! long-poll frontend.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod app;
mod capabilities;
mod relay;
mod rest_sheets;
mod router;
mod telegram;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = troika_config::Config::from_env()?;
    Box::pin(app::run(config)).await
}
