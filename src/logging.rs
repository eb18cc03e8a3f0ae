//! Tracing bootstrap for hosts that do not install their own subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with an env-filter default.
///
/// Hosts embedding the pipeline that already have a subscriber should skip
/// this; calling it twice panics the same way any double `init` does.
pub fn init() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "invigil=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("invigil v{} logging initialized", env!("CARGO_PKG_VERSION"));
}
