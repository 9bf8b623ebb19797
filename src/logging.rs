use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logs go to stderr; stdout carries protocol responses only.
pub fn init_tracing(level: &str) {
    let fallback = format!("{}={}", env!("CARGO_CRATE_NAME"), level);
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(false),
        )
        .try_init();
}
