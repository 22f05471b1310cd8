pub mod config;
pub mod derived; // Adherence, BMI, trends, clinical banding, activity feed
pub mod gateway; // Backend access: REST, in-memory, attachment storage
pub mod models;
pub mod session; // Identity-driven store lifecycle
pub mod store; // Entity cache, notifications, reminders

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// default filter. Call once at startup.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
