use errorgraph_core::LoggingConfig;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, Registry};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level; calling this
/// more than once is harmless.
pub fn init_tracing(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let subscriber = Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber).ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_is_ignored() {
        let config = LoggingConfig::default();
        init_tracing(&config);
        init_tracing(&config);
        tracing::info!("telemetry initialised twice");
    }
}
