use stage_config::LogConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Installs the global subscriber: compact events on stderr, filtered by `RUST_LOG` or,
/// failing that, the configured filter. Stdout stays reserved for program output.
///
/// Does nothing if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) {
    let filter = build_env_filter(&config.filter);

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_target(true)
        .without_time()
        .compact();

    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}

fn build_env_filter(configured: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::try_new(configured).unwrap_or_else(|_| EnvFilter::new("warn"))
}
