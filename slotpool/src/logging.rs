//! Tracing setup for binaries embedding the pool.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing on stderr.
///
/// Filter precedence: `RUST_LOG`, then `SLOTPOOL_LOG` as the level for this
/// crate, then `debug` when `verbose` is set (so the pool's diagnostic events
/// show up), else `info`. `LOG_FORMAT=json` switches to JSON lines.
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(verbose: bool) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(filter_directive(
            std::env::var("SLOTPOOL_LOG").ok().as_deref(),
            verbose,
        )),
    };
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json");

    // Exactly one of the two formatters is installed.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .try_init();
}

fn filter_directive(level: Option<&str>, verbose: bool) -> String {
    let level = match level {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        Some(_) => "info",
        None if verbose => "debug",
        None => "info",
    };
    format!("slotpool={level},slotpool_demo={level}")
}
