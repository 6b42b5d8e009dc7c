//! Logging bootstrap shared by the Switchyard binaries

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `directives` is used, e.g.
/// `"switchyard_dispatcher=info"`. Calling this twice is harmless.
pub fn init_tracing(directives: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| directives.into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Default filter directives for a binary's own crates at `level`
pub fn default_directives(crate_names: &[&str], level: &str) -> String {
    crate_names
        .iter()
        .map(|name| format!("{}={}", name, level))
        .collect::<Vec<_>>()
        .join(",")
}
