// ── Tracing setup ──
//
// One-call subscriber installation for binaries and examples embedding
// the client. `RUST_LOG` always wins over the configured level.

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. `json` switches to one JSON object
/// per line. Returns `false` if a subscriber was already installed.
pub fn init_tracing(default_level: &str, json: bool) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}
