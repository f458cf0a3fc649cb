//! Tracing setup for the CLI. `RUST_LOG` filters as usual; default is
//! warnings only so command output stays clean.

use tracing_subscriber::EnvFilter;

pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "threatsmith=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    // A second init (tests, repeated calls) is fine to ignore.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
