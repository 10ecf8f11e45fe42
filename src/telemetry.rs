//! Logging setup for the `conductor` binary.
//!
//! Log lines go to stderr so they never interleave with reports printed on
//! stdout. `RUST_LOG` takes precedence over the verbosity flag:
//!
//! ```bash
//! RUST_LOG=conductor=debug conductor demo
//! ```

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Calling it twice is a no-op.
pub fn setup_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("conductor=debug,warn")
    } else {
        EnvFilter::new("conductor=info,warn")
    }
}
