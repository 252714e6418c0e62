//! Filepath: src/infra/logging.rs
//! stderr logging via tracing-subscriber.
//! - `BWREG_LOG` takes an EnvFilter directive string and wins over flags
//! - otherwise `warn`, raised by each `-v`

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoUtc;

/// Env var holding an `EnvFilter` directive, e.g. `beiwe_registry=debug`.
pub const LOG_ENV: &str = "BWREG_LOG";

fn default_level(verbose: u8) -> &'static str
{
    match verbose
    {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init(
    verbose: u8,
    no_color: bool,
)
{
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(!no_color)
        .with_target(false)
        .try_init();
}
