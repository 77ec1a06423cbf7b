//! Log output for the `dbfixture` binary.
//!
//! Filter from `RUST_LOG` (default `dbfixture=info`, which also covers the
//! `dbfixture_engine` and `dbfixture_io` targets), written to stderr so
//! stdout stays clean for `--json`. Set `RUST_LOG_FORMAT=json` for one JSON
//! object per event.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "dbfixture=info";

fn json_requested() -> bool {
    std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    if json_requested() {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
