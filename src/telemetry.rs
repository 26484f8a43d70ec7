//! Logging initialization.
//!
//! Controlled by `FUZZDIFF_LOG`:
//! - unset or `"text"` → compact human-readable events to stderr
//! - `"json"` → JSON events to stderr, one object per line, with span close
//!   events (so each `trial` span reports its duration)
//! - `"off"` → no subscriber installed (zero overhead)
//!
//! Verbosity comes from `RUST_LOG` and defaults to `warn`, which keeps the
//! progress line readable while still surfacing candidate findings.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const DEFAULT_FILTER: &str = "warn";

/// Which subscriber [`init`] installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Off,
    Text,
    Json,
}

impl LogMode {
    /// Parse a `FUZZDIFF_LOG` value. Unknown values fall back to text.
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("off" | "none" | "0") => Self::Off,
            Some("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Initialize logging based on `FUZZDIFF_LOG` and `RUST_LOG`.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() -> LogMode {
    let mode = LogMode::from_env_value(std::env::var("FUZZDIFF_LOG").ok().as_deref());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = match mode {
        LogMode::Off => return mode,
        LogMode::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogMode::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
    };
    if let Err(e) = installed {
        eprintln!("warning: logging already initialized: {e}");
    }
    mode
}
