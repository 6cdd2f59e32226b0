//! Structured logging setup.
//!
//! Log records are JSON objects on stderr. The subscriber is installed
//! once, as early as possible, at `info`; the configured level is applied
//! afterwards through the returned handle, so configuration failures are
//! still reported as structured records.

use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, Registry};

/// Handle for adjusting the log level after setup.
pub struct LoggingHandle {
    level: reload::Handle<LevelFilter, Registry>,
}

impl LoggingHandle {
    /// Apply the configured log level.
    pub fn set_level(&self, level: LevelFilter) {
        if self.level.reload(level).is_err() {
            warn!("failed to update the log level");
        }
    }
}

/// Install the global JSON subscriber. Call once, before anything logs.
pub fn setup() -> LoggingHandle {
    let (level, handle) = reload::Layer::new(LevelFilter::INFO);
    tracing_subscriber::registry()
        .with(level)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();
    LoggingHandle { level: handle }
}
