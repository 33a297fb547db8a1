//! Tracing subscriber setup
//!
//! `RUST_LOG` wins when set; otherwise the crate logs at `level` and
//! dependencies at `info`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used when `RUST_LOG` is absent
pub fn default_directive(level: &str) -> String {
    format!("civic_pulse={},info", level)
}

/// Install the global subscriber. Call once from `main`.
pub fn init(level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive(level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
