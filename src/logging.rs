//! Tracing setup.
//!
//! Full logging infrastructure (sinks, rotation, shipping) is external to
//! this crate; this is just enough to make `RUST_LOG` work for a binary
//! embedding the orchestrator, using the standard `tracing` +
//! `tracing-subscriber::EnvFilter` convention.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber reading level filters from `RUST_LOG`,
/// defaulting to `info`. Safe to call once at process startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
