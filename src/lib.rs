//! Trusted multi-source configuration store for a device.
//!
//! The heavy lifting lives in [`credence_store`]: documents, vector
//! clocks, the settings map, sources and the document manager. This crate
//! assembles those pieces into a service: it loads the bootstrap trusted
//! document, wires up the built-in blob formats and delegate types, and
//! exposes a string-keyed [`Frontend`] with get / enumerate / update
//! operations.
mod daemon;
mod frontend;

pub use crate::daemon::{
    default_delegate_factory, default_parser_registry, ConfigPaths, Daemon,
};
pub use crate::frontend::{Error, Frontend};
pub use credence_store::{
    DocumentManager, InsertionStatus, Key, Keypair, NVRam, SettingStatus, SettingsObserver,
    SettingsService, VersionStamp,
};

use tracing_subscriber::EnvFilter;

/// Initialises process-wide logging. Safe to call more than once.
pub fn init_logging() {
    tracing_log::LogTracer::init().ok();
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_panics::init();
}
