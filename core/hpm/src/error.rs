//! Error types.
//!
//! Errors are split by the stage that produces them: the counter-access layer
//! ([`AccessError`]), the configuration parser ([`ConfigError`]) and the
//! session startup ([`InitError`]). Only [`InitError`] is fatal, the other ones
//! disable a single group, skip a single cycle or reject a single config key.

use thiserror::Error;

/// An error reported by the counter-access layer.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("unknown counter group '{0}'")]
    UnknownGroup(String),
    #[error("invalid group handle {0}")]
    InvalidHandle(usize),
    #[error("topology discovery failed: {0}")]
    Topology(String),
    #[error("no counter group has been programmed")]
    NotProgrammed,
    #[error("counter access failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// An error in a configuration key or value.
///
/// A key that fails to parse leaves the previous configuration unchanged.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
    #[error("empty value is not allowed for '{0}'")]
    EmptyValue(&'static str),
    #[error("{key} requires a ':' as separator between metric and value, got '{entry}'")]
    MissingSeparator { key: &'static str, entry: String },
    #[error("invalid number '{value}' for {key}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("invalid access mode {0}, expected 0 (direct), 1 (access daemon) or -1 (perf_event)")]
    InvalidAccessMode(i32),
    #[error("measurement time must be a positive number of seconds, got {0}")]
    InvalidMeasureTime(f64),
}

/// A fatal error that prevents the session from starting.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("could not discover the cpu topology")]
    Topology(#[source] AccessError),
    #[error("the cpu topology contains no hardware thread")]
    EmptyTopology,
    #[error("could not initialize the counters on {0} hardware threads")]
    Threads(usize, #[source] AccessError),
}
