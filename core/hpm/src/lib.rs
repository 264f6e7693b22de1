//! Periodic sampling of hardware performance counters.
//!
//! The sampler measures a list of named counter groups, one after the other, for a
//! fixed window each. The derived metrics of every group are cleaned up (non-finite
//! values and outliers are dropped), optionally summed per physical core, FLOPS
//! metrics are normalized to single precision, and the values are handed to the host.
//!
//! ## Overview
//!
//! - [`access::CounterAccess`] is the interface to the counter hardware.
//!   The `hpm-perf` crate implements it with Linux `perf_events`.
//! - [`emit::Dispatch`] receives the values, with their [`time::CdTime`] timestamp.
//! - [`config::Config`] holds the settings, parsed from key/value pairs.
//! - [`session::Session`] ties everything together: build it with [`Session::init`],
//!   then call [`Session::read`] once per measurement cycle.
//!
//! ## Example
//!
//! ```ignore
//! let config = Config::from_pairs([("Groups", "BRANCH,CPI"), ("Mtime", "2")])?;
//! let mut session = Session::init(config, backend, SystemClock)?;
//! loop {
//!     let report = session.read(&mut output);
//!     log::debug!("{report:?}");
//! }
//! ```

pub mod access;
pub mod clock;
pub mod config;
pub mod control;
pub mod emit;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod sampler;
pub mod session;
pub mod time;
pub mod topology;

pub use config::Config;
pub use session::Session;
