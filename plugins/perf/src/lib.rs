//! Hardware counter access with Linux `perf_events`.
//!
//! [`PerfCounterAccess`] implements [`hpm::access::CounterAccess`]: the topology is read
//! from sysfs and the counter groups of the [`groups`] catalog are opened on every cpu
//! with `perf_event_open`.

#[cfg(not(target_os = "linux"))]
compile_error!("This crate only works on Linux.");

mod access;
pub mod groups;
pub mod topology;

pub use access::PerfCounterAccess;
