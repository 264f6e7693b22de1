//! Interface to the hardware counter access layer.
//!
//! The engine never programs counters itself. It drives an implementation of
//! [`CounterAccess`], which knows how to discover the topology, resolve group
//! names to counter groups and read the derived metrics. See the `hpm-perf`
//! crate for an implementation based on Linux `perf_events`.

use std::fmt;

use serde::Serialize;

use crate::error::{AccessError, ConfigError};

/// Handle to a counter group registered in the access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupHandle(pub usize);

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the access layer reaches the counter registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Direct access to the model-specific registers.
    #[default]
    Direct,
    /// Access through a privileged daemon.
    AccessDaemon,
    /// Access mediated by the kernel (Linux `perf_events`).
    PerfEvent,
}

impl TryFrom<i32> for AccessMode {
    type Error = ConfigError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AccessMode::Direct),
            1 => Ok(AccessMode::AccessDaemon),
            -1 => Ok(AccessMode::PerfEvent),
            _ => Err(ConfigError::InvalidAccessMode(value)),
        }
    }
}

/// A hardware thread as reported by the access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Platform identifier of the thread (OS cpu number or APIC id).
    pub id: u32,
    /// Identifier of the socket (package) that contains the thread.
    pub socket: u32,
    /// Identifier of the physical core that runs the thread, unique within its socket.
    pub core: u32,
}

/// The cpu topology, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuTopology {
    pub threads: Vec<ThreadInfo>,
}

/// Access to hardware performance counters.
///
/// Calls are synchronous. Group-level operations may fail independently:
/// a failure on one group never invalidates the other ones.
pub trait CounterAccess {
    /// Discovers the hardware threads of the machine.
    fn topology(&mut self) -> Result<CpuTopology, AccessError>;

    /// Sets the verbosity of the access layer.
    fn set_verbosity(&mut self, level: i32);

    /// Selects how the counter registers are accessed.
    fn set_access_mode(&mut self, mode: AccessMode);

    /// Prepares the counters of the given threads (by platform id).
    ///
    /// The position of a thread in `threads` is the thread index used by [`last_metric`](Self::last_metric).
    fn init_threads(&mut self, threads: &[u32]) -> Result<(), AccessError>;

    /// Bit width of the hardware counters, if known.
    fn counter_width(&self) -> Option<u32>;

    /// Registers a counter group by name.
    fn add_group(&mut self, name: &str) -> Result<GroupHandle, AccessError>;

    /// Number of derived metrics of a group.
    fn metric_count(&self, group: GroupHandle) -> usize;

    /// Name of the `index`-th derived metric of a group.
    fn metric_name(&self, group: GroupHandle, index: usize) -> Option<String>;

    /// Programs the counters of a group, replacing the previous programming.
    fn setup_counters(&mut self, group: GroupHandle) -> Result<(), AccessError>;

    /// Starts counting with the programmed group.
    fn start_counters(&mut self) -> Result<(), AccessError>;

    /// Stops counting and computes the derived metrics of the programmed group.
    fn stop_counters(&mut self) -> Result<(), AccessError>;

    /// Returns the value of a derived metric for the given thread index,
    /// as computed by the last measurement of the group.
    fn last_metric(&self, group: GroupHandle, metric: usize, thread: usize) -> f64;

    /// Writes the programming of a group to the hardware again.
    ///
    /// Useful with direct access, when other tools may have modified the registers.
    fn set_counters_config(&mut self, group: GroupHandle) -> Result<(), AccessError>;

    /// Releases the resources of the access layer.
    fn finalize(&mut self);
}
