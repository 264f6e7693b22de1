//! Counter access with Linux perf_events.

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::Context;
use hpm::{
    access::{AccessMode, CounterAccess, CpuTopology, GroupHandle},
    error::AccessError,
};
use itertools::Itertools;
use perf_event::{Builder, Counter, Group, GroupData, ReadFormat, events::Software};

use crate::groups::{self, GroupDef, HwEvent};
use crate::topology::{self, SYSFS_CPU};

/// The counters of a group, opened on one cpu.
struct CpuCounters {
    cpu: u32,
    group: Group,
    counters: Vec<(HwEvent, Counter)>,
}

/// The group that is currently programmed.
struct Programmed {
    handle: GroupHandle,
    per_cpu: Vec<CpuCounters>,
    started: Option<Instant>,
}

/// A counter group registered with [`CounterAccess::add_group`].
struct Registered {
    def: &'static GroupDef,
    /// Values of the last measurement, `[metric][thread]`.
    last: Vec<Vec<f64>>,
}

/// Counter access backed by `perf_event_open`.
///
/// One perf group per monitored cpu counts every process running on that cpu.
/// Opening such counters requires `CAP_PERFMON` or a low enough `perf_event_paranoid`.
pub struct PerfCounterAccess {
    sysfs_cpu: PathBuf,
    cpus: Vec<u32>,
    verbosity: i32,
    groups: Vec<Registered>,
    programmed: Option<Programmed>,
}

impl Default for PerfCounterAccess {
    fn default() -> Self {
        Self::new(SYSFS_CPU)
    }
}

impl PerfCounterAccess {
    /// Creates a backend that discovers the topology under `sysfs_cpu`.
    pub fn new(sysfs_cpu: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_cpu: sysfs_cpu.into(),
            cpus: Vec::new(),
            verbosity: 1,
            groups: Vec::new(),
            programmed: None,
        }
    }

    fn is_programmed(&self, handle: GroupHandle) -> bool {
        self.programmed.as_ref().is_some_and(|p| p.handle == handle)
    }

    fn registered(&self, handle: GroupHandle) -> Result<&Registered, AccessError> {
        self.groups.get(handle.0).ok_or(AccessError::InvalidHandle(handle.0))
    }

    /// Opens the counters of a group on every monitored cpu.
    fn open(&self, def: &GroupDef) -> anyhow::Result<Vec<CpuCounters>> {
        // Returns a new [`perf_event::Builder`] configured to build a group of perf events.
        fn new_group_builder<'a>() -> Builder<'a> {
            // the DUMMY leader is not included in the result of Group::read
            let mut builder = Builder::new(Software::DUMMY);
            builder.read_format(
                ReadFormat::GROUP | ReadFormat::TOTAL_TIME_ENABLED | ReadFormat::TOTAL_TIME_RUNNING | ReadFormat::ID,
            );
            builder
        }

        let mut per_cpu = Vec::with_capacity(self.cpus.len());
        for &cpu in &self.cpus {
            let cpu_id = cpu as usize;
            let mut group = new_group_builder()
                .any_pid()
                .one_cpu(cpu_id)
                .build_group()
                .with_context(|| format!("build_group with any_pid().one_cpu({cpu_id})"))?;

            let mut counters = Vec::with_capacity(def.events.len());
            for &event in def.events {
                let counter = group
                    .add(Builder::new(event.hardware()).any_pid().one_cpu(cpu_id))
                    .with_context(|| format!("perf_group.add({event:?}) on cpu {cpu_id}"))?;
                counters.push((event, counter));
            }
            per_cpu.push(CpuCounters { cpu, group, counters });
        }
        Ok(per_cpu)
    }

    fn program(&mut self, handle: GroupHandle) -> Result<(), AccessError> {
        let def = self.registered(handle)?.def;
        // close the previous counters before opening new ones
        self.programmed = None;
        let per_cpu = self
            .open(def)
            .map_err(|e| AccessError::Other(format!("cannot program group {}: {e:#}", def.name)))?;
        if self.verbosity > 1 {
            log::debug!(
                "programmed group {} on cpus [{}] with events [{}]",
                def.name,
                per_cpu.iter().map(|c| c.cpu).join(", "),
                def.events.iter().map(|e| format!("{e:?}")).join(", ")
            );
        }
        self.programmed = Some(Programmed {
            handle,
            per_cpu,
            started: None,
        });
        Ok(())
    }
}

/// Count of an event, scaled up if the counters have been multiplexed.
fn scaled_count(data: &GroupData, counter: &Counter) -> u64 {
    let raw = data[counter];
    match (data.time_enabled(), data.time_running()) {
        (Some(enabled), Some(running)) if running > Duration::ZERO && running < enabled => {
            (raw as f64 * enabled.as_secs_f64() / running.as_secs_f64()) as u64
        }
        _ => raw,
    }
}

impl CounterAccess for PerfCounterAccess {
    fn topology(&mut self) -> Result<CpuTopology, AccessError> {
        topology::read_topology(&self.sysfs_cpu).map_err(|e| AccessError::Topology(format!("{e:#}")))
    }

    fn set_verbosity(&mut self, level: i32) {
        self.verbosity = level;
    }

    fn set_access_mode(&mut self, mode: AccessMode) {
        if mode != AccessMode::PerfEvent {
            log::warn!("access mode {mode:?} is not available, using perf_event");
        }
    }

    fn init_threads(&mut self, threads: &[u32]) -> Result<(), AccessError> {
        if threads.is_empty() {
            return Err(AccessError::Other("no cpu to monitor".into()));
        }
        self.cpus = threads.to_vec();
        log::debug!("monitoring cpus {:?}", self.cpus);
        Ok(())
    }

    fn counter_width(&self) -> Option<u32> {
        // perf_event virtualizes the counters to 64 bits
        None
    }

    fn add_group(&mut self, name: &str) -> Result<GroupHandle, AccessError> {
        let def = groups::find(name).ok_or_else(|| AccessError::UnknownGroup(name.to_owned()))?;
        let last = vec![vec![f64::NAN; self.cpus.len()]; def.metrics.len()];
        self.groups.push(Registered { def, last });
        Ok(GroupHandle(self.groups.len() - 1))
    }

    fn metric_count(&self, group: GroupHandle) -> usize {
        self.registered(group).map(|g| g.def.metrics.len()).unwrap_or(0)
    }

    fn metric_name(&self, group: GroupHandle, index: usize) -> Option<String> {
        let g = self.registered(group).ok()?;
        g.def.metrics.get(index).map(|m| m.name.to_owned())
    }

    fn setup_counters(&mut self, group: GroupHandle) -> Result<(), AccessError> {
        if self.is_programmed(group) {
            return Ok(());
        }
        self.program(group)
    }

    fn start_counters(&mut self) -> Result<(), AccessError> {
        let programmed = self.programmed.as_mut().ok_or(AccessError::NotProgrammed)?;
        for c in &mut programmed.per_cpu {
            c.group.reset()?;
            c.group.enable()?;
        }
        programmed.started = Some(Instant::now());
        Ok(())
    }

    fn stop_counters(&mut self) -> Result<(), AccessError> {
        let programmed = self.programmed.as_mut().ok_or(AccessError::NotProgrammed)?;
        for c in &mut programmed.per_cpu {
            c.group.disable()?;
        }
        let started = programmed.started.take().ok_or(AccessError::NotProgrammed)?;
        let elapsed = started.elapsed();

        let registered = self
            .groups
            .get_mut(programmed.handle.0)
            .ok_or(AccessError::InvalidHandle(programmed.handle.0))?;
        registered.last = vec![vec![f64::NAN; programmed.per_cpu.len()]; registered.def.metrics.len()];
        for (thread, c) in programmed.per_cpu.iter_mut().enumerate() {
            let data = c.group.read()?;
            log::trace!(
                "cpu {}: time_enabled={:?}, time_running={:?}",
                c.cpu,
                data.time_enabled(),
                data.time_running()
            );
            let count = |event: HwEvent| {
                c.counters
                    .iter()
                    .find(|(e, _)| *e == event)
                    .map(|(_, counter)| scaled_count(&data, counter))
            };
            for (m, metric) in registered.def.metrics.iter().enumerate() {
                registered.last[m][thread] = metric.formula.compute(&count, elapsed);
            }
        }
        Ok(())
    }

    fn last_metric(&self, group: GroupHandle, metric: usize, thread: usize) -> f64 {
        self.registered(group)
            .ok()
            .and_then(|g| g.last.get(metric)?.get(thread).copied())
            .unwrap_or(f64::NAN)
    }

    fn set_counters_config(&mut self, group: GroupHandle) -> Result<(), AccessError> {
        let def = self.registered(group)?.def;
        // the kernel keeps the programming of open counters, only the current group can be written again
        if !self.is_programmed(group) {
            log::debug!("group {} is not programmed, nothing to reset", def.name);
            return Ok(());
        }
        self.program(group)
    }

    fn finalize(&mut self) {
        if let Some(p) = self.programmed.take() {
            log::debug!("closing the counters of {} cpus", p.per_cpu.len());
        }
        self.groups.clear();
        self.cpus.clear();
    }
}
