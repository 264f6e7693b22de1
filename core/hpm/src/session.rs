//! The sampling session: every table of the sampler, from startup to shutdown.

use crate::access::CounterAccess;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::control::{Command, Notification, PLUGIN_NAME};
use crate::emit::{Dispatch, Emitter};
use crate::error::InitError;
use crate::pipeline::ValuePipeline;
use crate::registry::Registry;
use crate::sampler::{self, CycleReport, GroupOutcome};
use crate::time::CdTime;
use crate::topology::Topology;

/// A running sampler.
///
/// Built once by [`Session::init`], then [`read`](Session::read) is called in a loop,
/// and [`notify`](Session::notify) between two reads. The counter access layer is
/// finalized exactly once, by [`shutdown`](Session::shutdown) or on drop.
pub struct Session<A: CounterAccess, C: Clock = SystemClock> {
    access: A,
    clock: C,
    config: Config,
    topology: Topology,
    registry: Registry,
    pipeline: ValuePipeline,
    /// Measurement window of a group.
    window: CdTime,
    enabled: bool,
    finalized: bool,
}

impl<A: CounterAccess, C: Clock> Session<A, C> {
    /// Discovers the topology, initializes the counters and resolves the groups.
    ///
    /// On error, the access layer is finalized before returning.
    pub fn init(config: Config, mut access: A, clock: C) -> Result<Self, InitError> {
        access.set_access_mode(config.access_mode);
        access.set_verbosity(config.verbose);

        let cpu = match access.topology() {
            Ok(cpu) => cpu,
            Err(e) => {
                access.finalize();
                return Err(InitError::Topology(e));
            }
        };
        let topology = match Topology::resolve(&cpu, config.per_core) {
            Ok(t) => t,
            Err(e) => {
                access.finalize();
                return Err(e);
            }
        };

        if let Err(e) = access.init_threads(&topology.thread_ids()) {
            access.finalize();
            return Err(InitError::Threads(topology.num_threads(), e));
        }

        if config.groups.is_empty() {
            log::warn!("no metric group configured, nothing will be measured");
        }
        let registry = Registry::setup(&config, &mut access, topology.cores().map(|c| c.num_cores()));
        let pipeline = ValuePipeline::new(&registry, &topology);

        Ok(Self {
            access,
            clock,
            window: CdTime::from(config.measure_time),
            config,
            topology,
            registry,
            pipeline,
            enabled: true,
            finalized: false,
        })
    }

    /// Runs one measurement cycle: measures every group, one after the other,
    /// and submits the values to `out`.
    ///
    /// Every value of the cycle has the same timestamp: the time at which the cycle
    /// starts plus the measurement window of all the groups, i.e. the nominal end of the cycle.
    pub fn read(&mut self, out: &mut dyn Dispatch) -> CycleReport {
        if !self.enabled {
            return CycleReport {
                disabled: true,
                ..Default::default()
            };
        }

        let num_groups = self.registry.groups().len() as u64;
        let time = CdTime::from(self.clock.now()) + self.window * num_groups;
        let mut emitter = Emitter::new(out, time);
        let mut report = CycleReport {
            time,
            ..Default::default()
        };

        for group in self.registry.groups_mut() {
            let outcome = sampler::measure_group(
                &mut self.access,
                &self.clock,
                self.config.measure_time,
                group,
                &self.topology,
                &mut self.pipeline,
                &mut emitter,
                &mut report,
            );
            match outcome {
                GroupOutcome::Measured => report.groups_measured += 1,
                _ => report.groups_skipped += 1,
            }
        }

        self.pipeline
            .flush(self.registry.groups_mut(), &self.topology, &mut emitter);
        report.emitted = emitter.emitted();
        report
    }

    /// Handles a notification from the host.
    ///
    /// Returns the command that has been applied, if any.
    pub fn notify(&mut self, notification: &Notification) -> Option<Command> {
        if !notification.targets(PLUGIN_NAME) {
            return None;
        }
        let command = notification.command();
        match command {
            Some(Command::ResetCounters) => self.reset_counters(),
            Some(Command::Disable) => {
                log::info!("disable reading of metrics");
                self.enabled = false;
            }
            Some(Command::Enable) => {
                log::info!("enable reading of metrics");
                self.enabled = true;
            }
            None => log::debug!("ignoring notification '{}'", notification.message),
        }
        command
    }

    /// Writes the counter programming of every resolved group again.
    pub fn reset_counters(&mut self) {
        let groups: Vec<_> = self.registry.resolved().collect();
        log::info!("set counters configuration for {} groups", groups.len());
        for (name, handle) in groups {
            if let Err(e) = self.access.set_counters_config(handle) {
                log::warn!("could not set the counters configuration of group {name}: {e}");
            }
        }
    }

    /// Finalizes the counter access layer. Calling it again does nothing.
    pub fn shutdown(&mut self) {
        if !self.finalized {
            log::debug!("finalizing the counter access layer");
            self.access.finalize();
            self.finalized = true;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn access(&self) -> &A {
        &self.access
    }

    /// Returns `true` if several FLOPS metrics are summed into the normalized FLOPS metric.
    pub fn summarizes_flops(&self) -> bool {
        self.pipeline.summarizes_flops()
    }
}

impl<A: CounterAccess, C: Clock> Drop for Session<A, C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
