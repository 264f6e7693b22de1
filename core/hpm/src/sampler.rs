//! Measurement of one counter group.
//!
//! A group goes through three phases, one after the other:
//! - arm: the counter programming of the group is written to the hardware;
//! - run: the counters are started, the thread sleeps for the measurement window, the counters are stopped;
//! - drain: one value per (metric, hardware thread) is read and passed to the [`ValuePipeline`].
//!
//! If the group is unresolved or cannot be armed, the window is still waited for,
//! so that a cycle always lasts `window * number_of_groups`.

use std::time::Duration;

use crate::access::CounterAccess;
use crate::clock::Clock;
use crate::emit::Emitter;
use crate::pipeline::{Outcome, ValuePipeline};
use crate::registry::MetricGroup;
use crate::time::CdTime;
use crate::topology::Topology;

/// Result of the measurement of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    Measured,
    /// The group could not be resolved at startup.
    Unresolved,
    /// The counters could not be programmed, the group will be retried next cycle.
    ArmFailed,
    /// The counters could not be started or stopped, no value was read.
    RunFailed,
}

/// Summary of a measurement cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// `true` if the cycle was skipped because sampling is disabled.
    pub disabled: bool,
    /// Timestamp given to every value of the cycle.
    pub time: CdTime,
    pub groups_measured: usize,
    pub groups_skipped: usize,
    /// Values submitted to the host, sums included.
    pub emitted: usize,
    pub accumulated: usize,
    pub not_finite: usize,
    pub outliers: usize,
}

impl CycleReport {
    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Accumulated => self.accumulated += 1,
            Outcome::NotFinite => self.not_finite += 1,
            Outcome::Outlier => self.outliers += 1,
            Outcome::Emitted | Outcome::NotRepresentative => (),
        }
    }
}

/// Arms, runs and drains one group.
#[allow(clippy::too_many_arguments)]
pub(crate) fn measure_group<A: CounterAccess + ?Sized, C: Clock + ?Sized>(
    access: &mut A,
    clock: &C,
    window: Duration,
    group: &mut MetricGroup,
    topology: &Topology,
    pipeline: &mut ValuePipeline,
    emitter: &mut Emitter,
    report: &mut CycleReport,
) -> GroupOutcome {
    let Some(handle) = group.handle else {
        log::info!("no event set for group {}", group.name);
        clock.sleep(window);
        return GroupOutcome::Unresolved;
    };

    // arm
    if let Err(e) = access.setup_counters(handle) {
        log::info!("could not setup counters for group {}: {e}", group.name);
        clock.sleep(window);
        return GroupOutcome::ArmFailed;
    }

    // run
    if let Err(e) = access.start_counters() {
        log::warn!("could not start counters for group {}: {e}", group.name);
        clock.sleep(window);
        return GroupOutcome::RunFailed;
    }
    clock.sleep(window);
    if let Err(e) = access.stop_counters() {
        log::warn!("could not stop counters for group {}: {e}", group.name);
        return GroupOutcome::RunFailed;
    }

    // drain
    log::trace!(
        "measured {} metrics for {} threads for group {} ({window:?})",
        group.metrics.len(),
        topology.num_threads(),
        group.name
    );
    for thread in topology.threads() {
        for (m, metric) in group.metrics.iter_mut().enumerate() {
            let raw = access.last_metric(handle, m, thread.index);
            let outcome = pipeline.process(metric, thread, raw, topology, emitter);
            report.count(outcome);
        }
    }
    GroupOutcome::Measured
}
