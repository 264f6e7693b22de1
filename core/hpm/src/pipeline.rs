//! Processing of the raw metric values.
//!
//! Each value read from the counters goes through [`ValuePipeline::process`]:
//!
//! 1. non-finite values are dropped;
//! 2. per-socket values of a thread that does not represent its socket are dropped;
//! 3. values above the ceiling of the metric are dropped as outliers;
//! 4. FLOPS values are normalized to single precision, and summed across metrics
//!    if several FLOPS metrics exist;
//! 5. with per-core summarization, values are summed per physical core;
//! 6. the remaining values are submitted right away.
//!
//! Sums are submitted by [`ValuePipeline::flush`] once every group has been read.

use crate::emit::{Emitter, Stream};
use crate::registry::{Locality, Metric, MetricGroup, Registry};
use crate::topology::{HardwareThread, Topology};

/// Accumulators of one cycle.
///
/// The first value written to a slot is its initial value, the next ones are added to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slots(Vec<Option<f64>>);

impl Slots {
    pub fn new(len: usize) -> Self {
        Self(vec![None; len])
    }

    pub fn accumulate(&mut self, index: usize, value: f64) {
        let slot = &mut self.0[index];
        *slot = Some(match *slot {
            None => value,
            Some(sum) => sum + value,
        });
    }

    /// Returns the content of a slot and leaves it empty.
    pub fn take(&mut self, index: usize) -> Option<f64> {
        self.0[index].take()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0[index]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What happened to a raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Emitted,
    /// Stored in an accumulator, submitted at the end of the cycle.
    Accumulated,
    NotFinite,
    /// Per-socket value read on a thread that does not represent its socket.
    NotRepresentative,
    Outlier,
}

/// State of the value processing, kept across cycles.
#[derive(Debug)]
pub struct ValuePipeline {
    normalized_flops: Option<String>,
    /// Sum of the normalized FLOPS per thread (or per core), if several FLOPS metrics exist.
    flops_sum: Option<Slots>,
}

impl ValuePipeline {
    pub fn new(registry: &Registry, topology: &Topology) -> Self {
        let flops_sum = registry.summarize_flops().then(|| {
            let len = match topology.cores() {
                Some(cores) => cores.num_cores(),
                None => topology.num_threads(),
            };
            Slots::new(len)
        });
        Self {
            normalized_flops: registry.normalized_flops().map(String::from),
            flops_sum,
        }
    }

    /// Processes one raw value of `metric`, read on `thread`.
    pub fn process(
        &mut self,
        metric: &mut Metric,
        thread: &HardwareThread,
        raw: f64,
        topology: &Topology,
        emitter: &mut Emitter,
    ) -> Outcome {
        if !raw.is_finite() {
            return Outcome::NotFinite;
        }
        if metric.locality == Locality::PerSocket && !topology.has_socket_data(thread.index) {
            return Outcome::NotRepresentative;
        }
        if let Some(ceiling) = metric.ceiling {
            if raw > ceiling {
                log::info!("skipping outlier for {} ({}): {:.1}", metric.name, thread.index, raw);
                return Outcome::Outlier;
            }
        }

        let mut value = raw;
        let mut name = metric.name.as_str();
        if let Some(kind) = metric.flops {
            if let Some(normalized) = &self.normalized_flops {
                let multiplier = kind.multiplier();
                if multiplier > 1 && value > 0.0 {
                    value *= f64::from(multiplier);
                }
                name = normalized.as_str();
            }
            if let Some(sum) = &mut self.flops_sum {
                let index = match topology.cores() {
                    Some(cores) => cores.core_index(thread.index),
                    None => thread.index,
                };
                sum.accumulate(index, value);
                return Outcome::Accumulated;
            }
        }

        if let Some(cores) = topology.cores() {
            metric.per_core.accumulate(cores.core_index(thread.index), value);
            return Outcome::Accumulated;
        }

        emitter.submit(metric.locality.into(), name, thread.id, value);
        Outcome::Emitted
    }

    /// Submits the per-core and FLOPS sums of the cycle, and empties the accumulators.
    pub fn flush(&mut self, groups: &mut [MetricGroup], topology: &Topology, emitter: &mut Emitter) {
        if let Some(cores) = topology.cores() {
            for group in groups.iter_mut() {
                for core in 0..cores.num_cores() {
                    for metric in group.metrics.iter_mut() {
                        let mut name = metric.name.as_str();
                        if metric.flops.is_some() {
                            // submitted with the FLOPS sum below
                            if self.flops_sum.is_some() {
                                continue;
                            }
                            if let Some(normalized) = &self.normalized_flops {
                                name = normalized.as_str();
                            }
                        }
                        let sum = metric.per_core.take(core);
                        emitter.submit_slot(metric.locality.into(), name, cores.core_id(core), sum);
                    }
                }
            }
        }

        if let (Some(sum), Some(name)) = (&mut self.flops_sum, &self.normalized_flops) {
            for i in 0..sum.len() {
                let entity = match topology.cores() {
                    Some(cores) => cores.core_id(i),
                    None => topology.threads()[i].id,
                };
                emitter.submit_slot(Stream::Cpu, name, entity, sum.take(i));
            }
        }
    }

    /// Returns `true` if FLOPS metrics are summed.
    pub fn summarizes_flops(&self) -> bool {
        self.flops_sum.is_some()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Outcome, Slots, ValuePipeline};
    use crate::access::{CpuTopology, ThreadInfo};
    use crate::emit::{Emitter, Stream};
    use crate::registry::{FlopsKind, Locality, Metric, MetricGroup};
    use crate::tests::mocks::RecordingDispatch;
    use crate::time::CdTime;
    use crate::topology::Topology;

    fn metric(name: &str, locality: Locality, flops: Option<FlopsKind>, ceiling: Option<f64>, cores: usize) -> Metric {
        Metric {
            name: name.to_owned(),
            locality,
            flops,
            ceiling,
            per_core: Slots::new(cores),
        }
    }

    /// One socket, one core with two threads (ids 0 and 4).
    fn smt_core(per_core: bool) -> Topology {
        let cpu = CpuTopology {
            threads: vec![
                ThreadInfo { id: 0, socket: 0, core: 0 },
                ThreadInfo { id: 4, socket: 0, core: 0 },
            ],
        };
        Topology::resolve(&cpu, per_core).unwrap()
    }

    fn pipeline(normalized: Option<&str>, flops_slots: Option<usize>) -> ValuePipeline {
        ValuePipeline {
            normalized_flops: normalized.map(String::from),
            flops_sum: flops_slots.map(Slots::new),
        }
    }

    #[test]
    fn slots_first_write_then_add() {
        let mut slots = Slots::new(2);
        assert_eq!(slots.get(0), None);
        slots.accumulate(0, -3.0);
        slots.accumulate(0, 5.0);
        assert_eq!(slots.take(0), Some(2.0));
        assert_eq!(slots.take(0), None);
        assert_eq!(slots.get(1), None);
    }

    #[test]
    fn drops_invalid_values() {
        let topo = smt_core(false);
        let mut out = RecordingDispatch::default();
        let mut emitter = Emitter::new(&mut out, CdTime(0));
        let mut p = pipeline(None, None);
        let mut m = metric("mem_bw", Locality::PerSocket, None, Some(100.0), 0);
        let t0 = topo.threads()[0];
        let t1 = topo.threads()[1];

        assert_eq!(p.process(&mut m, &t0, f64::NAN, &topo, &mut emitter), Outcome::NotFinite);
        assert_eq!(p.process(&mut m, &t0, f64::INFINITY, &topo, &mut emitter), Outcome::NotFinite);
        assert_eq!(p.process(&mut m, &t1, 1.0, &topo, &mut emitter), Outcome::NotRepresentative);
        assert_eq!(p.process(&mut m, &t0, 100.5, &topo, &mut emitter), Outcome::Outlier);
        // the ceiling itself is accepted
        assert_eq!(p.process(&mut m, &t0, 100.0, &topo, &mut emitter), Outcome::Emitted);
        // negative values are legitimate readings
        assert_eq!(p.process(&mut m, &t0, -1.0, &topo, &mut emitter), Outcome::Emitted);
        drop(emitter);

        let values: Vec<(Stream, f64)> = out.records.iter().map(|r| (r.stream, r.value)).collect();
        assert_eq!(values, vec![(Stream::Socket, 100.0), (Stream::Socket, -1.0)]);
    }

    #[test]
    fn single_flops_metric_is_normalized_and_renamed() {
        let topo = smt_core(false);
        let mut out = RecordingDispatch::default();
        let mut emitter = Emitter::new(&mut out, CdTime(0));
        let mut p = pipeline(Some("flops_any"), None);
        let mut m = metric("flops_dp", Locality::PerCpu, Some(FlopsKind::Double), None, 0);
        let t = topo.threads()[1];

        p.process(&mut m, &t, 3.0, &topo, &mut emitter);
        p.process(&mut m, &t, -2.0, &topo, &mut emitter);
        drop(emitter);

        assert_eq!(out.records[0].metric, "flops_any");
        assert_eq!(out.records[0].entity, "4");
        assert_eq!(out.records[0].value, 6.0);
        // non-positive values are not multiplied
        assert_eq!(out.records[1].value, -2.0);
    }

    #[test]
    fn per_core_sum_resets_after_flush() {
        let topo = smt_core(true);
        let mut out = RecordingDispatch::default();
        let mut p = pipeline(None, None);
        let mut groups = vec![MetricGroup {
            name: "BRANCH".into(),
            handle: None,
            metrics: vec![metric("branch_rate", Locality::PerCpu, None, None, 1)],
        }];

        for (x, y) in [(1.5, 2.0), (3.0, 4.0)] {
            let mut emitter = Emitter::new(&mut out, CdTime(0));
            let (t0, t1) = (topo.threads()[0], topo.threads()[1]);
            let m = &mut groups[0].metrics[0];
            assert_eq!(p.process(m, &t0, x, &topo, &mut emitter), Outcome::Accumulated);
            assert_eq!(p.process(m, &t1, y, &topo, &mut emitter), Outcome::Accumulated);
            assert_eq!(emitter.emitted(), 0);
            p.flush(&mut groups, &topo, &mut emitter);
            assert_eq!(groups[0].metrics[0].per_core.get(0), None);
        }

        let values: Vec<(&str, f64)> = out.records.iter().map(|r| (r.entity.as_str(), r.value)).collect();
        assert_eq!(values, vec![("0", 3.5), ("0", 7.0)]);
    }
}
