//! Counter groups and the classification of their metrics.

use std::collections::HashSet;

use serde::Serialize;

use crate::access::{CounterAccess, GroupHandle};
use crate::config::{Config, MaxValue};
use crate::pipeline::Slots;

/// Prefix of the FLOPS metrics.
const FLOPS_PREFIX: &str = "flops";
/// Position of the precision marker in a FLOPS metric name, after `flops_`.
const FLOPS_MARKER_POS: usize = 6;

/// Whether a metric is measured per hardware thread or per socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Locality {
    PerCpu,
    PerSocket,
}

/// Precision of a FLOPS metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlopsKind {
    /// Already single precision, or unknown precision.
    Single,
    /// Double precision, one operation counts as two single precision operations.
    Double,
    /// Vector (AVX), one operation counts as four single precision operations.
    Vector,
}

impl FlopsKind {
    /// Factor that converts the metric to single precision FLOPS.
    pub fn multiplier(self) -> u8 {
        match self {
            FlopsKind::Single => 1,
            FlopsKind::Double => 2,
            FlopsKind::Vector => 4,
        }
    }
}

/// A derived metric of a counter group.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub locality: Locality,
    /// `None` if this is not a FLOPS metric (or if normalization is disabled).
    pub flops: Option<FlopsKind>,
    /// Values above the ceiling are outliers, `None` accepts every finite value.
    pub ceiling: Option<f64>,
    /// Per-core sums of the current cycle, empty unless per-core summarization is active.
    pub(crate) per_core: Slots,
}

/// A counter group requested by the configuration.
#[derive(Debug, Clone)]
pub struct MetricGroup {
    pub name: String,
    /// `None` if the group could not be resolved, in which case it is skipped every cycle.
    pub handle: Option<GroupHandle>,
    pub metrics: Vec<Metric>,
}

/// The counter groups and their metrics.
#[derive(Debug, Clone)]
pub struct Registry {
    groups: Vec<MetricGroup>,
    normalized_flops: Option<String>,
    summarize_flops: bool,
}

impl Registry {
    /// Resolves the configured groups and classifies their metrics.
    ///
    /// A group that fails to resolve is disabled, the other ones are unaffected.
    /// `num_cores` is the number of cores when per-core summarization is active.
    pub fn setup<A: CounterAccess + ?Sized>(config: &Config, access: &mut A, num_cores: Option<usize>) -> Self {
        log::info!("setup {} metric group(s)", config.groups.len());

        let default_ceiling = access.counter_width().and_then(counter_limit);
        if let (Some(width), Some(limit)) = (access.counter_width(), default_ceiling) {
            log::info!("metric max value ({width} bits): {limit}");
        }

        let canonical = config.normalize_flops.as_deref();
        let mut groups = Vec::with_capacity(config.groups.len());
        let mut flops_metrics = HashSet::new();

        for name in &config.groups {
            let handle = match access.add_group(name) {
                Ok(handle) => handle,
                Err(e) => {
                    log::info!("failed to add group {name}: {e}");
                    groups.push(MetricGroup {
                        name: name.clone(),
                        handle: None,
                        metrics: Vec::new(),
                    });
                    continue;
                }
            };

            let num_metrics = access.metric_count(handle);
            if num_metrics == 0 {
                log::warn!("group {name} has no metrics!");
            }

            let mut metrics = Vec::with_capacity(num_metrics);
            for m in 0..num_metrics {
                let Some(metric_name) = access.metric_name(handle, m) else {
                    log::warn!("group {name} has no name for metric {m}, using an empty name");
                    metrics.push(Self::new_metric(String::new(), config, None, default_ceiling, num_cores));
                    continue;
                };
                let flops = canonical.and_then(|c| classify_flops(&metric_name, c));
                if flops.is_some() {
                    flops_metrics.insert(metric_name.clone());
                }
                metrics.push(Self::new_metric(metric_name, config, flops, default_ceiling, num_cores));
            }

            groups.push(MetricGroup {
                name: name.clone(),
                handle: Some(handle),
                metrics,
            });
        }

        // Several distinct FLOPS metrics are summed into one normalized value. With a single
        // FLOPS metric, even if measured by several groups, it is only renamed (and scaled).
        let summarize_flops = flops_metrics.len() > 1;
        if summarize_flops {
            log::info!("different FLOPS are aggregated");
        }

        Self {
            groups,
            normalized_flops: canonical.map(String::from),
            summarize_flops,
        }
    }

    fn new_metric(
        name: String,
        config: &Config,
        flops: Option<FlopsKind>,
        default_ceiling: Option<f64>,
        num_cores: Option<usize>,
    ) -> Metric {
        let locality = classify_locality(&name, &config.per_socket_metrics, config.socket_prefix_len);
        let ceiling = ceiling_for(&name, &config.max_values, default_ceiling);
        Metric {
            name,
            locality,
            flops,
            ceiling,
            per_core: Slots::new(num_cores.unwrap_or(0)),
        }
    }

    pub fn groups(&self) -> &[MetricGroup] {
        &self.groups
    }

    pub(crate) fn groups_mut(&mut self) -> &mut [MetricGroup] {
        &mut self.groups
    }

    /// Handles of the groups that have been resolved.
    pub fn resolved(&self) -> impl Iterator<Item = (&str, GroupHandle)> {
        self.groups
            .iter()
            .filter_map(|g| g.handle.map(|h| (g.name.as_str(), h)))
    }

    /// Name of the normalized FLOPS metric, if normalization is enabled.
    pub fn normalized_flops(&self) -> Option<&str> {
        self.normalized_flops.as_deref()
    }

    /// Returns `true` if several FLOPS metrics are summed into the normalized metric.
    pub fn summarize_flops(&self) -> bool {
        self.summarize_flops
    }
}

/// Returns `true` if the first `n` characters of `a` and `b` are equal,
/// where a shorter string only equals a string of the same length.
fn eq_first_n(a: &str, b: &str, n: usize) -> bool {
    a.bytes().take(n).eq(b.bytes().take(n))
}

/// Per-socket metrics are the ones that match a configured prefix, on its first `prefix_len` characters.
pub fn classify_locality(metric: &str, per_socket_prefixes: &[String], prefix_len: usize) -> Locality {
    if per_socket_prefixes.iter().any(|p| eq_first_n(p, metric, prefix_len)) {
        Locality::PerSocket
    } else {
        Locality::PerCpu
    }
}

/// Determines the FLOPS precision of a metric from its name.
///
/// Returns `None` for non-FLOPS metrics, and for the metric that is already named
/// like the normalized metric.
pub fn classify_flops(metric: &str, normalized_name: &str) -> Option<FlopsKind> {
    if !metric.starts_with(FLOPS_PREFIX) {
        return None;
    }
    if metric == normalized_name {
        log::info!("found metric {metric}, no normalization needed");
        return None;
    }
    let marker = metric.get(FLOPS_MARKER_POS..).unwrap_or("");
    if marker.starts_with("dp") {
        Some(FlopsKind::Double)
    } else if marker.starts_with("avx") {
        Some(FlopsKind::Vector)
    } else {
        Some(FlopsKind::Single)
    }
}

/// Finds the ceiling of a metric: the user value with the longest matching prefix,
/// or the default ceiling.
pub fn ceiling_for(metric: &str, max_values: &[MaxValue], default: Option<f64>) -> Option<f64> {
    max_values
        .iter()
        .filter(|m| metric.starts_with(&m.prefix))
        .fold(None::<&MaxValue>, |best, m| match best {
            Some(b) if b.prefix.len() > m.prefix.len() => Some(b),
            _ => Some(m),
        })
        .map(|m| m.ceiling)
        .or(default)
}

/// Largest value of a counter of the given bit width.
pub fn counter_limit(width: u32) -> Option<f64> {
    match width {
        0 => None,
        64.. => Some(u64::MAX as f64),
        w => Some(((1u64 << w) - 1) as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mocks::{FakeAccess, cpu};

    fn max(prefix: &str, ceiling: f64) -> MaxValue {
        MaxValue {
            prefix: prefix.to_owned(),
            ceiling,
        }
    }

    #[test]
    fn locality_by_prefix() {
        let prefixes = vec!["mem_bw".to_owned(), "rapl_power".to_owned()];
        assert_eq!(classify_locality("mem_bw", &prefixes, 6), Locality::PerSocket);
        assert_eq!(classify_locality("mem_bw_read", &prefixes, 6), Locality::PerSocket);
        // only the first 6 characters are compared
        assert_eq!(classify_locality("rapl_pkg", &prefixes, 6), Locality::PerSocket);
        assert_eq!(classify_locality("ipc", &prefixes, 6), Locality::PerCpu);
        assert_eq!(classify_locality("mem_b", &prefixes, 6), Locality::PerCpu);
    }

    #[test]
    fn short_prefix_only_matches_exact_name() {
        let prefixes = vec!["mem".to_owned()];
        assert_eq!(classify_locality("mem", &prefixes, 6), Locality::PerSocket);
        assert_eq!(classify_locality("mem_bw", &prefixes, 6), Locality::PerCpu);
    }

    #[test]
    fn flops_classification() {
        assert_eq!(classify_flops("flops_dp", "flops_any"), Some(FlopsKind::Double));
        assert_eq!(classify_flops("flops_avx", "flops_any"), Some(FlopsKind::Vector));
        assert_eq!(classify_flops("flops_sp", "flops_any"), Some(FlopsKind::Single));
        assert_eq!(classify_flops("flops", "flops_any"), Some(FlopsKind::Single));
        assert_eq!(classify_flops("flops_any", "flops_any"), None);
        assert_eq!(classify_flops("ipc", "flops_any"), None);
        assert_eq!(FlopsKind::Double.multiplier(), 2);
        assert_eq!(FlopsKind::Vector.multiplier(), 4);
    }

    #[test]
    fn longest_prefix_ceiling() {
        let table = vec![max("flops", 100.0), max("flops_dp", 50.0), max("mem", 10.0)];
        assert_eq!(ceiling_for("flops_dp", &table, None), Some(50.0));
        assert_eq!(ceiling_for("flops_sp", &table, None), Some(100.0));
        assert_eq!(ceiling_for("ipc", &table, Some(7.0)), Some(7.0));
        assert_eq!(ceiling_for("ipc", &table, None), None);
    }

    #[test]
    fn flops_summation_counts_distinct_metrics() {
        let config = Config::from_pairs([("Groups", "FLOPS_DP,FLOPS_DP"), ("NormalizeFlops", "flops_any")]).unwrap();
        let mut access = FakeAccess::new(cpu(&[(0, 0, 0)])).group("FLOPS_DP", &["flops_dp"]);
        let registry = Registry::setup(&config, &mut access, None);
        assert_eq!(registry.groups().len(), 2);
        assert!(!registry.summarize_flops());

        let config = Config::from_pairs([("Groups", "FLOPS_DP,FLOPS_AVX"), ("NormalizeFlops", "flops_any")]).unwrap();
        let mut access = FakeAccess::new(cpu(&[(0, 0, 0)]))
            .group("FLOPS_DP", &["flops_dp"])
            .group("FLOPS_AVX", &["flops_avx"]);
        let registry = Registry::setup(&config, &mut access, None);
        assert!(registry.summarize_flops());
    }

    #[test]
    fn limits() {
        assert_eq!(counter_limit(0), None);
        assert_eq!(counter_limit(8), Some(255.0));
        assert_eq!(counter_limit(48), Some(((1u64 << 48) - 1) as f64));
        assert_eq!(counter_limit(64), Some(u64::MAX as f64));
    }
}
