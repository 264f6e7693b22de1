//! Catalog of the counter groups and of their derived metrics.

use std::time::Duration;

use perf_event::events::Hardware;

/// A hardware event counted by a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwEvent {
    Instructions,
    Cycles,
    RefCycles,
    Branches,
    BranchMisses,
    CacheReferences,
    CacheMisses,
}

impl HwEvent {
    pub fn hardware(self) -> Hardware {
        match self {
            HwEvent::Instructions => Hardware::INSTRUCTIONS,
            HwEvent::Cycles => Hardware::CPU_CYCLES,
            HwEvent::RefCycles => Hardware::REF_CPU_CYCLES,
            HwEvent::Branches => Hardware::BRANCH_INSTRUCTIONS,
            HwEvent::BranchMisses => Hardware::BRANCH_MISSES,
            HwEvent::CacheReferences => Hardware::CACHE_REFERENCES,
            HwEvent::CacheMisses => Hardware::CACHE_MISSES,
        }
    }
}

/// How a metric is derived from the raw counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Formula {
    /// `numerator / denominator`
    Ratio(HwEvent, HwEvent),
    /// `count * scale / seconds`
    Rate(HwEvent, f64),
    /// Duration of the measurement, in seconds.
    Runtime,
}

impl Formula {
    /// Computes the metric. A missing count or a zero denominator gives NaN.
    pub fn compute(&self, count: impl Fn(HwEvent) -> Option<u64>, elapsed: Duration) -> f64 {
        fn ratio(num: Option<u64>, den: Option<f64>) -> f64 {
            match (num, den) {
                (Some(n), Some(d)) if d != 0.0 => n as f64 / d,
                _ => f64::NAN,
            }
        }
        match *self {
            Formula::Ratio(num, den) => ratio(count(num), count(den).map(|d| d as f64)),
            Formula::Rate(event, scale) => ratio(count(event), Some(elapsed.as_secs_f64())) * scale,
            Formula::Runtime => elapsed.as_secs_f64(),
        }
    }
}

#[derive(Debug)]
pub struct MetricDef {
    pub name: &'static str,
    pub formula: Formula,
}

/// A named counter group.
#[derive(Debug)]
pub struct GroupDef {
    pub name: &'static str,
    pub description: &'static str,
    pub events: &'static [HwEvent],
    pub metrics: &'static [MetricDef],
}

use Formula::*;
use HwEvent::*;

const CATALOG: &[GroupDef] = &[
    GroupDef {
        name: "BRANCH",
        description: "Branch prediction miss rate/ratio",
        events: &[Instructions, Branches, BranchMisses],
        metrics: &[
            MetricDef {
                name: "branch_rate",
                formula: Ratio(Branches, Instructions),
            },
            MetricDef {
                name: "branch_misprediction_rate",
                formula: Ratio(BranchMisses, Instructions),
            },
            MetricDef {
                name: "branch_misprediction_ratio",
                formula: Ratio(BranchMisses, Branches),
            },
            MetricDef {
                name: "instructions_per_branch",
                formula: Ratio(Instructions, Branches),
            },
        ],
    },
    GroupDef {
        name: "CPI",
        description: "Cycles per instruction",
        events: &[Instructions, Cycles, RefCycles],
        metrics: &[
            MetricDef {
                name: "runtime",
                formula: Runtime,
            },
            MetricDef {
                name: "clock_mhz",
                formula: Rate(Cycles, 1e-6),
            },
            MetricDef {
                name: "cpi",
                formula: Ratio(Cycles, Instructions),
            },
            MetricDef {
                name: "ipc",
                formula: Ratio(Instructions, Cycles),
            },
        ],
    },
    GroupDef {
        name: "CACHE",
        description: "Last level cache requests and misses",
        events: &[Instructions, CacheReferences, CacheMisses],
        metrics: &[
            MetricDef {
                name: "cache_request_rate",
                formula: Ratio(CacheReferences, Instructions),
            },
            MetricDef {
                name: "cache_miss_rate",
                formula: Ratio(CacheMisses, Instructions),
            },
            MetricDef {
                name: "cache_miss_ratio",
                formula: Ratio(CacheMisses, CacheReferences),
            },
        ],
    },
];

/// Returns every group of the catalog.
pub fn catalog() -> &'static [GroupDef] {
    CATALOG
}

/// Finds a group by name, ignoring case.
pub fn find(name: &str) -> Option<&'static GroupDef> {
    CATALOG.iter().find(|g| g.name.eq_ignore_ascii_case(name.trim()))
}
