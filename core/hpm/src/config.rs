//! Sampler configuration.
//!
//! The configuration is a typed [`Config`], filled from string key/value pairs
//! by [`Config::set`]. Keys are matched case-insensitively against a static
//! table. A value that does not parse is rejected as a whole, and the previous
//! setting of that key is kept.
//!
//! | Key | Value |
//! |---|---|
//! | `Groups` | comma-separated counter group names, in measurement order |
//! | `PerSocketMetrics` | comma-separated prefixes of per-socket metric names |
//! | `MaxValues` | comma-separated `metric:ceiling` pairs |
//! | `NormalizeFlops` | name of the normalized FLOPS metric |
//! | `AccessMode` | `0` direct, `1` access daemon, `-1` perf_event |
//! | `Mtime` | measurement time per group, in seconds (fractional) |
//! | `PerCore` | flag, sums hardware threads to physical cores |
//! | `Verbose` | verbosity of the counter access layer |

use std::time::Duration;

use serde::Serialize;

use crate::access::AccessMode;
use crate::error::ConfigError;

/// Default name of the normalized FLOPS metric.
pub const DEFAULT_NORMALIZED_FLOPS: &str = "flops_any";

/// Number of leading characters compared when matching per-socket prefixes.
pub const DEFAULT_SOCKET_PREFIX_LEN: usize = 6;

/// Configuration of a sampling session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    /// Counter groups to measure, in order.
    pub groups: Vec<String>,
    /// Metrics whose name matches one of these prefixes are per-socket metrics.
    pub per_socket_metrics: Vec<String>,
    /// How many characters of a per-socket prefix are compared.
    pub socket_prefix_len: usize,
    /// User-defined ceilings, the longest matching prefix wins.
    pub max_values: Vec<MaxValue>,
    /// If set, FLOPS metrics are normalized to single precision under this name.
    pub normalize_flops: Option<String>,
    /// How the counter registers are accessed.
    pub access_mode: AccessMode,
    /// Duration of the measurement window of each group.
    #[serde(with = "humantime_serde")]
    pub measure_time: Duration,
    /// Sum the values of the hardware threads of each physical core.
    pub per_core: bool,
    /// Verbosity of the counter access layer.
    pub verbose: i32,
}

/// Maximum plausible value of the metrics that start with `prefix`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaxValue {
    pub prefix: String,
    pub ceiling: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            per_socket_metrics: Vec::new(),
            socket_prefix_len: DEFAULT_SOCKET_PREFIX_LEN,
            max_values: Vec::new(),
            normalize_flops: None,
            access_mode: AccessMode::Direct,
            measure_time: Duration::from_secs(10),
            per_core: false,
            verbose: 1,
        }
    }
}

type Setter = fn(&mut Config, &str) -> Result<(), ConfigError>;

/// Configuration keys and their setters.
const KEYS: &[(&str, Setter)] = &[
    ("NormalizeFlops", set_normalize_flops),
    ("AccessMode", set_access_mode),
    ("Mtime", set_measure_time),
    ("Groups", set_groups),
    ("PerSocketMetrics", set_per_socket_metrics),
    ("MaxValues", set_max_values),
    ("PerCore", set_per_core),
    ("Verbose", set_verbose),
];

impl Config {
    /// Applies a configuration key.
    ///
    /// Unknown keys are rejected with [`ConfigError::UnknownKey`].
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let (_, setter) = KEYS
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .ok_or_else(|| ConfigError::UnknownKey(key.to_owned()))?;
        setter(self, value)
    }

    /// Builds a configuration from key/value pairs, applied in order.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        for (key, value) in pairs {
            config.set(key, value)?;
        }
        Ok(config)
    }

    /// Returns the names of the accepted keys.
    pub fn keys() -> impl Iterator<Item = &'static str> {
        KEYS.iter().map(|(k, _)| *k)
    }
}

/// Splits a comma-separated list, skipping empty items.
fn split_list(key: &'static str, value: &str) -> Result<Vec<String>, ConfigError> {
    let items: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if items.is_empty() {
        return Err(ConfigError::EmptyValue(key));
    }
    Ok(items)
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: value.to_owned(),
    })
}

fn set_normalize_flops(config: &mut Config, value: &str) -> Result<(), ConfigError> {
    let name = value.trim();
    if name.is_empty() {
        return Err(ConfigError::EmptyValue("NormalizeFlops"));
    }
    log::info!("normalize FLOPS to single precision ({name})");
    config.normalize_flops = Some(name.to_owned());
    Ok(())
}

fn set_access_mode(config: &mut Config, value: &str) -> Result<(), ConfigError> {
    let mode: i32 = parse_number("AccessMode", value)?;
    config.access_mode = AccessMode::try_from(mode)?;
    Ok(())
}

fn set_measure_time(config: &mut Config, value: &str) -> Result<(), ConfigError> {
    let secs: f64 = parse_number("Mtime", value)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidMeasureTime(secs));
    }
    config.measure_time = Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidMeasureTime(secs))?;
    log::info!("measure each metric group for {secs:.3} sec");
    Ok(())
}

fn set_groups(config: &mut Config, value: &str) -> Result<(), ConfigError> {
    let groups = split_list("Groups", value)?;
    for g in &groups {
        log::info!("found group: {g}");
    }
    config.groups = groups;
    Ok(())
}

fn set_per_socket_metrics(config: &mut Config, value: &str) -> Result<(), ConfigError> {
    let metrics = split_list("PerSocketMetrics", value)?;
    for m in &metrics {
        log::info!("found per socket metric: {m}");
    }
    config.per_socket_metrics = metrics;
    Ok(())
}

fn set_max_values(config: &mut Config, value: &str) -> Result<(), ConfigError> {
    let entries = split_list("MaxValues", value)?;
    let mut max_values = Vec::with_capacity(entries.len());
    for entry in entries {
        let (prefix, ceiling) = entry.split_once(':').ok_or_else(|| ConfigError::MissingSeparator {
            key: "MaxValues",
            entry: entry.clone(),
        })?;
        let ceiling: f64 = parse_number("MaxValues", ceiling)?;
        max_values.push(MaxValue {
            prefix: prefix.trim().to_owned(),
            ceiling,
        });
    }
    for m in &max_values {
        log::info!("skip {} values > {:.2}", m.prefix, m.ceiling);
    }
    config.max_values = max_values;
    Ok(())
}

fn set_per_core(config: &mut Config, _value: &str) -> Result<(), ConfigError> {
    config.per_core = true;
    Ok(())
}

fn set_verbose(config: &mut Config, value: &str) -> Result<(), ConfigError> {
    config.verbose = parse_number("Verbose", value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{Config, MaxValue};
    use crate::{access::AccessMode, error::ConfigError};

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.measure_time, Duration::from_secs(10));
        assert_eq!(config.verbose, 1);
        assert_eq!(config.access_mode, AccessMode::Direct);
        assert_eq!(config.socket_prefix_len, 6);
        assert!(!config.per_core);
        assert!(config.normalize_flops.is_none());
        assert!(config.groups.is_empty());
    }

    #[test]
    fn all_keys() -> anyhow::Result<()> {
        let config = Config::from_pairs([
            ("Groups", "BRANCH,FLOPS_DP, MEM"),
            ("PerSocketMetrics", "mem_bw,rapl_power"),
            ("MaxValues", "flops:1e12,mem_bw:5000"),
            ("NormalizeFlops", "flops_any"),
            ("AccessMode", "-1"),
            ("Mtime", "0.5"),
            ("PerCore", ""),
            ("Verbose", "3"),
        ])?;
        assert_eq!(config.groups, vec!["BRANCH", "FLOPS_DP", "MEM"]);
        assert_eq!(config.per_socket_metrics, vec!["mem_bw", "rapl_power"]);
        assert_eq!(
            config.max_values,
            vec![
                MaxValue {
                    prefix: "flops".into(),
                    ceiling: 1e12
                },
                MaxValue {
                    prefix: "mem_bw".into(),
                    ceiling: 5000.0
                },
            ]
        );
        assert_eq!(config.normalize_flops.as_deref(), Some("flops_any"));
        assert_eq!(config.access_mode, AccessMode::PerfEvent);
        assert_eq!(config.measure_time, Duration::from_millis(500));
        assert!(config.per_core);
        assert_eq!(config.verbose, 3);
        Ok(())
    }

    #[test]
    fn keys_are_case_insensitive() {
        let mut config = Config::default();
        config.set("groups", "CPI").unwrap();
        config.set("MTIME", "2").unwrap();
        assert_eq!(config.groups, vec!["CPI"]);
        assert_eq!(config.measure_time, Duration::from_secs(2));
    }

    #[test]
    fn unknown_key() {
        let mut config = Config::default();
        let err = config.set("Interval", "10").unwrap_err();
        assert_eq!(err, ConfigError::UnknownKey("Interval".into()));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn max_values_without_separator_keeps_previous_state() {
        let mut config = Config::default();
        config.set("MaxValues", "ipc:10").unwrap();
        let err = config.set("MaxValues", "flops:100,mem_bw").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSeparator { .. }));
        assert_eq!(
            config.max_values,
            vec![MaxValue {
                prefix: "ipc".into(),
                ceiling: 10.0
            }]
        );
    }

    #[test]
    fn empty_values_are_rejected() {
        let mut config = Config::default();
        assert_eq!(config.set("MaxValues", ""), Err(ConfigError::EmptyValue("MaxValues")));
        assert_eq!(config.set("Groups", " , "), Err(ConfigError::EmptyValue("Groups")));
        assert_eq!(
            config.set("NormalizeFlops", ""),
            Err(ConfigError::EmptyValue("NormalizeFlops"))
        );
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_numbers() {
        let mut config = Config::default();
        assert!(matches!(
            config.set("Mtime", "ten"),
            Err(ConfigError::InvalidNumber { key: "Mtime", .. })
        ));
        assert_eq!(config.set("Mtime", "0"), Err(ConfigError::InvalidMeasureTime(0.0)));
        assert_eq!(config.set("Mtime", "1e300"), Err(ConfigError::InvalidMeasureTime(1e300)));
        assert_eq!(config.set("AccessMode", "7"), Err(ConfigError::InvalidAccessMode(7)));
        assert!(config.set("MaxValues", "ipc:high").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn key_names() {
        let keys: Vec<_> = Config::keys().collect();
        assert_eq!(keys.len(), 8);
        assert!(keys.contains(&"PerSocketMetrics"));
    }
}
