//! Agent configuration file.
//!
//! The file has two sections:
//! - `[agent]`: options of the agent itself (output, control socket, ...);
//! - `[sampler]`: the options of the sampler, with the same keys as [`hpm::Config::set`].
//!
//! ## Example
//!
//! ```toml
//! [agent]
//! output_path = "hpm.csv"
//! control_socket = "/run/hpm.sock"
//! idle_interval = "1s"
//!
//! [sampler]
//! Groups = ["BRANCH", "CPI"]
//! Mtime = 2.5
//! PerSocketMetrics = ["mem_bw"]
//! MaxValues = ["cpi:100", "ipc:20"]
//! PerCore = true
//! ```

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

/// Content of the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentOptions,
    /// Raw sampler options, converted by [`AgentConfig::sampler_config`].
    pub sampler: toml::Table,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentOptions {
    /// CSV file to write the values to. If not set, the values are written to stdout.
    pub output_path: Option<PathBuf>,
    /// Do we flush the output after each measurement cycle?
    pub force_flush: bool,
    /// Unix socket that accepts notifications, one per line.
    pub control_socket: Option<PathBuf>,
    /// How long to wait before checking for notifications again, while sampling is disabled.
    #[serde(with = "humantime_serde")]
    pub idle_interval: Duration,
    /// Stop after this number of measurement cycles.
    pub cycles: Option<u64>,
    /// Root of the cpu sysfs tree, used to discover the topology.
    pub sysfs_cpu: PathBuf,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            output_path: None,
            force_flush: true,
            control_socket: None,
            idle_interval: Duration::from_secs(1),
            cycles: None,
            sysfs_cpu: PathBuf::from(hpm_perf::topology::SYSFS_CPU),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let sampler = toml::Table::from_iter([
            (
                String::from("Groups"),
                toml::Value::Array(vec!["BRANCH".into(), "CPI".into()]),
            ),
            (String::from("Mtime"), toml::Value::Float(10.0)),
            (String::from("AccessMode"), toml::Value::Integer(-1)),
            (String::from("PerCore"), toml::Value::Boolean(false)),
            (String::from("Verbose"), toml::Value::Integer(1)),
        ]);
        Self {
            agent: AgentOptions::default(),
            sampler,
        }
    }
}

impl AgentConfig {
    /// Loads the configuration file.
    ///
    /// If the file does not exist and `write_default` is true, the default
    /// configuration is written to `path` and returned.
    pub fn load(path: &Path, write_default: bool) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                toml::from_str(&content).with_context(|| format!("invalid config file {}", path.display()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && write_default => {
                let config = Self::default();
                config.save(path)?;
                log::info!("Default configuration file written to: {}", path.display());
                Ok(config)
            }
            Err(e) => Err(e).with_context(|| format!("could not read config file {}", path.display())),
        }
    }

    /// Writes the configuration to a file, overwriting it if it exists.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("could not serialize the config")?;
        std::fs::write(path, content).with_context(|| format!("could not write config file {}", path.display()))
    }

    /// Converts the `[sampler]` section to key/value pairs.
    ///
    /// Strings are passed as-is, numbers are formatted, arrays are joined with `,`.
    /// A boolean `true` enables a flag, `false` omits the key.
    pub fn sampler_pairs(&self) -> anyhow::Result<Vec<(String, String)>> {
        fn scalar(key: &str, value: &toml::Value) -> anyhow::Result<String> {
            match value {
                toml::Value::String(s) => Ok(s.clone()),
                toml::Value::Integer(i) => Ok(i.to_string()),
                toml::Value::Float(f) => Ok(f.to_string()),
                other => Err(anyhow!("unsupported value for sampler option {key}: {other}")),
            }
        }

        let mut pairs = Vec::with_capacity(self.sampler.len());
        for (key, value) in &self.sampler {
            let value = match value {
                toml::Value::Boolean(false) => continue,
                toml::Value::Boolean(true) => String::new(),
                toml::Value::Array(items) => items
                    .iter()
                    .map(|v| scalar(key, v))
                    .collect::<anyhow::Result<Vec<_>>>()?
                    .join(","),
                v => scalar(key, v)?,
            };
            pairs.push((key.clone(), value));
        }
        Ok(pairs)
    }

    /// Builds the sampler configuration from the `[sampler]` section.
    pub fn sampler_config(&self) -> anyhow::Result<hpm::Config> {
        let mut config = hpm::Config::default();
        for (key, value) in self.sampler_pairs()? {
            config
                .set(&key, &value)
                .with_context(|| format!("invalid sampler option {key} = {value:?}"))?;
        }
        Ok(config)
    }
}
