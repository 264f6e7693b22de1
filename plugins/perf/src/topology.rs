//! Discovery of the cpu topology from sysfs.

use std::{
    fs,
    num::ParseIntError,
    path::Path,
};

use anyhow::{Context, anyhow};
use hpm::access::{CpuTopology, ThreadInfo};

/// Default root of the cpu sysfs tree.
pub const SYSFS_CPU: &str = "/sys/devices/system/cpu";

/// Reads the online cpus and their package and core ids.
///
/// The threads are returned in the order of the online list.
pub fn read_topology(sysfs_cpu: &Path) -> anyhow::Result<CpuTopology> {
    let online = sysfs_cpu.join("online");
    let list = fs::read_to_string(&online).with_context(|| format!("failed to read {}", online.display()))?;
    let cpus = parse_cpu_list(&list).with_context(|| format!("failed to parse {}", online.display()))?;

    let mut threads = Vec::with_capacity(cpus.len());
    for cpu in cpus {
        let dir = sysfs_cpu.join(format!("cpu{cpu}/topology"));
        let package_path = dir.join("physical_package_id");
        // the package id is -1 on some virtual machines
        let socket = u32::try_from(read_id(&package_path)?).unwrap_or_else(|_| {
            log::warn!("no package id in {}, using package 0", package_path.display());
            0
        });
        let core_path = dir.join("core_id");
        let core = read_id(&core_path)?;
        let core = u32::try_from(core).with_context(|| format!("invalid core id in {}: {core}", core_path.display()))?;
        threads.push(ThreadInfo { id: cpu, socket, core });
    }
    Ok(CpuTopology { threads })
}

fn read_id(path: &Path) -> anyhow::Result<i64> {
    let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    content
        .trim()
        .parse()
        .with_context(|| format!("invalid id in {}: {content:?}", path.display()))
}

/// Parses a list of cpus like `0-3,8,10-11`.
pub fn parse_cpu_list(cpulist: &str) -> anyhow::Result<Vec<u32>> {
    // handles "n" or "start-end"
    fn parse_item(item: &str) -> anyhow::Result<Vec<u32>> {
        let bounds: Vec<u32> = item
            .split('-')
            .map(str::parse)
            .collect::<Result<Vec<u32>, ParseIntError>>()?;

        match *bounds.as_slice() {
            [start, end] if start <= end => Ok((start..=end).collect()),
            [n] => Ok(vec![n]),
            _ => Err(anyhow!("invalid cpu list item: {item}")),
        }
    }

    let cpulist = cpulist.trim();
    if cpulist.is_empty() {
        return Ok(Vec::new());
    }
    let cpus = cpulist
        .split(',')
        .map(parse_item)
        .collect::<anyhow::Result<Vec<Vec<u32>>>>()?
        .into_iter()
        .flatten()
        .collect();
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use hpm::access::ThreadInfo;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::{parse_cpu_list, read_topology};

    fn write_cpu(root: &Path, cpu: u32, package: &str, core: &str) {
        let dir = root.join(format!("cpu{cpu}/topology"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("physical_package_id"), package).unwrap();
        fs::write(dir.join("core_id"), core).unwrap();
    }

    #[test]
    fn cpu_lists() -> anyhow::Result<()> {
        assert_eq!(parse_cpu_list("0")?, vec![0]);
        assert_eq!(parse_cpu_list("0,64\n")?, vec![0, 64]);
        assert_eq!(parse_cpu_list("0-3")?, vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("1-2,5,7-8")?, vec![1, 2, 5, 7, 8]);
        assert_eq!(parse_cpu_list("")?, Vec::<u32>::new());
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list("1-2-3").is_err());
        assert!(parse_cpu_list("a").is_err());
        Ok(())
    }

    #[test]
    fn sysfs_tree() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let root = tmp.path();
        fs::write(root.join("online"), "0-2,4\n")?;
        write_cpu(root, 0, "0\n", "0\n");
        write_cpu(root, 1, "1\n", "0\n");
        write_cpu(root, 2, "0\n", "1\n");
        // offline, not listed
        write_cpu(root, 3, "1\n", "1\n");
        write_cpu(root, 4, "-1\n", "2\n");

        let topo = read_topology(root)?;
        assert_eq!(
            topo.threads,
            vec![
                ThreadInfo { id: 0, socket: 0, core: 0 },
                ThreadInfo { id: 1, socket: 1, core: 0 },
                ThreadInfo { id: 2, socket: 0, core: 1 },
                ThreadInfo { id: 4, socket: 0, core: 2 },
            ]
        );
        Ok(())
    }

    #[test]
    fn negative_core_id() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        fs::write(tmp.path().join("online"), "0")?;
        write_cpu(tmp.path(), 0, "0\n", "-1\n");
        let err = read_topology(tmp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("core_id"), "{err:#}");
        Ok(())
    }

    #[test]
    fn missing_topology_file() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        fs::write(tmp.path().join("online"), "0-1")?;
        write_cpu(tmp.path(), 0, "0", "0");
        let err = read_topology(tmp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("cpu1"), "{err:#}");
        Ok(())
    }
}
