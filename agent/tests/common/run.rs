use anyhow::Context;
use assert_cmd::cargo::{CargoError, CommandCargoExt};
use std::{
    path::Path,
    process::{Command, ExitStatus, Output},
};

/// Constructs a `Command` that execute a binary.
///
/// This does NOT call `cargo run`, see [`assert_cmd::Command::cargo_bin`].
pub fn command_run_agent(binary: &str, bin_args: &[&str]) -> Result<Command, CargoError> {
    let mut cmd = Command::cargo_bin(binary)?;
    cmd.args(bin_args).env_remove("HPM_CONFIG");
    Ok(cmd)
}

/// Executes an agent binary with the given arguments, and returns its exit status.
///
/// The stdout and stderr are inherited from the current process.
pub fn run_agent(binary: &str, bin_args: &[&str], workdir: &Path) -> anyhow::Result<ExitStatus> {
    let mut cmd = command_run_agent(binary, bin_args)?;
    cmd.current_dir(workdir)
        .status()
        .with_context(|| format!("could not run process {cmd:?}"))
}

/// Executes an agent binary in `workdir` and captures its output.
///
/// The captured stdout and stderr are also printed, to help debugging failed tests.
pub fn run_agent_output(binary: &str, bin_args: &[&str], workdir: &Path) -> anyhow::Result<Output> {
    let mut cmd = command_run_agent(binary, bin_args)?;
    let output = cmd
        .current_dir(workdir)
        .output()
        .with_context(|| format!("could not run process {cmd:?}"))?;
    println!("{}", String::from_utf8_lossy(&output.stdout));
    eprintln!("{}", String::from_utf8_lossy(&output.stderr));
    Ok(output)
}

/// Returns stdout and stderr as a single string.
pub fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}
