use std::{path::Path, sync::mpsc, thread};

use anyhow::{Context, anyhow};
use clap::Parser;
use hpm::{Session, clock::SystemClock, control::Command as Notified};
use hpm_agent::{
    config::AgentConfig,
    control::{ControlMessage, SocketControl},
    init_logger,
    output::CsvDispatch,
};
use hpm_perf::PerfCounterAccess;

const BINARY: &str = env!("CARGO_BIN_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main agent function.
///
/// The steps are:
/// - parse the CLI
/// - parse the config file
/// - apply the settings from CLI and config file
/// - start the sampling session
/// - run the measurement cycles until the stop condition
///
/// About errors: we use `anyhow::Result` and `context` instead of `expect` to get
/// nicer error messages (`expect` prints errors with `Debug`).
fn main() -> anyhow::Result<()> {
    init_logger();

    let args = cli::Cli::parse();
    log::info!("Starting agent '{BINARY}' v{VERSION}");

    // Run CLI commands that run before the config is loaded.
    if run_command_no_config(&args)? {
        return Ok(());
    }

    let config_path = Path::new(&args.common.config);
    let mut config =
        AgentConfig::load(config_path, !args.common.no_default_config).context("could not load config file")?;
    apply_overrides(&args.common, &mut config);

    let sampler_config = config.sampler_config().context("invalid sampler config")?;
    if sampler_config.groups.is_empty() {
        return Err(anyhow!(
            "no counter group to measure, set sampler.Groups in {}",
            config_path.display()
        ));
    }

    let access = PerfCounterAccess::new(&config.agent.sysfs_cpu);
    let mut session = Session::init(sampler_config, access, SystemClock).context("startup failure")?;
    match toml::to_string(session.config()) {
        Ok(effective) => log::debug!("effective sampler config:\n{effective}"),
        Err(e) => log::warn!("could not print the sampler config: {e}"),
    }

    let mut output = match &config.agent.output_path {
        Some(path) => {
            CsvDispatch::file(path).with_context(|| format!("could not open output file {}", path.display()))?
        }
        None => CsvDispatch::stdout(),
    };

    let (tx, rx) = mpsc::channel();
    let control = match &config.agent.control_socket {
        Some(path) => Some(SocketControl::start_new(path, tx).context("could not start the control socket")?),
        None => {
            drop(tx);
            None
        }
    };

    let res = run(&mut session, &config, &mut output, &rx);

    if let Some(control) = control {
        control.stop();
        control.join();
    }
    session.shutdown();
    output.flush().context("could not flush the output")?;
    res
}

/// Runs the measurement cycles until a `shutdown` message or the cycle limit.
fn run(
    session: &mut Session<PerfCounterAccess, SystemClock>,
    config: &AgentConfig,
    output: &mut CsvDispatch,
    rx: &mpsc::Receiver<ControlMessage>,
) -> anyhow::Result<()> {
    let mut cycles = 0u64;
    loop {
        for msg in rx.try_iter() {
            match msg {
                ControlMessage::Shutdown => {
                    log::info!("shutdown requested");
                    return Ok(());
                }
                ControlMessage::Notify(notification) => match session.notify(&notification) {
                    Some(Notified::ResetCounters) => log::info!("counters reset"),
                    Some(Notified::Disable) => log::info!("sampling disabled"),
                    Some(Notified::Enable) => log::info!("sampling enabled"),
                    None => log::debug!("ignoring notification {notification:?}"),
                },
            }
        }

        if !session.is_enabled() {
            thread::sleep(config.agent.idle_interval);
            continue;
        }

        let report = session.read(&mut *output);
        log::debug!("cycle {cycles}: {report:?}");
        if config.agent.force_flush {
            output.flush().context("could not flush the output")?;
        }

        cycles += 1;
        if config.agent.cycles.is_some_and(|max| cycles >= max) {
            log::info!("{cycles} measurement cycles done, stopping");
            return Ok(());
        }
    }
}

/// If selected by the CLI user, runs a command that does not need the config file.
///
/// Returns `true` if a command was run (in which case you probably should stop here).
fn run_command_no_config(args: &cli::Cli) -> anyhow::Result<bool> {
    use cli::{Command, ConfigArgs, ConfigCommand};

    match args.command {
        Some(Command::Config(ConfigArgs {
            command: ConfigCommand::Regen,
        })) => {
            // (re)generate the default config
            let file = Path::new(&args.common.config);
            AgentConfig::default().save(file)?;
            log::info!("Default configuration file written to: {}", file.display());
            Ok(true)
        }
        Some(Command::Groups) => {
            println!("Available counter groups:");
            for group in hpm_perf::groups::catalog() {
                let metrics: Vec<&str> = group.metrics.iter().map(|m| m.name).collect();
                println!("- {}: {} [{}]", group.name, group.description, metrics.join(", "));
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Applies the CLI arguments on top of the config file.
fn apply_overrides(args: &cli::CommonArgs, config: &mut AgentConfig) {
    if let Some(output) = &args.output_file {
        config.agent.output_path = Some(output.into());
    }
    if let Some(socket) = &args.control_socket {
        config.agent.control_socket = Some(socket.into());
    }
    if let Some(cycles) = args.cycles {
        config.agent.cycles = Some(cycles);
    }
}

/// Agent command-line interface (CLI).
///
/// We use `clap` to parse these options, therefore the structs
/// derive [`clap::Args`] or other clap trait implementations.
mod cli {
    use clap::{Args, Parser, Subcommand};

    // NOTE: the doc comment attached to `Cli` is used by clap as the description of
    // the application. It is displayed at the start of the help message.

    /// Hardware performance counters agent: measure the counter groups on every cpu.
    #[derive(Parser)]
    #[command(version)]
    pub struct Cli {
        #[command(subcommand)]
        pub command: Option<Command>,

        #[command(flatten)]
        pub common: CommonArgs,
    }

    #[derive(Subcommand)]
    pub enum Command {
        /// Run the agent and monitor the system.
        ///
        /// This is the default command.
        Run,

        /// Manipulate the configuration.
        Config(ConfigArgs),

        /// Print the available counter groups and their metrics.
        Groups,
    }

    #[derive(Args)]
    pub struct ConfigArgs {
        #[command(subcommand)]
        pub command: ConfigCommand,
    }

    #[derive(Subcommand)]
    pub enum ConfigCommand {
        /// Regenerate the configuration file and stop.
        ///
        /// If the file exists, it will be overwritten.
        Regen,
    }

    /// Common CLI arguments.
    #[derive(Args, Clone)]
    pub struct CommonArgs {
        /// Path to the config file.
        #[arg(long, env = "HPM_CONFIG", default_value = "hpm-config.toml")]
        pub config: String,

        /// If set, the config file must exist, otherwise the agent will fail to start with an error.
        #[arg(long, default_value_t = false)]
        pub no_default_config: bool,

        /// Path to the CSV output file. Overrides `agent.output_path`.
        #[arg(long)]
        pub output_file: Option<String>,

        /// Path of the control socket. Overrides `agent.control_socket`.
        #[arg(long)]
        pub control_socket: Option<String>,

        /// Stop after this number of measurement cycles. Overrides `agent.cycles`.
        #[arg(long)]
        pub cycles: Option<u64>,
    }
}
