use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use mtlipc_peer::{ConnectionConfig, LaunchConfig};
use mtlipc_transport::ProcessConfig;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod commands;
pub mod decode;
pub mod send;
pub mod stub;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch the controller, send one command and print the reply.
    Send(SendArgs),
    /// Launch the controller, resume it and print events until it exits.
    Watch(WatchArgs),
    /// Decode a captured frame stream.
    Decode(DecodeArgs),
    /// List command codes.
    Commands,
    /// Show version information.
    Version(VersionArgs),
    /// Act as a stand-in controller on stdin/stdout.
    Stub(StubArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => block_on(send::run(args, format)),
        Command::Watch(args) => block_on(watch::run(args, format)),
        Command::Decode(args) => decode::run(args, format),
        Command::Commands => commands::run(format),
        Command::Version(args) => version::run(args),
        Command::Stub(args) => stub::run(args),
    }
}

fn block_on<F>(future: F) -> CliResult<i32>
where
    F: std::future::Future<Output = CliResult<i32>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start async runtime", err))?;
    runtime.block_on(future)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum AiMode {
    On,
    Off,
}

/// Which controller to run and how to talk to it.
#[derive(Args, Debug, Default)]
pub struct RemoteArgs {
    /// Connection settings file (JSON).
    #[arg(long, value_name = "FILE", conflicts_with_all = ["database", "program"])]
    pub config: Option<PathBuf>,
    /// Debug database passed to mtldbg.
    #[arg(long, short = 'd', env = "MTLIPC_DATABASE", requires = "mugen")]
    pub database: Option<PathBuf>,
    /// MUGEN executable passed to mtldbg.
    #[arg(long, short = 'm', env = "MTLIPC_MUGEN", requires = "database")]
    pub mugen: Option<PathBuf>,
    /// Python interpreter with mtldbg installed.
    #[arg(long, env = "MTLIPC_PYTHON", default_value = "python")]
    pub python: PathBuf,
    /// Second player character.
    #[arg(long)]
    pub p2: Option<String>,
    /// Opponent AI.
    #[arg(long)]
    pub ai: Option<AiMode>,
    /// Run this controller instead of `python -m mtldbg`.
    #[arg(long, value_name = "PROGRAM", conflicts_with = "database")]
    pub program: Option<PathBuf>,
    /// Argument for --program (repeatable).
    #[arg(
        long = "arg",
        value_name = "ARG",
        requires = "program",
        allow_hyphen_values = true
    )]
    pub program_args: Vec<String>,
    /// Request timeout (e.g. 30s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Do not send CONTINUE after LAUNCH.
    #[arg(long)]
    pub stop_on_entry: bool,
}

impl RemoteArgs {
    pub fn connection_config(&self) -> CliResult<ConnectionConfig> {
        let mut config = if let Some(path) = &self.config {
            let text = std::fs::read_to_string(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
            serde_json::from_str::<ConnectionConfig>(&text).map_err(|err| {
                CliError::new(
                    DATA_INVALID,
                    format!("invalid connection config {}: {err}", path.display()),
                )
            })?
        } else {
            ConnectionConfig::new(self.process_config()?)
        };

        if let Some(timeout) = &self.timeout {
            config.request_timeout = Some(parse_duration(timeout)?);
        }
        if self.stop_on_entry {
            config.stop_on_entry = true;
        }
        Ok(config)
    }

    fn process_config(&self) -> CliResult<ProcessConfig> {
        if let Some(program) = &self.program {
            return Ok(ProcessConfig::new(program).args(self.program_args.iter().cloned()));
        }

        match (&self.database, &self.mugen) {
            (Some(database), Some(mugen)) => {
                let mut launch = LaunchConfig::new(database, mugen);
                launch.python = self.python.clone();
                launch.p2 = self.p2.clone();
                launch.ai = self.ai.map(|ai| ai == AiMode::On);
                Ok(launch.process_config())
            }
            _ => Err(CliError::new(
                USAGE,
                "no controller given: use --database and --mugen, --program, or --config",
            )),
        }
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,
    /// Command name or code (e.g. ipc-list-players, LAUNCH, 205).
    pub command: String,
    /// JSON parameters. Defaults to an empty JSON string.
    #[arg(long)]
    pub json: Option<String>,
    /// Exit non-zero when the reply is ERROR or EXCEPTION.
    #[arg(long)]
    pub check: bool,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// File holding raw frames, e.g. a capture of the controller's stdout.
    pub path: PathBuf,
    /// Largest payload accepted, in bytes.
    #[arg(long)]
    pub max_payload: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct StubArgs {
    /// Player id reported as the owner of breakpoint and step events.
    #[arg(long, default_value = "56")]
    pub owner: i64,
    /// Raise a breakpoint event after each CONTINUE.
    #[arg(long)]
    pub break_on_continue: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

fn ctrlc_error(err: ctrlc::Error) -> CliError {
    CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
}
