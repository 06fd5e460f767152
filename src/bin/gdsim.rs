//! Drive one guaranteed-delivery stream across a simulated lossy link.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use gd_rs::config::{self, Config};
use gd_rs::sim::{self, SimConfig};
use gd_rs::{Priority, Reliability, StreamKey, telemetry};

#[derive(Parser, Debug)]
#[command(
    name = "gdsim",
    version,
    about = "Guaranteed-delivery stream simulator",
    arg_required_else_help = true
)]
struct Cli {
    /// Config file (default: $GD_CONFIG or the user config dir).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// More log output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send messages over a lossy link and report how the stream recovered.
    Run(RunArgs),
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Tier {
    Reliable,
    ReliablePersistent,
    Assured,
}

impl From<Tier> for Reliability {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Reliable => Reliability::ReliableNonPersistent,
            Tier::ReliablePersistent => Reliability::ReliablePersistent,
            Tier::Assured => Reliability::AssuredPersistent,
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Values to send.
    #[arg(short = 'n', long, default_value_t = 100)]
    messages: u64,

    /// Percentage of control messages lost on every wire.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(0..=90))]
    loss: u8,

    #[arg(long, default_value_t = 1)]
    seed: u64,

    #[arg(long, value_enum, default_value_t = Tier::Assured)]
    tier: Tier,

    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(0..=9))]
    priority: u8,

    /// Route through an intermediate node.
    #[arg(long)]
    via_intermediate: bool,

    /// Virtual milliseconds per timer step.
    #[arg(long, default_value_t = 100)]
    step_ms: u64,

    #[arg(long, default_value_t = 100_000)]
    max_steps: u64,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref());
    let _telemetry = telemetry::init(telemetry::TelemetryConfig::new(cli.verbose, cfg.logging.clone()));

    match run(cli.command, cfg) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("error: {err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Config {
    let loaded = match path {
        Some(path) => config::load_from(path),
        None => config::load(),
    };
    loaded.unwrap_or_else(|err| {
        eprintln!("config load failed, using defaults: {err}");
        let mut cfg = Config::default();
        config::apply_env_overrides(&mut cfg);
        cfg
    })
}

fn run(command: Command, cfg: Config) -> gd_rs::Result<ExitCode> {
    match command {
        Command::Config => {
            let rendered = toml::to_string_pretty(&cfg).map_err(config::ConfigError::from)?;
            print!("{rendered}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => {
            let priority = Priority::new(args.priority)?;
            let sim_cfg = SimConfig {
                messages: args.messages,
                loss_percent: args.loss,
                seed: args.seed,
                key: StreamKey::new(priority, args.tier.into()),
                intermediate: args.via_intermediate,
                step_ms: args.step_ms.max(1),
                max_steps: args.max_steps,
            };
            let report = sim::run(cfg.gd, &sim_cfg)?;
            if args.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(err) => eprintln!("failed to render report: {err}"),
                }
            } else {
                println!(
                    "delivered {}/{} in_order={} flushed={} dropped={} virtual_ms={}",
                    report.delivered,
                    report.messages,
                    report.in_order,
                    report.flushed,
                    report.dropped,
                    report.virtual_ms
                );
            }
            let healthy = report.in_order && report.flushed;
            Ok(if healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
