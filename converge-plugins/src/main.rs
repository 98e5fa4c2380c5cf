//! converge: run one idempotent plugin and print its result record.
//!
//! The parameter record is read as JSON from a file or stdin. Exactly one
//! JSON result record goes to stdout; logs go to stderr.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use converge_plugins::clients::{CronFile, FixtureCloud, SystemCrontab};
use converge_plugins::params;
use converge_plugins::plugins::{cron, dns, vpc};
use converge_plugins::{ErrorInfo, Outcome, PluginError, PluginResult};

/// Declarative, idempotent infrastructure plugins
#[derive(Parser, Debug)]
#[command(name = "converge", version, about)]
struct Args {
    /// JSON file backing the fixture cloud provider
    #[arg(long, env = "CONVERGE_STATE_FILE", default_value = "converge-cloud.json", global = true)]
    state_file: PathBuf,

    /// Region passed to the cloud provider
    #[arg(long, env = "CONVERGE_REGION", default_value = "local-1", global = true)]
    region: String,

    /// Report what would change without changing anything
    #[arg(long, global = true)]
    check: bool,

    /// Log filter, used when RUST_LOG is unset
    #[arg(long, default_value = "converge=info", global = true)]
    log_level: String,

    #[command(subcommand)]
    plugin: Plugin,
}

#[derive(Subcommand, Debug)]
enum Plugin {
    /// VPC with subnets, internet gateway and route tables
    Vpc(PluginArgs),
    /// Hosted DNS domain and its records
    Dns(PluginArgs),
    /// Named jobs in a crontab or cron.d file
    Cron(PluginArgs),
}

#[derive(clap::Args, Debug)]
struct PluginArgs {
    /// Parameter record (JSON file, or - for stdin)
    #[arg(long, default_value = "-")]
    params: String,
}

impl Plugin {
    fn name(&self) -> &'static str {
        match self {
            Self::Vpc(_) => "vpc",
            Self::Dns(_) => "dns",
            Self::Cron(_) => "cron",
        }
    }

    fn args(&self) -> &PluginArgs {
        match self {
            Self::Vpc(args) | Self::Dns(args) | Self::Cron(args) => args,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let result = execute(&args);
    if result.failed {
        error!(
            plugin = args.plugin.name(),
            msg = result.msg.as_deref().unwrap_or_default(),
            "Plugin failed"
        );
    } else {
        info!(plugin = args.plugin.name(), changed = result.changed, "Plugin finished");
    }

    match serde_json::to_string(&result) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!(error = %e, "Failed to encode result");
            return ExitCode::FAILURE;
        }
    }

    if result.failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn read_params(source: &str) -> Result<Value> {
    let raw = if source == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read parameters from stdin")?;
        raw
    } else {
        fs::read_to_string(source).with_context(|| format!("Failed to read {}", source))?
    };
    serde_json::from_str(&raw).context("Parameters are not valid JSON")
}

fn rejected(err: PluginError) -> PluginResult {
    PluginResult::failure(err.to_string(), err.info())
}

fn dispatch<P, T>(record: Value, plugin: impl FnOnce(P) -> Outcome<T>) -> PluginResult
where
    P: DeserializeOwned,
    T: Serialize,
{
    match params::decode(record) {
        Ok(params) => plugin(params).into_result(),
        Err(e) => rejected(e),
    }
}

fn execute(args: &Args) -> PluginResult {
    let record = match read_params(&args.plugin.args().params) {
        Ok(record) => record,
        Err(e) => {
            return PluginResult::failure(
                format!("{:#}", e),
                ErrorInfo {
                    kind: "invalid_params",
                    key: None,
                },
            );
        }
    };
    let (common, record) = match params::split_common(record) {
        Ok(split) => split,
        Err(e) => return rejected(e),
    };
    let check_mode = args.check || common.check_mode;

    info!(plugin = args.plugin.name(), check_mode, "Running plugin");
    match &args.plugin {
        Plugin::Vpc(_) => dispatch(record, |p: vpc::VpcParams| {
            let mut cloud = FixtureCloud::new(&args.state_file, &args.region);
            vpc::run(&mut cloud, p, check_mode)
        }),
        Plugin::Dns(_) => dispatch(record, |p: dns::DnsParams| {
            let mut cloud = FixtureCloud::new(&args.state_file, &args.region);
            dns::run(&mut cloud, p, check_mode)
        }),
        Plugin::Cron(_) => dispatch(record, |p: cron::CronParams| match p.cron_file.clone() {
            Some(path) => cron::run(&mut CronFile::new(path), p, check_mode),
            None => cron::run(&mut SystemCrontab::new(p.user.clone()), p, check_mode),
        }),
    }
}
