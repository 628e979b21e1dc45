//! ember-cli: command-line tool for a sharded ember cluster.
//!
//! Discovers the cluster from a seed list and either reports on the
//! topology (`nodes`, `slots`, `check`) or routes a single command to the
//! master that owns its key.

mod cluster;
mod config;
mod format;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use ember_cluster_client::ClusterConfig;
use tracing_subscriber::EnvFilter;

use crate::cluster::ClusterCommand;

/// Cluster-aware command-line client for ember.
#[derive(Parser)]
#[command(name = "ember-cli", version, about)]
struct Args {
    /// Path to a TOML config file.
    #[arg(short = 'c', long, env = "EMBER_CLUSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Print the default config as TOML and exit.
    #[arg(long)]
    config_template: bool,

    /// Seed node as host:port or password@host:port. Repeatable.
    #[arg(short = 's', long = "seed", env = "EMBER_SEEDS", value_delimiter = ',')]
    seeds: Vec<String>,

    /// Password for seeds given without one.
    #[arg(short = 'a', long, env = "EMBER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Option<ClusterCommand>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "ember=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.config_template {
        return match config::to_toml(&ClusterConfig::default()) {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e),
        };
    }

    let Some(command) = &args.command else {
        return fail("no command given, see --help");
    };

    let mut cfg = match &args.config {
        Some(path) => match config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => return fail(&e),
        },
        None => ClusterConfig::default(),
    };
    config::apply_overrides(&mut cfg, &args.seeds, args.password.as_deref());

    if cfg.seeds.is_empty() && !matches!(command, ClusterCommand::Keyslot { .. }) {
        return fail("no seeds configured, pass --seed or set seeds in the config file");
    }

    cluster::run(command, cfg)
}

fn fail(msg: &str) -> ExitCode {
    eprintln!("{}", msg.red());
    ExitCode::FAILURE
}
