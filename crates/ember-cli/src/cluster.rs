//! Cluster subcommands.
//!
//! Everything except `keyslot` goes through a [`ClusterClient`], so the
//! tool sees the same routing table an application would.

use std::process::ExitCode;

use bytes::Bytes;
use clap::Subcommand;
use colored::Colorize;
use ember_cluster_client::{
    key_slot, ClusterClient, ClusterConfig, ClusterError, Coverage, LinkState, NodeDescriptor,
    NodeError, SlotRange, SLOT_COUNT,
};
use ember_protocol::Frame;

use crate::format::{format_coverage, format_nodes, format_response, format_slot_ranges};

/// What to do with the cluster.
#[derive(Debug, Subcommand)]
pub enum ClusterCommand {
    /// List every node in the discovered topology.
    Nodes,

    /// Show which master serves which slots.
    Slots,

    /// Verify slot coverage and node health. Exits non-zero on problems.
    Check,

    /// Print the hash slot of a key. Computed locally.
    Keyslot {
        /// The key to hash.
        key: String,
    },

    /// Send a command to the master that owns a key.
    Exec {
        /// Key used for routing.
        key: String,
        /// Command and arguments, e.g. `GET user:42`.
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Send a command to every master, one after another.
    Masters {
        /// Command and arguments, e.g. `DBSIZE`.
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// Runs a subcommand against the cluster described by `config`.
pub fn run(command: &ClusterCommand, config: ClusterConfig) -> ExitCode {
    if let ClusterCommand::Keyslot { key } = command {
        let slot = key_slot(key.as_bytes());
        println!("{}", format_response(&Frame::Integer(i64::from(slot))));
        return ExitCode::SUCCESS;
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}", format!("failed to create runtime: {e}").red());
            return ExitCode::FAILURE;
        }
    };

    rt.block_on(async {
        let client = match ClusterClient::connect(config).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", format!("could not reach the cluster: {e}").red());
                return ExitCode::FAILURE;
            }
        };

        let code = match command {
            ClusterCommand::Nodes => {
                println!("{}", format_nodes(&client.nodes()));
                ExitCode::SUCCESS
            }
            ClusterCommand::Slots => {
                println!("{}", format_coverage(&client.coverage()));
                ExitCode::SUCCESS
            }
            ClusterCommand::Check => {
                let seeds = client.seeds().await;
                let report = check_topology(&client.nodes(), &client.coverage());
                print_report(&report, seeds.len());
                report.exit_code()
            }
            ClusterCommand::Exec { key, command } => run_exec(&client, key, command).await,
            ClusterCommand::Masters { command } => run_masters(&client, command).await,
            ClusterCommand::Keyslot { .. } => ExitCode::SUCCESS,
        };

        client.shutdown().await;
        code
    })
}

fn to_args(command: &[String]) -> Vec<Bytes> {
    command
        .iter()
        .map(|part| Bytes::copy_from_slice(part.as_bytes()))
        .collect()
}

/// Prints a failed operation. Error replies from the server are shown the
/// same way redis-cli shows them.
fn print_error(err: &ClusterError) {
    match err {
        ClusterError::Node {
            source: NodeError::Server(msg),
            ..
        } => println!("{}", format_response(&Frame::Error(msg.clone()))),
        other => eprintln!("{}", format!("error: {other}").red()),
    }
}

// ---------------------------------------------------------------------------
// exec / masters
// ---------------------------------------------------------------------------

async fn run_exec(client: &ClusterClient, key: &str, command: &[String]) -> ExitCode {
    match client.query(&[key], &to_args(command)).await {
        Ok(frame) => {
            println!("{}", format_response(&frame));
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Keeps going after a failing master so every node gets reported.
async fn run_masters(client: &ClusterClient, command: &[String]) -> ExitCode {
    let args = to_args(command);
    let mut code = ExitCode::SUCCESS;

    for endpoint in client.masters() {
        println!("{}", endpoint.addr().bold());
        match client.query_on_node(&endpoint, &args).await {
            Ok(frame) => println!("{}", format_response(&frame)),
            Err(e) => {
                print_error(&e);
                code = ExitCode::FAILURE;
            }
        }
    }
    code
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

/// Findings from a topology check.
#[derive(Debug, Default)]
struct CheckReport {
    node_count: usize,
    master_count: usize,
    covered: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl CheckReport {
    fn exit_code(&self) -> ExitCode {
        if self.errors.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

fn check_topology(nodes: &[NodeDescriptor], coverage: &Coverage) -> CheckReport {
    let mut report = CheckReport {
        node_count: nodes.len(),
        master_count: nodes.iter().filter(|n| n.is_master()).count(),
        covered: coverage.covered_slots(),
        ..CheckReport::default()
    };

    for node in nodes {
        let name = format!("{} ({})", node.node_id, node.endpoint.addr());
        let has_flag = |flag: &str| node.flags.iter().any(|f| f == flag);

        if has_flag("fail") {
            report.errors.push(format!("node {name} is in FAIL state"));
        } else if has_flag("fail?") || has_flag("pfail") {
            report
                .warnings
                .push(format!("node {name} is in PFAIL state (possible failure)"));
        }

        if node.is_master() {
            if node.link_state == LinkState::Disconnected {
                report.errors.push(format!("master {name} link is down"));
            }
            let slots = node.slot_count();
            if slots == 0 {
                report.warnings.push(format!("master {name} serves no slots"));
            } else if !node.is_routable_master() {
                let ranges: Vec<SlotRange> = node.slot_ranges().collect();
                report.warnings.push(format!(
                    "master {name} claims slots {} but is excluded from routing",
                    format_slot_ranges(&ranges)
                ));
            }
        } else if let Some(master_id) = &node.master_id {
            if !nodes.iter().any(|n| &n.node_id == master_id) {
                report
                    .warnings
                    .push(format!("replica {name} follows unknown master {master_id}"));
            }
        }
    }

    if !coverage.uncovered.is_empty() {
        let missing = usize::from(SLOT_COUNT) - report.covered;
        report.errors.push(format!(
            "{missing} slots not covered: {}",
            format_slot_ranges(&coverage.uncovered)
        ));
    }

    report
}

fn print_report(report: &CheckReport, seed_count: usize) {
    println!("{}", "=== cluster check ===".bold());
    println!(
        "nodes: {} ({} masters, {seed_count} seeds)",
        report.node_count, report.master_count
    );
    println!(
        "slot coverage: {}/{} ({:.1}%)",
        report.covered,
        SLOT_COUNT,
        report.covered as f64 / f64::from(SLOT_COUNT) * 100.0
    );

    if !report.warnings.is_empty() {
        println!();
        for w in &report.warnings {
            println!("{} {w}", "[WARN]".yellow());
        }
    }

    if !report.errors.is_empty() {
        println!();
        for e in &report.errors {
            println!("{} {e}", "[ERR]".red());
        }
        return;
    }

    if report.warnings.is_empty() {
        println!("\n{}", "all checks passed".green());
    }
}
