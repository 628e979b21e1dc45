//! Integration tests for the ember-cli binary.

use crate::helpers::{dead_port, master_line, run_cli, FakeNode};

async fn cluster() -> (FakeNode, FakeNode) {
    let a = FakeNode::start().await;
    let b = FakeNode::start().await;
    let topology = [
        master_line("aaaaaaaaaaaa", &a, "0-8191"),
        master_line("bbbbbbbbbbbb", &b, "8192-16383"),
    ]
    .join("\n");
    a.set_topology(&topology);
    b.set_topology(&topology);
    (a, b)
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[tokio::test]
async fn keyslot_needs_no_cluster() {
    let output = run_cli(&["keyslot", "foo"]).await;
    assert!(output.status.success(), "exit code: {:?}", output.status);
    assert!(stdout(&output).contains("12182"));
}

#[tokio::test]
async fn nodes_lists_the_topology() {
    let (a, b) = cluster().await;
    let output = run_cli(&["--seed", &a.addr(), "nodes"]).await;
    assert!(output.status.success(), "exit code: {:?}", output.status);
    let out = stdout(&output);
    assert!(out.contains(&a.addr()), "got: {out}");
    assert!(out.contains(&b.addr()), "got: {out}");
    assert!(out.contains("slots=0-8191"), "got: {out}");
}

#[tokio::test]
async fn exec_routes_by_key() {
    let (a, b) = cluster().await;
    let seed = a.addr();

    let output = run_cli(&["--seed", &seed, "exec", "foo", "SET", "foo", "bar"]).await;
    assert!(output.status.success(), "exit code: {:?}", output.status);
    assert!(stdout(&output).contains("OK"));
    assert_eq!(b.commands(), 1);
    assert_eq!(a.commands(), 0);

    let output = run_cli(&["--seed", &seed, "exec", "foo", "GET", "foo"]).await;
    assert!(stdout(&output).contains("\"bar\""));
}

#[tokio::test]
async fn exec_shows_error_replies() {
    let (a, _b) = cluster().await;
    let output = run_cli(&["--seed", &a.addr(), "exec", "bar", "NOTAREALCOMMAND"]).await;
    assert!(!output.status.success());
    assert!(stdout(&output).contains("(error) ERR unknown command"));
}

#[tokio::test]
async fn check_reports_uncovered_slots() {
    let a = FakeNode::start().await;
    a.set_topology(&master_line("aaaaaaaaaaaa", &a, "0-8191"));

    let output = run_cli(&["--seed", &a.addr(), "check"]).await;
    assert!(!output.status.success());
    let out = stdout(&output);
    assert!(out.contains("8192 slots not covered: 8192-16383"), "got: {out}");
}

#[tokio::test]
async fn check_passes_on_a_healthy_cluster() {
    let (a, _b) = cluster().await;
    let output = run_cli(&["--seed", &a.addr(), "check"]).await;
    assert!(output.status.success(), "exit code: {:?}", output.status);
    assert!(stdout(&output).contains("all checks passed"));
}

#[tokio::test]
async fn unreachable_cluster_fails() {
    let seed = format!("127.0.0.1:{}", dead_port());
    let output = run_cli(&["--seed", &seed, "nodes"]).await;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("could not reach the cluster"), "got: {stderr}");
}

#[tokio::test]
async fn missing_seeds_is_an_error() {
    let output = run_cli(&["nodes"]).await;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no seeds configured"), "got: {stderr}");
}
