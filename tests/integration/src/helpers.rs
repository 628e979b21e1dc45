//! Fake cluster nodes for driving the client over real sockets.
//!
//! Each [`FakeNode`] listens on an ephemeral port and answers the handful
//! of commands the client and the tests need: AUTH, CLUSTER NODES, PING,
//! GET, SET, DBSIZE and SLOW (answered after [`SLOW_REPLY_DELAY`]). Tests
//! set the node table by hand once every node's port is known.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use ember_protocol::{parse_frame, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How long a node takes to answer `SLOW`.
pub const SLOW_REPLY_DELAY: Duration = Duration::from_millis(200);

#[derive(Default)]
struct NodeState {
    topology: String,
    password: Option<String>,
    data: HashMap<Bytes, Bytes>,
    error_reply: Option<String>,
    down: bool,
    topology_queries: usize,
    commands: usize,
}

/// A RESP node running inside the test's runtime.
pub struct FakeNode {
    pub port: u16,
    state: Arc<Mutex<NodeState>>,
    accept: JoinHandle<()>,
}

impl FakeNode {
    pub async fn start() -> Self {
        Self::start_inner(None).await
    }

    /// Starts a node that rejects everything until AUTH succeeds.
    pub async fn start_with_password(password: &str) -> Self {
        Self::start_inner(Some(password.to_string())).await
    }

    async fn start_inner(password: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(NodeState {
            password,
            ..NodeState::default()
        }));

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&accept_state)));
            }
        });

        Self {
            port,
            state,
            accept,
        }
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap()
    }

    pub fn set_topology(&self, text: &str) {
        self.state().topology = text.to_string();
    }

    /// Makes every data command fail with `reply`.
    pub fn set_error_reply(&self, reply: Option<&str>) {
        self.state().error_reply = reply.map(String::from);
    }

    /// Stops accepting connections and drops open ones on their next
    /// command.
    pub fn stop(&self) {
        self.state().down = true;
        self.accept.abort();
    }

    pub fn topology_queries(&self) -> usize {
        self.state().topology_queries
    }

    /// Number of commands served, not counting AUTH and CLUSTER.
    pub fn commands(&self) -> usize {
        self.state().commands
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.down = true;
        }
        self.accept.abort();
    }
}

/// A `CLUSTER NODES` line for a master on `node` owning `slots`.
pub fn master_line(id: &str, node: &FakeNode, slots: &str) -> String {
    format!(
        "{id} 127.0.0.1:{}@{} master - 0 0 1 connected {slots}",
        node.port,
        u32::from(node.port) + 10000
    )
}

/// A `CLUSTER NODES` line for a replica of `master_id`.
pub fn replica_line(id: &str, node: &FakeNode, master_id: &str) -> String {
    format!(
        "{id} 127.0.0.1:{}@{} slave {master_id} 0 0 1 connected",
        node.port,
        u32::from(node.port) + 10000
    )
}

/// Returns a local port with nothing listening on it.
pub fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<NodeState>>) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut authed = state.lock().unwrap().password.is_none();

    loop {
        let (frame, consumed) = match parse_frame(&buf) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => match socket.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            },
            Err(_) => return,
        };
        let _ = buf.split_to(consumed);

        let args = match frame {
            Frame::Array(parts) => parts
                .into_iter()
                .filter_map(|p| match p {
                    Frame::Bulk(b) => Some(b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
            _ => return,
        };

        let reply = {
            let mut state = state.lock().unwrap();
            if state.down {
                return;
            }
            respond(&mut state, &args, &mut authed)
        };

        if args.first().is_some_and(|name| name.eq_ignore_ascii_case(b"SLOW")) {
            tokio::time::sleep(SLOW_REPLY_DELAY).await;
        }

        let mut out = BytesMut::new();
        reply.serialize(&mut out);
        if socket.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn respond(state: &mut NodeState, args: &[Bytes], authed: &mut bool) -> Frame {
    let Some(name) = args.first() else {
        return Frame::Error("ERR empty command".into());
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();

    if name == "AUTH" {
        let given = args.get(1).map(|b| String::from_utf8_lossy(b).into_owned());
        return if given.is_some() && given == state.password {
            *authed = true;
            Frame::Simple("OK".into())
        } else {
            Frame::Error("WRONGPASS invalid username-password pair".into())
        };
    }
    if !*authed {
        return Frame::Error("NOAUTH Authentication required.".into());
    }
    if name == "CLUSTER" {
        state.topology_queries += 1;
        return Frame::Bulk(Bytes::from(state.topology.clone()));
    }

    state.commands += 1;
    if let Some(reply) = &state.error_reply {
        return Frame::Error(reply.clone());
    }
    match (name.as_str(), args.len()) {
        ("PING", _) => Frame::Simple("PONG".into()),
        ("SLOW", _) => Frame::Simple("SLOW".into()),
        ("GET", 2) => state
            .data
            .get(&args[1])
            .cloned()
            .map_or(Frame::Null, Frame::Bulk),
        ("SET", 3) => {
            state.data.insert(args[1].clone(), args[2].clone());
            Frame::Simple("OK".into())
        }
        ("DBSIZE", _) => Frame::Integer(state.data.len() as i64),
        _ => Frame::Error(format!("ERR unknown command '{name}'")),
    }
}

/// Builds a command from string parts.
pub fn cmd(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

/// Locates the ember-cli binary in the cargo target directory.
fn cli_binary() -> PathBuf {
    // test binary is in target/debug/deps/, go up to target/debug/
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("ember-cli");
    if !path.exists() {
        panic!(
            "ember-cli binary not found. run `cargo build` first.\nlooked at: {}",
            path.display()
        );
    }
    path
}

/// Runs ember-cli with the given arguments and collects its output.
pub async fn run_cli(args: &[&str]) -> std::process::Output {
    tokio::process::Command::new(cli_binary())
        .args(args)
        .env("NO_COLOR", "1")
        .env("RUST_LOG", "error")
        .env_remove("EMBER_SEEDS")
        .env_remove("EMBER_PASSWORD")
        .env_remove("EMBER_CLUSTER_CONFIG")
        .output()
        .await
        .unwrap()
}
