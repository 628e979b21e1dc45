//! Async TCP connection to a single cluster node.
//!
//! Sends commands as RESP arrays of bulk strings and reads back parsed
//! frames. A connection that hits an I/O or protocol error marks itself
//! broken so the pool discards it.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use ember_protocol::{encode_command, parse_frame, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::NodeError;
use crate::node::{Connector, NodeConnection};

/// A TCP connection to a node with read/write buffering.
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    broken: bool,
}

impl Connection {
    /// Connects to `host:port`, giving up after `timeout`.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, NodeError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                NodeError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {host}:{port} timed out"),
                ))
            })??;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            broken: false,
        })
    }

    /// Authenticates with the AUTH command.
    pub async fn authenticate(&mut self, password: &str) -> Result<(), NodeError> {
        let args = [Bytes::from_static(b"AUTH"), Bytes::copy_from_slice(password.as_bytes())];
        match self.send_command(&args).await? {
            reply if reply.is_ok() => Ok(()),
            Frame::Error(e) => Err(NodeError::Auth(e)),
            _ => Err(NodeError::Auth("unexpected response to AUTH".into())),
        }
    }

    pub async fn send_command(&mut self, args: &[Bytes]) -> Result<Frame, NodeError> {
        if self.broken {
            return Err(NodeError::Disconnected);
        }
        // cleared once the reply is read; a future dropped mid-request
        // leaves the connection broken so its late reply is never handed
        // to the next caller
        self.broken = true;
        let frame = self.round_trip(args).await?;
        self.broken = false;
        Ok(frame)
    }

    async fn round_trip(&mut self, args: &[Bytes]) -> Result<Frame, NodeError> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        self.read_response().await
    }

    /// Reads one complete frame, pulling more bytes off the socket until
    /// the parser has enough.
    async fn read_response(&mut self) -> Result<Frame, NodeError> {
        loop {
            if !self.read_buf.is_empty() {
                if let Some((frame, consumed)) = parse_frame(&self.read_buf)? {
                    let _ = self.read_buf.split_to(consumed);
                    return Ok(frame);
                }
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(NodeError::Disconnected);
            }
        }
    }
}

impl NodeConnection for Connection {
    async fn send_command(&mut self, args: &[Bytes]) -> Result<Frame, NodeError> {
        Connection::send_command(self, args).await
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

/// Opens [`Connection`]s over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for TcpConnector {
    type Conn = Connection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, NodeError> {
        debug!(addr = %endpoint, "opening node connection");
        let mut conn =
            Connection::connect(&endpoint.host, endpoint.port, self.connect_timeout).await?;
        if let Some(password) = endpoint.password.as_deref() {
            conn.authenticate(password).await?;
        }
        Ok(conn)
    }
}
