//! Node table parsing.
//!
//! `CLUSTER NODES` answers with one line per known node:
//!
//! ```text
//! <id> <ip:port@cport[,hostname]> <flags> <master-id|-> <ping-sent> <pong-recv> <config-epoch> <link-state> [slot ...]
//! ```
//!
//! Each line becomes a [`NodeDescriptor`]. Slot tokens that do not parse
//! (migration markers such as `[93-<-id]`) are skipped; a line missing
//! one of the eight fixed fields fails the whole table.

use std::collections::HashMap;
use std::fmt;

use crate::endpoint::{split_host_port, Endpoint};
use crate::error::TopologyParseError;
use crate::slots::SlotRange;

/// The role a node reported for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Owns slots and accepts writes.
    Primary,
    /// Mirrors a primary. Never receives traffic from this client.
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "master"),
            NodeRole::Replica => write!(f, "slave"),
        }
    }
}

/// Health of the cluster-bus link as seen by the reporting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Connected,
    Disconnected,
    Unknown,
}

impl LinkState {
    fn parse(s: &str) -> Self {
        match s {
            "connected" => LinkState::Connected,
            "disconnected" => LinkState::Disconnected,
            _ => LinkState::Unknown,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Connected => write!(f, "connected"),
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Unknown => write!(f, "unknown"),
        }
    }
}

/// One cluster member as reported in the node table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub node_id: String,
    /// Client address. The password is stamped from the seed that
    /// reported the node, since the table never carries credentials.
    pub endpoint: Endpoint,
    /// Id of the master this node replicates; `None` for masters.
    pub master_id: Option<String>,
    pub role: NodeRole,
    /// Reported by the node we queried about itself.
    pub myself: bool,
    /// Remaining flags (`fail`, `fail?`, `handshake`, `noaddr`, ...) in
    /// the order they were listed.
    pub flags: Vec<String>,
    pub ping_sent: u64,
    pub pong_recv: u64,
    pub config_epoch: u64,
    pub link_state: LinkState,
    /// First slot token; `None` when the node owns no slots.
    pub primary_slots: Option<SlotRange>,
    pub extra_slots: Vec<SlotRange>,
}

impl NodeDescriptor {
    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Primary
    }

    pub fn is_slave(&self) -> bool {
        self.role == NodeRole::Replica
    }

    pub fn identity_key(&self) -> String {
        self.endpoint.identity_key()
    }

    /// Every slot range owned, primary range first.
    pub fn slot_ranges(&self) -> impl Iterator<Item = SlotRange> + '_ {
        self.primary_slots
            .into_iter()
            .chain(self.extra_slots.iter().copied())
    }

    /// Number of slots the node claims.
    pub fn slot_count(&self) -> usize {
        self.slot_ranges().map(|r| r.len()).sum()
    }

    /// Returns true if the node may receive traffic: a master with an
    /// address, no health flags, and a link that is not known to be down.
    pub fn is_routable_master(&self) -> bool {
        self.is_master()
            && !self.endpoint.host.is_empty()
            && self.flags.is_empty()
            && self.link_state != LinkState::Disconnected
    }

    fn sorted_extra_slots(&self) -> Vec<SlotRange> {
        let mut extra = self.extra_slots.clone();
        extra.sort_unstable();
        extra
    }

    /// Compares the fields that influence routing.
    fn same_routing_state(&self, other: &NodeDescriptor) -> bool {
        self.endpoint.password == other.endpoint.password
            && self.role == other.role
            && self.flags == other.flags
            && self.link_state == other.link_state
            && self.primary_slots == other.primary_slots
            && self.sorted_extra_slots() == other.sorted_extra_slots()
    }
}

/// Formats the descriptor as a node-table line.
impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::with_capacity(self.flags.len() + 2);
        if self.myself {
            flags.push("myself".to_string());
        }
        flags.push(self.role.to_string());
        flags.extend(self.flags.iter().cloned());

        write!(
            f,
            "{} {} {} {} {} {} {} {}",
            self.node_id,
            self.endpoint.addr(),
            flags.join(","),
            self.master_id.as_deref().unwrap_or("-"),
            self.ping_sent,
            self.pong_recv,
            self.config_epoch,
            self.link_state,
        )?;
        for range in self.slot_ranges() {
            write!(f, " {range}")?;
        }
        Ok(())
    }
}

/// Parses a single node-table line.
pub fn parse_node_line(line: &str) -> Result<NodeDescriptor, TopologyParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.is_empty() {
        return Err(TopologyParseError::EmptyLine);
    }
    if fields.len() < 8 {
        return Err(TopologyParseError::MissingFields(fields.len()));
    }

    let endpoint = parse_address(fields[1])?;

    let mut flags = fields[2].split(',').filter(|f| !f.is_empty()).peekable();
    let myself = flags.next_if_eq(&"myself").is_some();
    let role = match flags.peek().copied() {
        Some("master") => {
            flags.next();
            NodeRole::Primary
        }
        Some("slave") => {
            flags.next();
            NodeRole::Replica
        }
        _ => NodeRole::Replica,
    };
    let flags: Vec<String> = flags.map(str::to_owned).collect();

    let master_id = match fields[3] {
        "-" => None,
        id => Some(id.to_owned()),
    };

    let mut slots = fields[8..].iter().filter_map(|t| SlotRange::parse_token(t));
    let primary_slots = slots.next();
    let extra_slots = slots.collect();

    Ok(NodeDescriptor {
        node_id: fields[0].to_owned(),
        endpoint,
        master_id,
        role,
        myself,
        flags,
        ping_sent: parse_number("ping-sent", fields[4])?,
        pong_recv: parse_number("pong-recv", fields[5])?,
        config_epoch: parse_number("config-epoch", fields[6])?,
        link_state: LinkState::parse(fields[7]),
        primary_slots,
        extra_slots,
    })
}

/// Parses a full `CLUSTER NODES` reply. Blank lines are ignored; any
/// malformed line fails the whole table.
pub fn parse_topology(text: &str) -> Result<Vec<NodeDescriptor>, TopologyParseError> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_node_line)
        .collect()
}

/// Sets the password of every descriptor to the one used for the seed
/// that produced them.
pub fn stamp_password(nodes: &mut [NodeDescriptor], password: Option<&str>) {
    for node in nodes {
        node.endpoint.password = password.filter(|p| !p.is_empty()).map(str::to_owned);
    }
}

/// Returns true if `new` differs from `old` in anything that affects
/// routing: a node appearing or disappearing (by identity key), or a
/// change in password, role, flags, link state or slot ownership.
pub fn topology_changed(old: &[NodeDescriptor], new: &[NodeDescriptor]) -> bool {
    let old_by_key: HashMap<String, &NodeDescriptor> =
        old.iter().map(|n| (n.identity_key(), n)).collect();
    let new_by_key: HashMap<String, &NodeDescriptor> =
        new.iter().map(|n| (n.identity_key(), n)).collect();

    if old_by_key.len() != new_by_key.len() {
        return true;
    }
    new_by_key.iter().any(|(key, node)| match old_by_key.get(key) {
        Some(prev) => !prev.same_routing_state(node),
        None => true,
    })
}

/// Address field: `ip:port`, optionally followed by `@cport` and
/// `,hostname`. `:0` (a node without an address) yields an empty host.
fn parse_address(field: &str) -> Result<Endpoint, TopologyParseError> {
    let addr = field.split(['@', ',']).next().unwrap_or_default();
    let (host, port) =
        split_host_port(addr).ok_or_else(|| TopologyParseError::InvalidAddress(field.to_owned()))?;
    Ok(Endpoint::new(host, port))
}

fn parse_number(field: &'static str, value: &str) -> Result<u64, TopologyParseError> {
    value
        .parse()
        .map_err(|_| TopologyParseError::InvalidNumber {
            field,
            value: value.to_owned(),
        })
}
