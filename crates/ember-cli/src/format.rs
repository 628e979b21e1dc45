//! Terminal output: replies, node tables and slot coverage.
//!
//! Replies follow redis-cli conventions (`(integer)`, `(nil)`, numbered
//! arrays). Everything that came from a server goes through [`sanitize`]
//! before it reaches the terminal.

use colored::Colorize;
use ember_cluster_client::{Coverage, LinkState, NodeDescriptor, SlotRange};
use ember_protocol::Frame;

/// Formats a reply for display.
pub fn format_response(frame: &Frame) -> String {
    let mut lines = Vec::new();
    render(frame, "", &mut lines);
    lines.join("\n")
}

/// Appends the lines for `frame`. Nested aggregates are indented under
/// their `n)` marker.
fn render(frame: &Frame, lead: &str, out: &mut Vec<String>) {
    match frame {
        Frame::Array(items) if items.is_empty() => {
            out.push(format!("{lead}{}", "(empty array)".dimmed()))
        }
        Frame::Map(pairs) if pairs.is_empty() => {
            out.push(format!("{lead}{}", "(empty map)".dimmed()))
        }
        Frame::Array(items) => {
            let pad = " ".repeat(lead.len());
            for (i, item) in items.iter().enumerate() {
                let marker = format!("{}{}) ", if i == 0 { lead } else { &pad }, i + 1);
                render(item, &marker, out);
            }
        }
        Frame::Map(pairs) => {
            let pad = " ".repeat(lead.len());
            for (i, (key, val)) in pairs.iter().enumerate() {
                let marker = if i == 0 { lead } else { &pad };
                out.push(format!("{marker}{}) {} => {}", i + 1, scalar(key), scalar(val)));
            }
        }
        other => out.push(format!("{lead}{}", scalar(other))),
    }
}

fn scalar(frame: &Frame) -> String {
    match frame {
        Frame::Simple(s) => sanitize(s).green().to_string(),
        Frame::Error(e) => format!("{} {}", "(error)".red(), sanitize(e).red()),
        Frame::Integer(n) => format!("{} {}", "(integer)".yellow(), n.to_string().yellow()),
        Frame::Bulk(data) => match std::str::from_utf8(data) {
            Ok(s) if s.contains('\n') => sanitize(s).green().to_string(),
            Ok(s) => format!("\"{}\"", sanitize(s)).green().to_string(),
            Err(_) => {
                let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
                hex.green().to_string()
            }
        },
        Frame::Null => "(nil)".dimmed().to_string(),
        Frame::Array(_) | Frame::Map(_) => format_response(frame),
    }
}

/// Removes ANSI escape sequences and control characters, keeping tabs and
/// line breaks.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\x1b' => {
                // CSI sequences run until the first letter
                if chars.next_if_eq(&'[').is_some() {
                    for c in chars.by_ref() {
                        if c.is_ascii_alphabetic() {
                            break;
                        }
                    }
                } else {
                    chars.next();
                }
            }
            '\t' | '\n' | '\r' => out.push(ch),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Formats slot ranges for display, e.g. `0-5460, 10923-16383`.
pub fn format_slot_ranges(ranges: &[SlotRange]) -> String {
    if ranges.is_empty() {
        return "-".into();
    }
    ranges
        .iter()
        .map(SlotRange::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One line per node: id, address, role, flags, link and slots.
pub fn format_nodes(nodes: &[NodeDescriptor]) -> String {
    let mut lines = Vec::with_capacity(nodes.len());
    for node in nodes {
        let role = if node.is_master() {
            "master".bold().to_string()
        } else {
            "replica".to_string()
        };
        let flags = if node.flags.is_empty() {
            "-".to_string()
        } else {
            node.flags.join(",").yellow().to_string()
        };
        let link = match node.link_state {
            LinkState::Connected => "connected".green().to_string(),
            LinkState::Disconnected => "disconnected".red().to_string(),
            LinkState::Unknown => "unknown".dimmed().to_string(),
        };
        let slots: Vec<SlotRange> = node.slot_ranges().collect();
        lines.push(format!(
            "{:<8} {:<21} {role} {flags} {link} epoch={} slots={}",
            short_id(&sanitize(&node.node_id)),
            node.endpoint.addr(),
            node.config_epoch,
            format_slot_ranges(&slots),
        ));
    }
    lines.join("\n")
}

/// Slot ownership per master followed by the uncovered ranges.
pub fn format_coverage(coverage: &Coverage) -> String {
    let mut lines = Vec::with_capacity(coverage.masters.len() + 1);
    for (endpoint, ranges) in &coverage.masters {
        let count: usize = ranges.iter().map(SlotRange::len).sum();
        lines.push(format!(
            "{:<21} {:>5} slots  {}",
            endpoint.addr(),
            count,
            format_slot_ranges(ranges)
        ));
    }
    if !coverage.uncovered.is_empty() {
        lines.push(format!(
            "{:<21} {}",
            "uncovered".red(),
            format_slot_ranges(&coverage.uncovered).red()
        ));
    }
    lines.join("\n")
}

/// First eight characters of a node id, on a char boundary.
fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}
