//! Firewall log line parsing
//!
//! ufw logs through the kernel, one line per packet:
//!
//! ```text
//! Oct 19 12:34:56 host kernel: [ 8123.456789] [UFW BLOCK] IN=eth0 OUT= SRC=203.0.113.7
//!     DST=192.0.2.10 LEN=60 PROTO=TCP SPT=51234 DPT=22 SYN URGP=0
//! ```
//!
//! [`parse`] turns such a line into a [`ConnectionEvent`] for block-class tags and
//! ignores everything else. It never fails: log lines are not under our control,
//! and the first line after a seek is usually cut.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a tagged firewall log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Allow,
    Block,
    LimitBlock,
    /// Any other tag, e.g. `AUDIT`
    Other(String),
}

impl EventKind {
    /// Classifies the tag text with its leading prefix word (`UFW`) removed.
    fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_uppercase().as_str() {
            "ALLOW" => EventKind::Allow,
            "BLOCK" => EventKind::Block,
            "LIMIT BLOCK" => EventKind::LimitBlock,
            _ => EventKind::Other(tag.to_string()),
        }
    }

    /// Only block-class events are surfaced
    pub fn is_block(&self) -> bool {
        matches!(self, EventKind::Block | EventKind::LimitBlock)
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Allow => "ALLOW",
            EventKind::Block => "BLOCK",
            EventKind::LimitBlock => "LIMIT BLOCK",
            EventKind::Other(tag) => tag,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an event reached the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Delivery {
    /// Replayed from the log tail when the tailer started
    Backlog,
    /// Appended after the tailer started
    Live,
}

/// One blocked connection read from the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
    pub timestamp: String,
    pub kind: EventKind,
    pub fields: BTreeMap<String, String>,
}

impl ConnectionEvent {
    /// Value of `key`, or `""` when the line did not carry it.
    pub fn field(&self, key: &str) -> &str {
        self.fields.get(key).map_or("", String::as_str)
    }

    pub fn interface_in(&self) -> &str {
        self.field("IN")
    }

    pub fn interface_out(&self) -> &str {
        self.field("OUT")
    }

    pub fn protocol(&self) -> &str {
        self.field("PROTO")
    }

    pub fn source(&self) -> &str {
        self.field("SRC")
    }

    pub fn source_port(&self) -> &str {
        self.field("SPT")
    }

    pub fn destination(&self) -> &str {
        self.field("DST")
    }

    pub fn destination_port(&self) -> &str {
        self.field("DPT")
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoint = |addr: &str, port: &str| {
            if port.is_empty() {
                addr.to_string()
            } else {
                format!("{addr}:{port}")
            }
        };
        write!(
            f,
            "{} [{}] {} {} -> {}",
            self.timestamp,
            self.kind,
            self.protocol(),
            endpoint(self.source(), self.source_port()),
            endpoint(self.destination(), self.destination_port()),
        )?;
        match (self.interface_in(), self.interface_out()) {
            ("", "") => Ok(()),
            (iface, "") => write!(f, " in on {iface}"),
            (_, iface) => write!(f, " out on {iface}"),
        }
    }
}

/// Finds the first bracketed group containing a letter and returns its inner
/// text and the byte offset just past the closing bracket.
///
/// Kernel uptime stamps like `[ 8123.456789]` have no letters and are skipped.
fn find_tag(line: &str) -> Option<(&str, usize)> {
    let mut offset = 0;
    while let Some(open) = line[offset..].find('[') {
        let start = offset + open + 1;
        let close = start + line[start..].find(']')?;
        let inner = &line[start..close];
        if inner.chars().any(|c| c.is_ascii_alphabetic()) {
            return Some((inner, close + 1));
        }
        offset = close + 1;
    }
    None
}

fn is_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Parses one log line into a block event.
///
/// Returns `None` for lines without a tag and for tags that are not
/// block-class. Missing keys are simply absent from the mapping.
pub fn parse(line: &str) -> Option<ConnectionEvent> {
    let (tag, end) = find_tag(line)?;

    let words: Vec<&str> = tag.split_whitespace().collect();
    let kind_text = match words.as_slice() {
        [] => return None,
        [only] => (*only).to_string(),
        [_prefix, rest @ ..] => rest.join(" "),
    };
    let kind = EventKind::from_tag(&kind_text);
    if !kind.is_block() {
        return None;
    }

    let timestamp = line.split_whitespace().take(3).collect::<Vec<_>>().join(" ");

    let fields = line[end..]
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .filter(|(key, _)| is_key(key))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

    Some(ConnectionEvent {
        timestamp,
        kind,
        fields,
    })
}

/// [`parse`] for raw bytes; invalid UTF-8 is replaced, never rejected.
pub fn parse_bytes(line: &[u8]) -> Option<ConnectionEvent> {
    parse(&String::from_utf8_lossy(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_BLOCK: &str = "Oct 19 12:34:56 host kernel: [ 8123.456789] [UFW BLOCK] IN=eth0 OUT= \
        MAC=00:11:22:33:44:55:66:77:88:99:aa:bb:08:00 SRC=203.0.113.7 DST=192.0.2.10 LEN=60 \
        TOS=0x00 PREC=0x00 TTL=52 ID=4242 DF PROTO=TCP SPT=51234 DPT=22 WINDOW=64240 RES=0x00 SYN URGP=0";

    #[test]
    fn test_parse_tcp_block() {
        let event = parse(TCP_BLOCK).unwrap();
        assert_eq!(event.timestamp, "Oct 19 12:34:56");
        assert_eq!(event.kind, EventKind::Block);
        assert_eq!(event.interface_in(), "eth0");
        assert_eq!(event.interface_out(), "");
        assert_eq!(event.source(), "203.0.113.7");
        assert_eq!(event.destination(), "192.0.2.10");
        assert_eq!(event.protocol(), "TCP");
        assert_eq!(event.source_port(), "51234");
        assert_eq!(event.destination_port(), "22");
        // Flags without '=' are not fields
        assert!(!event.fields.contains_key("SYN"));
    }

    #[test]
    fn test_udp_block_without_ports() {
        let line = "Oct 19 12:35:01 host kernel: [UFW BLOCK] IN=eth0 OUT= SRC=198.51.100.1 \
            DST=192.0.2.10 LEN=28 PROTO=UDP";
        let event = parse(line).unwrap();
        assert_eq!(event.protocol(), "UDP");
        assert_eq!(event.source_port(), "");
        assert_eq!(event.destination_port(), "");
        assert_eq!(event.field("NOPE"), "");
    }

    #[test]
    fn test_limit_block() {
        let line = "Oct 19 12:35:02 host kernel: [ 1.0] [UFW LIMIT BLOCK] IN=eth0 SRC=1.2.3.4 \
            DST=5.6.7.8 PROTO=TCP SPT=1 DPT=22";
        let event = parse(line).unwrap();
        assert_eq!(event.kind, EventKind::LimitBlock);
        assert_eq!(event.kind.as_str(), "LIMIT BLOCK");
    }

    #[test]
    fn test_non_block_lines_are_ignored() {
        assert!(parse("Oct 19 12:34:56 host kernel: eth0: link up").is_none());
        assert!(parse("Oct 19 12:34:56 host kernel: [ 8123.4] no tag here").is_none());
        assert!(parse(&TCP_BLOCK.replace("UFW BLOCK", "UFW ALLOW")).is_none());
        assert!(parse(&TCP_BLOCK.replace("UFW BLOCK", "UFW AUDIT")).is_none());
        assert!(parse("").is_none());
        assert!(parse("[] [ ]").is_none());
    }

    #[test]
    fn test_garbled_lines_do_not_panic() {
        assert!(parse("56 host kernel: [UFW BLO").is_none());
        assert!(parse("[[[[").is_none());
        assert!(parse("]]][UFW").is_none());
        let event = parse("x [UFW BLOCK] ==  =x SRC= é=1 DPT=80").unwrap();
        assert_eq!(event.source(), "");
        assert_eq!(event.destination_port(), "80");
        assert_eq!(event.fields.len(), 2);
    }

    #[test]
    fn test_parse_bytes_is_lossy() {
        let mut bytes = b"Oct 19 12:00:00 h kernel: [UFW BLOCK] SRC=10.0.0.1 X=".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        let event = parse_bytes(&bytes).unwrap();
        assert_eq!(event.source(), "10.0.0.1");
        assert_eq!(event.field("X"), "\u{fffd}\u{fffd}");
    }

    #[test]
    fn test_display_summary() {
        let event = parse(TCP_BLOCK).unwrap();
        assert_eq!(
            event.to_string(),
            "Oct 19 12:34:56 [BLOCK] TCP 203.0.113.7:51234 -> 192.0.2.10:22 in on eth0"
        );
    }
}
