//! Input validation for ufwfe
//!
//! This module provides centralized validation for everything that ends up on
//! a `ufw` command line. The low-level checks return `Result<_, String>` with a
//! short reason; [`validate_rule`] lifts them into [`crate::Error::Validation`].

use crate::core::address::classify;
use crate::core::error::{Error, Result};
use crate::core::rule::{Protocol, Rule, is_any_port};

/// Most ports ufw accepts in one multiport list (a range counts as two)
pub const MAX_PORTS_PER_LIST: usize = 15;

/// Longest application profile name accepted
pub const MAX_APP_NAME_LEN: usize = 64;

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> std::result::Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates a port range.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - Start port is greater than end port
pub fn validate_port_range(start: u16, end: u16) -> std::result::Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if start > end {
        Err("Start port must be less than or equal to end port".to_string())
    } else {
        Ok((start, end))
    }
}

fn parse_port_number(text: &str) -> std::result::Result<u16, String> {
    let port: u16 = text
        .parse()
        .map_err(|_| format!("Bad port '{text}' (must be between 1 and 65535)"))?;
    validate_port(port)
}

/// Shape of a validated port spec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    Any,
    Single,
    /// A range or a comma-separated list
    Multiple,
}

impl PortSpec {
    /// ufw only accepts ranges and lists together with tcp or udp
    pub fn needs_protocol(self) -> bool {
        self == PortSpec::Multiple
    }
}

/// Validates a port spec: `any`, `N`, `N:M` or a comma list of those.
///
/// # Errors
///
/// Returns `Err` on non-numeric ports, ports outside 1-65535, reversed ranges,
/// empty list entries or lists longer than [`MAX_PORTS_PER_LIST`].
pub fn validate_port_spec(spec: &str) -> std::result::Result<PortSpec, String> {
    if is_any_port(spec) {
        return Ok(PortSpec::Any);
    }

    let mut count = 0;
    let mut shape = PortSpec::Single;
    for part in spec.split(',') {
        if let Some((start, end)) = part.split_once(':') {
            validate_port_range(parse_port_number(start)?, parse_port_number(end)?)?;
            count += 2;
            shape = PortSpec::Multiple;
        } else {
            parse_port_number(part)?;
            count += 1;
        }
    }

    if spec.contains(',') {
        shape = PortSpec::Multiple;
    }
    if count > MAX_PORTS_PER_LIST {
        return Err(format!(
            "Too many ports in '{spec}' (max {MAX_PORTS_PER_LIST})"
        ));
    }

    Ok(shape)
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// A trailing `+` is accepted as the iptables wildcard (`eth+`).
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> std::result::Result<String, String> {
    if name.is_empty() {
        return Ok(String::new());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    let stem = name.strip_suffix('+').unwrap_or(name);
    if stem.is_empty() || stem == "." || stem == ".." {
        return Err("Invalid interface name".to_string());
    }

    // ASCII alphanumeric only, plus dot, dash, underscore
    if !stem
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates an application profile name.
///
/// Names may contain spaces (`Apache Full`) but never quotes, which would break
/// the exported script, or control characters.
///
/// # Errors
///
/// Returns `Err` if the name is empty, too long, or contains quotes or control
/// characters.
pub fn validate_app_name(name: &str) -> std::result::Result<String, String> {
    if name.trim().is_empty() {
        return Err("Application name cannot be empty".to_string());
    }

    if name.chars().count() > MAX_APP_NAME_LEN {
        return Err(format!(
            "Application name too long (max {MAX_APP_NAME_LEN} characters)"
        ));
    }

    if name
        .chars()
        .any(|c| c.is_control() || matches!(c, '\'' | '"' | '`'))
    {
        return Err("Application name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

fn validate_side(
    field: &str,
    app: Option<&str>,
    port: &str,
    protocol: Protocol,
) -> Result<()> {
    let port_field = format!("{field}_port");

    if let Some(app) = app {
        validate_app_name(app).map_err(|m| Error::validation(format!("{field}_app"), m))?;
        // After storage fixup the port carries the app name
        if !is_any_port(port) && port != app {
            return Err(Error::validation(
                port_field,
                "A port and an application cannot be combined",
            ));
        }
        return Ok(());
    }

    let spec = validate_port_spec(port).map_err(|m| Error::validation(&port_field, m))?;
    if spec.needs_protocol() && protocol == Protocol::Any {
        return Err(Error::validation(
            port_field,
            format!("Port ranges and lists need a protocol (tcp or udp): '{port}'"),
        ));
    }
    Ok(())
}

/// Validates everything about a rule that can be checked without the store.
///
/// Run before any store mutation; a failure leaves the store untouched.
///
/// # Errors
///
/// Returns [`Error::Validation`] naming the offending field.
pub fn validate_rule(rule: &Rule) -> Result<()> {
    classify(&rule.source_address).map_err(|_| {
        Error::validation(
            "source_address",
            format!("Bad source address '{}'", rule.source_address),
        )
    })?;
    classify(&rule.destination_address).map_err(|_| {
        Error::validation(
            "destination_address",
            format!("Bad destination address '{}'", rule.destination_address),
        )
    })?;

    validate_side(
        "source",
        rule.source_app.as_deref(),
        &rule.source_port,
        rule.protocol,
    )?;
    validate_side(
        "destination",
        rule.destination_app.as_deref(),
        &rule.destination_port,
        rule.protocol,
    )?;

    for (field, iface) in [
        ("interface_in", &rule.interface_in),
        ("interface_out", &rule.interface_out),
    ] {
        if let Some(name) = iface {
            if name.is_empty() {
                return Err(Error::validation(field, "Interface name cannot be empty"));
            }
            validate_interface(name).map_err(|m| Error::validation(field, m))?;
        }
    }

    Ok(())
}

/// Checks if a port is well-known and returns informational message.
///
/// This is informational only and does not block saving.
pub fn check_well_known_port(port: u16) -> Option<String> {
    if port <= 1024 {
        let name = match port {
            22 => "SSH",
            80 => "HTTP",
            443 => "HTTPS",
            53 => "DNS",
            25 => "SMTP",
            21 => "FTP",
            _ => return Some(format!("Privileged port {} (requires admin)", port)),
        };
        Some(format!("Port {}: {}", port, name))
    } else {
        None
    }
}

/// Checks if an IP is in a reserved range and returns informational warning.
///
/// This is informational only and does not block saving.
pub fn check_reserved_ip(ip: ipnetwork::IpNetwork) -> Option<String> {
    use std::net::IpAddr;

    match ip.ip() {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();

            // RFC 1918 private ranges
            if ipv4.is_private() {
                return Some("Private IP range (RFC 1918) - usually safe for LAN".to_string());
            }

            if octets[0] == 127 {
                return Some("Loopback range (127.x) - ufw always allows loopback".to_string());
            }

            if ipv4.is_link_local() {
                return Some("Link-local range (169.254.x.x) - APIPA addresses".to_string());
            }

            None
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() {
                return Some("IPv6 loopback (::1) - ufw always allows loopback".to_string());
            }

            if ipv6.segments()[0] & 0xffc0 == 0xfe80 {
                return Some("IPv6 link-local (fe80::/10) - local network only".to_string());
            }

            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rule::{Action, Direction};

    #[test]
    fn test_validate_port_zero() {
        assert!(validate_port(0).is_err());
    }

    #[test]
    fn test_validate_port_range_invalid() {
        assert!(validate_port_range(0, 100).is_err());
        assert!(validate_port_range(100, 50).is_err());
        assert_eq!(validate_port_range(8000, 9000).unwrap(), (8000, 9000));
    }

    #[test]
    fn test_port_spec_shapes() {
        assert_eq!(validate_port_spec("any").unwrap(), PortSpec::Any);
        assert_eq!(validate_port_spec("22").unwrap(), PortSpec::Single);
        assert_eq!(validate_port_spec("6000:6007").unwrap(), PortSpec::Multiple);
        assert_eq!(validate_port_spec("80,443").unwrap(), PortSpec::Multiple);
        assert_eq!(
            validate_port_spec("80,443,8000:8080").unwrap(),
            PortSpec::Multiple
        );
    }

    #[test]
    fn test_port_spec_rejects() {
        assert!(validate_port_spec("0").is_err());
        assert!(validate_port_spec("70000").is_err());
        assert!(validate_port_spec("ssh").is_err());
        assert!(validate_port_spec("80,").is_err());
        assert!(validate_port_spec("9000:8000").is_err());
        assert!(validate_port_spec("-1").is_err());
    }

    #[test]
    fn test_port_spec_list_limit() {
        let fifteen = (1..=15).map(|p| p.to_string()).collect::<Vec<_>>().join(",");
        assert!(validate_port_spec(&fifteen).is_ok());
        let sixteen = format!("{fifteen},16");
        assert!(validate_port_spec(&sixteen).is_err());
        // Each range counts twice
        let ranges = (0..8)
            .map(|i| format!("{}:{}", i * 10 + 1, i * 10 + 2))
            .collect::<Vec<_>>()
            .join(",");
        assert!(validate_port_spec(&ranges).is_err());
    }

    #[test]
    fn test_validate_interface() {
        assert!(validate_interface("eth0").is_ok());
        assert!(validate_interface("br0.100").is_ok());
        assert!(validate_interface("wlan_2").is_ok());
        assert!(validate_interface("eth+").is_ok());
        assert!(validate_interface("").is_ok());
        assert!(validate_interface("+").is_err());
        assert!(validate_interface(".").is_err());
        assert!(validate_interface("..").is_err());
        assert!(validate_interface("eth0 ; rm -rf /").is_err());
        assert!(validate_interface("eth+0").is_err());
        assert!(validate_interface(&"a".repeat(16)).is_err());
        assert!(validate_interface(&"a".repeat(15)).is_ok());
    }

    #[test]
    fn test_validate_app_name() {
        assert!(validate_app_name("OpenSSH").is_ok());
        assert!(validate_app_name("Apache Full").is_ok());
        assert!(validate_app_name("").is_err());
        assert!(validate_app_name("   ").is_err());
        assert!(validate_app_name("it's").is_err());
        assert!(validate_app_name("a\nb").is_err());
        assert!(validate_app_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_rule_accepts_common_rules() {
        let ssh = Rule::new(Action::Allow)
            .with_destination_port("22")
            .with_protocol(Protocol::Tcp);
        assert!(validate_rule(&ssh).is_ok());

        let app = Rule::new(Action::Allow).with_destination_app("Apache Full");
        assert!(validate_rule(&app).is_ok());

        let stored_app = app.clone().with_destination_port("Apache Full");
        assert!(validate_rule(&stored_app).is_ok());

        let out = Rule::new(Action::Deny)
            .with_direction(Direction::Out)
            .with_destination("10.0.0.0/8")
            .with_interface_out("eth0");
        assert!(validate_rule(&out).is_ok());
    }

    #[test]
    fn test_validate_rule_rejects_range_without_protocol() {
        let rule = Rule::new(Action::Allow).with_destination_port("6000:6007");
        let err = validate_rule(&rule).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "destination_port"));
    }

    #[test]
    fn test_validate_rule_rejects_port_with_app() {
        let rule = Rule::new(Action::Allow)
            .with_source_app("OpenSSH")
            .with_source_port("22");
        let err = validate_rule(&rule).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "source_port"));
    }

    #[test]
    fn test_validate_rule_rejects_bad_address_and_interface() {
        let bad_addr = Rule::new(Action::Allow).with_source("10.0.0.999");
        assert!(validate_rule(&bad_addr).unwrap_err().is_validation());

        let bad_iface = Rule::new(Action::Allow).with_interface_in("eth0;");
        assert!(validate_rule(&bad_iface).is_err());

        let empty_iface = Rule::new(Action::Allow).with_interface_in("");
        assert!(validate_rule(&empty_iface).is_err());
    }

    #[test]
    fn test_check_well_known_port() {
        assert!(check_well_known_port(22).unwrap().contains("SSH"));
        assert!(check_well_known_port(999).unwrap().contains("Privileged"));
        assert!(check_well_known_port(8080).is_none());
    }

    #[test]
    fn test_check_reserved_ip() {
        let private = check_reserved_ip("192.168.1.0/24".parse().unwrap());
        assert!(private.unwrap().contains("RFC 1918"));
        let loopback = check_reserved_ip("127.0.0.1/8".parse().unwrap());
        assert!(loopback.unwrap().contains("Loopback"));
        let link_local = check_reserved_ip("fe80::1/64".parse().unwrap());
        assert!(link_local.unwrap().contains("link-local"));
        assert!(check_reserved_ip("8.8.8.8/32".parse().unwrap()).is_none());
    }
}
