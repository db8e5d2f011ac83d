//! Address family classification
//!
//! Decides whether a rule applies to IPv4, IPv6 or both from its address
//! literals. A rule cannot match "from an IPv4 host" and "to an IPv6 host" at
//! the same time, so mixed families are rejected.

use crate::core::error::{Error, Result};
use crate::core::rule::{IpVersion, is_any_address};
use ipnetwork::IpNetwork;

/// Family of a single address literal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Any,
    V4,
    V6,
}

/// Classifies an address literal (plain address or CIDR).
///
/// # Errors
///
/// Returns [`Error::Validation`] if the literal is neither an any-sentinel nor
/// a valid IPv4/IPv6 address or network.
pub fn classify(address: &str) -> Result<AddressFamily> {
    if is_any_address(address) {
        return Ok(AddressFamily::Any);
    }

    let network: IpNetwork = address
        .parse()
        .map_err(|e| Error::validation("address", format!("'{address}': {e}")))?;

    Ok(if network.is_ipv4() {
        AddressFamily::V4
    } else {
        AddressFamily::V6
    })
}

/// Resolves which IP versions a rule between `source` and `destination` targets.
///
/// # Errors
///
/// Returns [`Error::MixedAddressFamily`] if one side is IPv4 and the other IPv6,
/// or [`Error::Validation`] if either literal is malformed.
pub fn resolve_ip_version(source: &str, destination: &str) -> Result<IpVersion> {
    let from = classify(source)?;
    let to = classify(destination)?;

    match (from, to) {
        (AddressFamily::Any, AddressFamily::Any) => Ok(IpVersion::Both),
        (AddressFamily::V4, AddressFamily::V6) | (AddressFamily::V6, AddressFamily::V4) => {
            Err(Error::MixedAddressFamily {
                source_address: source.to_string(),
                destination_address: destination.to_string(),
            })
        }
        (AddressFamily::V4, _) | (_, AddressFamily::V4) => Ok(IpVersion::V4),
        (AddressFamily::V6, _) | (_, AddressFamily::V6) => Ok(IpVersion::V6),
    }
}
