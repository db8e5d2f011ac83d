//! Core firewall management functionality
//!
//! - [`rule`]: Rule data structures
//! - [`address`]: IP version resolution from address literals
//! - [`normalize`]: Storage fix-ups and display formatting
//! - [`store`]: The rule store contract and an in-process store
//! - [`controller`]: Ordered insert/update/move/delete over a store
//! - [`script`]: Shell script export and import
//! - [`events`]: Firewall log line parsing
//! - [`tailer`]: Log file tailing with backlog replay
//! - [`profiles`]: Application profile parsing
//! - [`ufw`]: The ufw command-line adapter
//! - [`error`]: Error types for firewall operations

pub mod address;
pub mod controller;
pub mod error;
pub mod events;
pub mod normalize;
pub mod profiles;
pub mod rule;
pub mod script;
pub mod store;
pub mod tailer;
pub mod ufw;

#[cfg(test)]
pub mod test_helpers;

#[cfg(test)]
mod tests;
