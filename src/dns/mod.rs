//! DNS Server Module
//!
//! Answers DNS queries for the seed zone with addresses of fresh Lightning
//! nodes drawn from the network view.
//!
//! ## DNS Records
//!
//! - A records: IPv4 addresses of sampled nodes
//! - AAAA records: IPv6 addresses of sampled nodes
//! - ANY: both of the above in one response

mod handler;
pub mod message;
mod server;

pub use handler::SeedDnsHandler;
pub use server::DnsServer;
