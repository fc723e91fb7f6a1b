//! Stub DNS Server Module
//!
//! The DNS-protocol surface of the node: wire codec and the UDP stub
//! server that answers local processes at the well-known stub address.

pub mod server;
pub mod wire;

use std::net::Ipv4Addr;

pub use server::{run_dns_server, LOCAL_ANSWER_TTL};

/// The conventionally reserved address every node's stub resolver answers
/// on. This is the only nameserver ever written into the OS resolver file.
pub const STUB_RESOLVER_ADDR: Ipv4Addr = Ipv4Addr::new(100, 100, 100, 100);
