//! Record Resolver
//!
//! Maps a queried name to an answer using an explicit ordered chain of
//! strategies: directory (MagicDNS) -> static records -> split-horizon
//! upstreams -> global upstreams. The local steps are pure functions of
//! (name, snapshot, policy); the forwarding steps relay the upstream's
//! literal wire answer.

mod upstream;

pub use upstream::{ForwardError, UdpUpstream, Upstream};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::directory::{DirectorySnapshot, PeerDirectory};
use crate::dns::wire::{self, RCODE_NOERROR, RCODE_NXDOMAIN};
use crate::policy::{DnsPolicy, PolicyHandle};

/// Which strategy produced an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Directory,
    Static,
    Split,
    Global,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Directory => "directory",
            Source::Static => "static",
            Source::Split => "split",
            Source::Global => "global",
        }
    }
}

/// Outcome of one resolution, recomputed per query
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Directory or static hit, synthesized locally
    Answer {
        addresses: Vec<IpAddr>,
        source: Source,
    },

    /// Upstream's literal response bytes, relayed unmodified
    Relayed { payload: Vec<u8>, source: Source },

    /// Name unknown and no upstream configured to ask
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Every candidate resolver in the applicable list failed.
    /// Surfaced to DNS clients as SERVFAIL, never as a dropped query.
    #[error("all candidate resolvers exhausted for {name:?}")]
    ResolutionFailed { name: String },
}

/// Strip the trailing dot and lowercase, per the resolution contract
pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Directory lookup, gated by the MagicDNS toggle.
/// Pure in (name, snapshot, policy).
fn match_directory(
    name: &str,
    snapshot: &DirectorySnapshot,
    policy: &DnsPolicy,
) -> Option<Vec<IpAddr>> {
    if !policy.magic_dns {
        return None;
    }
    snapshot.lookup(name).map(|node| node.addresses.clone())
}

/// Static extra-record lookup. Pure in (name, policy).
fn match_static(name: &str, policy: &DnsPolicy) -> Option<Vec<IpAddr>> {
    policy.static_record(name).map(|r| dedup(&r.addresses))
}

fn dedup(addresses: &[IpAddr]) -> Vec<IpAddr> {
    let mut out = Vec::with_capacity(addresses.len());
    for addr in addresses {
        if !out.contains(addr) {
            out.push(*addr);
        }
    }
    out
}

/// The per-node resolver shared by the stub server and the HTTP API.
pub struct Resolver {
    directory: Arc<PeerDirectory>,
    policy: Arc<PolicyHandle>,
    upstream: Arc<dyn Upstream>,
    upstream_port: u16,
    upstream_timeout: Duration,
}

impl Resolver {
    pub fn new(
        directory: Arc<PeerDirectory>,
        policy: Arc<PolicyHandle>,
        upstream: Arc<dyn Upstream>,
        upstream_port: u16,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            policy,
            upstream,
            upstream_port,
            upstream_timeout,
        }
    }

    /// Resolve a query name against the current snapshot and policy.
    ///
    /// `raw_query` is the client's original packet; it is what gets relayed
    /// upstream so forwarded answers keep the client's transaction id and
    /// the upstream's TTLs.
    pub async fn resolve(&self, name: &str, raw_query: &[u8]) -> Result<Resolution, ResolveError> {
        let name = normalize_name(name);
        let snapshot = self.directory.snapshot().await;
        let policy = self.policy.current().await;

        if let Some(addresses) = match_directory(&name, &snapshot, &policy) {
            debug!("resolved {name} from directory (serial {})", snapshot.serial());
            return Ok(Resolution::Answer {
                addresses,
                source: Source::Directory,
            });
        }

        if let Some(addresses) = match_static(&name, &policy) {
            debug!("resolved {name} from static records");
            return Ok(Resolution::Answer {
                addresses,
                source: Source::Static,
            });
        }

        if let Some(resolvers) = policy.split_resolvers(&name) {
            let resolvers = resolvers.to_vec();
            let payload = self.forward(&name, raw_query, &resolvers).await?;
            return Ok(Resolution::Relayed {
                payload,
                source: Source::Split,
            });
        }

        if !policy.global_nameservers.is_empty() {
            let payload = self
                .forward(&name, raw_query, &policy.global_nameservers)
                .await?;
            return Ok(Resolution::Relayed {
                payload,
                source: Source::Global,
            });
        }

        Ok(Resolution::NotFound)
    }

    /// First-success forwarding: try resolvers in order, accept the first
    /// well-formed non-error answer (NOERROR and NXDOMAIN both count; an
    /// authoritative negative is still an answer), exhaust the list before
    /// failing. A timeout is just that resolver's failure.
    async fn forward(
        &self,
        name: &str,
        raw_query: &[u8],
        resolvers: &[IpAddr],
    ) -> Result<Vec<u8>, ResolveError> {
        for resolver in resolvers {
            let server = SocketAddr::new(*resolver, self.upstream_port);
            match self
                .upstream
                .exchange(server, raw_query, self.upstream_timeout)
                .await
            {
                Ok(payload) => {
                    match wire::response_code(&payload) {
                        Some(RCODE_NOERROR) | Some(RCODE_NXDOMAIN) => return Ok(payload),
                        rcode => {
                            debug!("upstream {server} rejected {name:?} with rcode {rcode:?}")
                        }
                    }
                }
                Err(err) => debug!("upstream {server} failed for {name:?}: {err}"),
            }
        }

        Err(ResolveError::ResolutionFailed {
            name: name.to_string(),
        })
    }
}
