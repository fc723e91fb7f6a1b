//! Peer Directory
//!
//! Mesh-wide set of nodes and their name/address records, fed by the
//! control plane. Exposed to readers as immutable copy-on-write snapshots:
//! every mutation builds a fresh `DirectorySnapshot` and swaps the `Arc`,
//! so a query task holds one consistent generation for its whole lifetime
//! and never observes a torn update.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A node registered in the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Hostname, unique within the mesh (stored lowercase)
    pub hostname: String,

    /// Assigned addresses, at least one IPv4, deduplicated in order
    pub addresses: Vec<IpAddr>,

    /// Whether the node is currently online
    pub online: bool,
}

/// Node rejected by the directory.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("node hostname must not be empty")]
    EmptyHostname,

    #[error("node {0:?} has no IPv4 address")]
    NoIpv4(String),
}

impl Node {
    /// Build a validated node: hostname lowercased, addresses deduplicated
    /// preserving their configured order.
    pub fn new(hostname: &str, addresses: Vec<IpAddr>, online: bool) -> Result<Self, NodeError> {
        let hostname = hostname.trim().to_ascii_lowercase();
        if hostname.is_empty() {
            return Err(NodeError::EmptyHostname);
        }

        let mut deduped: Vec<IpAddr> = Vec::with_capacity(addresses.len());
        for addr in addresses {
            if !deduped.contains(&addr) {
                deduped.push(addr);
            }
        }

        if !deduped.iter().any(|a| a.is_ipv4()) {
            return Err(NodeError::NoIpv4(hostname));
        }

        Ok(Self {
            hostname,
            addresses: deduped,
            online,
        })
    }

    /// FQDN under the given base domain (bare hostname when it is empty)
    pub fn fqdn(&self, base_domain: &str) -> String {
        if base_domain.is_empty() {
            self.hostname.clone()
        } else {
            format!("{}.{}", self.hostname, base_domain.to_ascii_lowercase())
        }
    }
}

/// Immutable point-in-time view of the directory, indexed by FQDN.
#[derive(Debug, Default)]
pub struct DirectorySnapshot {
    serial: u64,
    by_fqdn: HashMap<String, Node>,
}

impl DirectorySnapshot {
    fn build(serial: u64, base_domain: &str, nodes: &HashMap<String, Node>) -> Self {
        let by_fqdn = nodes
            .values()
            .map(|node| (node.fqdn(base_domain), node.clone()))
            .collect();
        Self { serial, by_fqdn }
    }

    /// Look up a node by normalized (lowercase, no trailing dot) FQDN
    pub fn lookup(&self, fqdn: &str) -> Option<&Node> {
        self.by_fqdn.get(fqdn)
    }

    /// Generation counter of this snapshot
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn len(&self) -> usize {
        self.by_fqdn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fqdn.is_empty()
    }

    /// Iterate over (FQDN, node) pairs
    pub fn entries(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.by_fqdn.iter()
    }

    /// Count of nodes currently marked online
    pub fn online_count(&self) -> usize {
        self.by_fqdn.values().filter(|n| n.online).count()
    }
}

struct DirectoryInner {
    base_domain: String,
    nodes: HashMap<String, Node>,
    snapshot: Arc<DirectorySnapshot>,
}

/// The shared peer directory. Single writer (the control plane), many
/// concurrent readers via [`PeerDirectory::snapshot`].
pub struct PeerDirectory {
    inner: RwLock<DirectoryInner>,
}

impl PeerDirectory {
    pub fn new(base_domain: &str) -> Self {
        Self {
            inner: RwLock::new(DirectoryInner {
                base_domain: base_domain.to_ascii_lowercase(),
                nodes: HashMap::new(),
                snapshot: Arc::new(DirectorySnapshot::default()),
            }),
        }
    }

    /// Current immutable snapshot; cheap to clone, safe to hold across awaits
    pub async fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.inner.read().await.snapshot.clone()
    }

    /// Insert or replace a node (last-writer-wins keyed by hostname)
    pub async fn upsert(&self, node: Node) {
        let mut inner = self.inner.write().await;
        debug!("directory upsert: {}", node.hostname);
        inner.nodes.insert(node.hostname.clone(), node);
        bump(&mut inner);
    }

    /// Remove a node by hostname
    pub async fn remove(&self, hostname: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner.nodes.remove(&hostname.to_ascii_lowercase()).is_some();
        if removed {
            debug!("directory remove: {hostname}");
            bump(&mut inner);
        }
        removed
    }

    /// Replace the whole directory with a control-plane snapshot.
    ///
    /// The serial must be strictly newer than the current one; a stale
    /// serial means the update plumbing violated the full-replacement
    /// contract, so the existing snapshot is kept and a warning is the
    /// only observable effect. Returns whether the update was applied.
    pub async fn replace(&self, serial: u64, nodes: Vec<Node>) -> bool {
        let mut inner = self.inner.write().await;

        if serial <= inner.snapshot.serial {
            warn!(
                "stale directory snapshot: serial {serial} <= current {}, keeping current view",
                inner.snapshot.serial
            );
            return false;
        }

        inner.nodes = nodes
            .into_iter()
            .map(|node| (node.hostname.clone(), node))
            .collect();
        inner.snapshot = Arc::new(DirectorySnapshot::build(
            serial,
            &inner.base_domain,
            &inner.nodes,
        ));
        info!(
            "directory replaced: serial {serial}, {} nodes",
            inner.nodes.len()
        );
        true
    }

    /// Re-index FQDNs under a new base domain (policy change)
    pub async fn set_base_domain(&self, base_domain: &str) {
        let mut inner = self.inner.write().await;
        let base_domain = base_domain.to_ascii_lowercase();
        if inner.base_domain == base_domain {
            return;
        }
        inner.base_domain = base_domain;
        bump(&mut inner);
    }

    /// Number of nodes in the current snapshot
    pub async fn len(&self) -> usize {
        self.inner.read().await.nodes.len()
    }
}

fn bump(inner: &mut DirectoryInner) {
    let serial = inner.snapshot.serial + 1;
    inner.snapshot = Arc::new(DirectorySnapshot::build(
        serial,
        &inner.base_domain,
        &inner.nodes,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(hostname: &str, addr: &str) -> Node {
        Node::new(hostname, vec![addr.parse().unwrap()], true).unwrap()
    }

    #[test]
    fn test_node_requires_ipv4() {
        let v6_only = Node::new("v6only", vec!["fd7a::1".parse().unwrap()], true);
        assert!(matches!(v6_only, Err(NodeError::NoIpv4(_))));

        let mixed = Node::new(
            "mixed",
            vec!["fd7a::1".parse().unwrap(), "100.64.0.1".parse().unwrap()],
            true,
        );
        assert!(mixed.is_ok());
    }

    #[test]
    fn test_node_dedups_addresses_in_order() {
        let node = Node::new(
            "dup",
            vec![
                "100.64.0.1".parse().unwrap(),
                "100.64.0.2".parse().unwrap(),
                "100.64.0.1".parse().unwrap(),
            ],
            true,
        )
        .unwrap();

        assert_eq!(
            node.addresses,
            vec![
                "100.64.0.1".parse::<IpAddr>().unwrap(),
                "100.64.0.2".parse::<IpAddr>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_fqdn_with_and_without_base_domain() {
        let node = node("magicdns1", "100.64.0.1");
        assert_eq!(node.fqdn("mesh.example.net"), "magicdns1.mesh.example.net");
        assert_eq!(node.fqdn(""), "magicdns1");
    }

    #[tokio::test]
    async fn test_replace_and_lookup() {
        let directory = PeerDirectory::new("mesh.example.net");
        let applied = directory
            .replace(1, vec![node("magicdns1", "100.64.0.1")])
            .await;
        assert!(applied);

        let snapshot = directory.snapshot().await;
        let found = snapshot.lookup("magicdns1.mesh.example.net").unwrap();
        assert_eq!(found.addresses, vec!["100.64.0.1".parse::<IpAddr>().unwrap()]);
        assert!(snapshot.lookup("missing.mesh.example.net").is_none());
    }

    #[tokio::test]
    async fn test_stale_serial_keeps_current_snapshot() {
        let directory = PeerDirectory::new("mesh.example.net");
        assert!(directory.replace(5, vec![node("a", "100.64.0.1")]).await);

        // Same serial and older serial are both rejected
        assert!(!directory.replace(5, vec![node("b", "100.64.0.2")]).await);
        assert!(!directory.replace(3, vec![]).await);

        let snapshot = directory.snapshot().await;
        assert_eq!(snapshot.serial(), 5);
        assert!(snapshot.lookup("a.mesh.example.net").is_some());
        assert!(snapshot.lookup("b.mesh.example.net").is_none());
    }

    #[tokio::test]
    async fn test_readers_keep_their_generation() {
        let directory = PeerDirectory::new("mesh.example.net");
        directory.replace(1, vec![node("a", "100.64.0.1")]).await;

        let held = directory.snapshot().await;
        directory.replace(2, vec![node("b", "100.64.0.2")]).await;

        // The held snapshot still shows the old generation
        assert!(held.lookup("a.mesh.example.net").is_some());
        assert!(held.lookup("b.mesh.example.net").is_none());
        assert!(directory
            .snapshot()
            .await
            .lookup("b.mesh.example.net")
            .is_some());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_hostname() {
        let directory = PeerDirectory::new("mesh.example.net");
        directory.upsert(node("a", "100.64.0.1")).await;
        directory.upsert(node("a", "100.64.0.9")).await;

        let snapshot = directory.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        let found = snapshot.lookup("a.mesh.example.net").unwrap();
        assert_eq!(found.addresses, vec!["100.64.0.9".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_base_domain_reindex() {
        let directory = PeerDirectory::new("old.net");
        directory.upsert(node("a", "100.64.0.1")).await;

        directory.set_base_domain("new.net").await;
        let snapshot = directory.snapshot().await;
        assert!(snapshot.lookup("a.old.net").is_none());
        assert!(snapshot.lookup("a.new.net").is_some());
    }
}
