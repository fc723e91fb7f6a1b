//! DNS Policy
//!
//! The per-node DNS policy pushed by the control plane: base domain,
//! MagicDNS toggle, upstream nameservers (global and split-horizon),
//! search domains and static extra records.
//!
//! Resolution and resolv.conf synthesis depend only on this structure,
//! never on whatever representation the control plane used to transport it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A static DNS record configured alongside the peer directory.
///
/// Answers for `name` are served locally with the configured addresses,
/// taking priority over split/global forwarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRecord {
    /// Fully-qualified record name (case-insensitive)
    pub name: String,

    /// Addresses returned for this name
    pub addresses: Vec<IpAddr>,
}

/// Per-node DNS policy, delivered as a full-replacement snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsPolicy {
    /// Base domain appended to hostnames to form FQDNs.
    /// Empty disables suffixing entirely.
    #[serde(default)]
    pub base_domain: String,

    /// Whether peer hostnames are resolvable via the directory
    #[serde(default)]
    pub magic_dns: bool,

    /// Ordered list of global upstream resolvers (empty = none)
    #[serde(default)]
    pub global_nameservers: Vec<IpAddr>,

    /// Split-horizon resolvers: domain suffix -> ordered resolver list
    #[serde(default)]
    pub split_nameservers: BTreeMap<String, Vec<IpAddr>>,

    /// Extra search domains, appended after the base domain
    #[serde(default)]
    pub search_domains: Vec<String>,

    /// Static records served locally
    #[serde(default)]
    pub extra_records: Vec<StaticRecord>,
}

/// Policy validation failure. Rejected at load/synthesis time; the
/// previously applied policy and resolver file stay in place.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid policy: base domain {0:?} must not start or end with a dot")]
    MalformedBaseDomain(String),

    #[error("invalid policy: split nameserver domain must not be empty")]
    EmptySplitDomain,

    #[error("invalid policy: split domain {0:?} has an empty resolver list")]
    EmptySplitResolvers(String),

    #[error("invalid policy: static record {0:?} has no addresses")]
    EmptyStaticRecord(String),

    #[error("invalid policy: static record name must not be empty")]
    UnnamedStaticRecord,

    #[error("invalid policy: search domain must not be empty")]
    EmptySearchDomain,
}

impl DnsPolicy {
    /// Validate the policy. Called before it is applied or synthesized.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.base_domain.starts_with('.') || self.base_domain.ends_with('.') {
            return Err(PolicyError::MalformedBaseDomain(self.base_domain.clone()));
        }

        for (domain, resolvers) in &self.split_nameservers {
            if domain.trim_matches('.').is_empty() {
                return Err(PolicyError::EmptySplitDomain);
            }
            if resolvers.is_empty() {
                return Err(PolicyError::EmptySplitResolvers(domain.clone()));
            }
        }

        for record in &self.extra_records {
            if record.name.trim_matches('.').is_empty() {
                return Err(PolicyError::UnnamedStaticRecord);
            }
            if record.addresses.is_empty() {
                return Err(PolicyError::EmptyStaticRecord(record.name.clone()));
            }
        }

        if self.search_domains.iter().any(|d| d.trim().is_empty()) {
            return Err(PolicyError::EmptySearchDomain);
        }

        Ok(())
    }

    /// Whether the OS resolver should be pointed at the local stub at all.
    ///
    /// MagicDNS gates only the directory-lookup step of resolution; any of
    /// these settings justifies running (and advertising) the stub.
    pub fn needs_local_resolver(&self) -> bool {
        self.magic_dns
            || !self.base_domain.is_empty()
            || !self.global_nameservers.is_empty()
            || !self.split_nameservers.is_empty()
    }

    /// Look up a static record by normalized (lowercase, no trailing dot) name
    pub fn static_record(&self, name: &str) -> Option<&StaticRecord> {
        self.extra_records
            .iter()
            .find(|r| r.name.trim_end_matches('.').eq_ignore_ascii_case(name))
    }

    /// Find the split-horizon resolver list for a name, if any.
    ///
    /// Matches the name itself or any parent suffix; the longest configured
    /// suffix wins so `internal.corp.example` beats `example`.
    pub fn split_resolvers(&self, name: &str) -> Option<&[IpAddr]> {
        let mut best: Option<(&str, &Vec<IpAddr>)> = None;

        for (domain, resolvers) in &self.split_nameservers {
            let suffix = domain.trim_matches('.').to_ascii_lowercase();
            let matches = name == suffix || name.ends_with(&format!(".{suffix}"));
            if matches && best.map_or(true, |(d, _)| suffix.len() > d.len()) {
                best = Some((domain.trim_matches('.'), resolvers));
            }
        }

        best.map(|(_, resolvers)| resolvers.as_slice())
    }
}

/// Shared handle to the currently applied policy.
///
/// Replacement swaps an `Arc`, so in-flight queries keep the policy they
/// started with and never observe a torn update.
pub struct PolicyHandle {
    inner: RwLock<Arc<DnsPolicy>>,
}

impl PolicyHandle {
    pub fn new(policy: DnsPolicy) -> Self {
        Self {
            inner: RwLock::new(Arc::new(policy)),
        }
    }

    /// Get the current policy snapshot
    pub async fn current(&self) -> Arc<DnsPolicy> {
        self.inner.read().await.clone()
    }

    /// Atomically replace the policy
    pub async fn replace(&self, policy: DnsPolicy) {
        *self.inner.write().await = Arc::new(policy);
    }
}
