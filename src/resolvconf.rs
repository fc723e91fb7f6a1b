//! Resolver-Config Synthesizer
//!
//! Deterministic mapping from the DNS policy to the OS resolver file.
//! The OS is only ever pointed at the local stub; configured upstreams are
//! consumed internally by the stub server and never written out here.

use std::path::Path;
use tracing::{debug, info};

use crate::dns::STUB_RESOLVER_ADDR;
use crate::policy::{DnsPolicy, PolicyError};

/// Fixed boilerplate prepended to every synthesized file
const RESOLV_CONF_HEADER: &str = "\
# resolv.conf(5) file generated by meshdns
# This file is rewritten whenever the mesh DNS policy changes
# DO NOT EDIT THIS FILE BY HAND -- CHANGES WILL BE OVERWRITTEN
";

/// Synthesize the resolver file content for a policy.
///
/// Pure and total: identical policies produce byte-identical output.
/// Returns `None` when the policy needs no local resolver at all, in which
/// case the host's pre-existing resolver file must be left untouched.
pub fn synthesize(policy: &DnsPolicy) -> Result<Option<String>, PolicyError> {
    policy.validate()?;

    if !policy.needs_local_resolver() {
        return Ok(None);
    }

    let mut lines = vec![format!("nameserver {STUB_RESOLVER_ADDR}")];

    // The base domain anchors the search list; extras alone emit nothing
    if !policy.base_domain.is_empty() {
        let mut search = vec![policy.base_domain.clone()];
        search.extend(policy.search_domains.iter().cloned());
        lines.push(format!("search {}", search.join(" ")));
    }

    let body: String = lines
        .iter()
        .map(|line| format!("{}\n", line.trim_end()))
        .collect();

    Ok(Some(format!("{RESOLV_CONF_HEADER}{body}")))
}

/// Synthesize and apply the resolver file for a policy.
///
/// The write is an atomic replace (temp file + rename), so other processes
/// never observe a partial file. An invalid policy leaves the previous
/// file in place.
pub async fn apply(policy: &DnsPolicy, path: &Path) -> Result<(), anyhow::Error> {
    match synthesize(policy)? {
        Some(content) => {
            write_atomic(path, content.as_bytes()).await?;
            info!("resolver file written to {path:?}");
        }
        None => {
            debug!("policy needs no local resolver, leaving {path:?} untouched");
        }
    }
    Ok(())
}

async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StaticRecord;
    use std::net::IpAddr;

    fn ns(addr: &str) -> IpAddr {
        addr.parse().unwrap()
    }

    #[test]
    fn test_no_config_emits_nothing() {
        let policy = DnsPolicy::default();
        assert_eq!(synthesize(&policy).unwrap(), None);
    }

    #[test]
    fn test_global_only_emits_stub_line_never_raw_upstreams() {
        let mut policy = DnsPolicy::default();
        policy.global_nameservers = vec![ns("8.8.8.8"), ns("1.1.1.1")];

        let content = synthesize(&policy).unwrap().unwrap();
        let want = "\
# resolv.conf(5) file generated by meshdns
# This file is rewritten whenever the mesh DNS policy changes
# DO NOT EDIT THIS FILE BY HAND -- CHANGES WILL BE OVERWRITTEN
nameserver 100.100.100.100
";
        assert_eq!(content, want);
        assert!(!content.contains("8.8.8.8"));
        assert!(!content.contains("1.1.1.1"));
    }

    #[test]
    fn test_base_domain_emits_search_line() {
        let mut policy = DnsPolicy::default();
        policy.base_domain = "very-unique-domain.net".to_string();

        let content = synthesize(&policy).unwrap().unwrap();
        let want = "\
# resolv.conf(5) file generated by meshdns
# This file is rewritten whenever the mesh DNS policy changes
# DO NOT EDIT THIS FILE BY HAND -- CHANGES WILL BE OVERWRITTEN
nameserver 100.100.100.100
search very-unique-domain.net
";
        assert_eq!(content, want);
    }

    #[test]
    fn test_magic_dns_off_with_base_domain_still_emits() {
        let mut policy = DnsPolicy::default();
        policy.magic_dns = false;
        policy.base_domain = "very-unique-domain.net".to_string();

        let content = synthesize(&policy).unwrap().unwrap();
        assert!(content.contains("nameserver 100.100.100.100"));
        assert!(content.contains("search very-unique-domain.net"));
    }

    #[test]
    fn test_search_domain_ordering_base_first() {
        let mut policy = DnsPolicy::default();
        policy.base_domain = "with-local-dns.net".to_string();
        policy.search_domains = vec!["test1.no".to_string(), "test2.no".to_string()];

        let content = synthesize(&policy).unwrap().unwrap();
        assert!(content.contains("search with-local-dns.net test1.no test2.no\n"));
    }

    #[test]
    fn test_extra_search_domains_without_base_domain_are_omitted() {
        let mut policy = DnsPolicy::default();
        policy.magic_dns = true; // stub line still needed
        policy.search_domains = vec!["test1.no".to_string()];

        let content = synthesize(&policy).unwrap().unwrap();
        assert!(content.contains("nameserver 100.100.100.100"));
        assert!(!content.contains("search"));
    }

    #[test]
    fn test_split_nameservers_never_leak_into_the_file() {
        let mut policy = DnsPolicy::default();
        policy.base_domain = "with-local-dns.net".to_string();
        policy
            .split_nameservers
            .insert("foo.bar.com".to_string(), vec![ns("1.1.1.1")]);

        let content = synthesize(&policy).unwrap().unwrap();
        let want = "\
# resolv.conf(5) file generated by meshdns
# This file is rewritten whenever the mesh DNS policy changes
# DO NOT EDIT THIS FILE BY HAND -- CHANGES WILL BE OVERWRITTEN
nameserver 100.100.100.100
search with-local-dns.net
";
        assert_eq!(content, want);
        assert!(!content.contains("foo.bar.com"));
        assert!(!content.contains("1.1.1.1"));
    }

    #[test]
    fn test_full_policy_no_magic_dns() {
        let mut policy = DnsPolicy::default();
        policy.magic_dns = false;
        policy.base_domain = "all-of.it".to_string();
        policy.global_nameservers = vec![ns("8.8.8.8")];
        policy.search_domains = vec!["test1.no".to_string(), "test2.no".to_string()];

        let content = synthesize(&policy).unwrap().unwrap();
        let want = "\
# resolv.conf(5) file generated by meshdns
# This file is rewritten whenever the mesh DNS policy changes
# DO NOT EDIT THIS FILE BY HAND -- CHANGES WILL BE OVERWRITTEN
nameserver 100.100.100.100
search all-of.it test1.no test2.no
";
        assert_eq!(content, want);
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let mut policy = DnsPolicy::default();
        policy.base_domain = "mesh.example.net".to_string();
        policy.magic_dns = true;
        policy.global_nameservers = vec![ns("8.8.8.8")];
        policy.extra_records.push(StaticRecord {
            name: "prometheus.myvpn.example.com".to_string(),
            addresses: vec![ns("100.64.0.4")],
        });

        let first = synthesize(&policy).unwrap();
        let second = synthesize(&policy).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_policy_rejected_at_synthesis() {
        let mut policy = DnsPolicy::default();
        policy
            .split_nameservers
            .insert("foo.bar.com".to_string(), vec![]);
        assert!(synthesize(&policy).is_err());
    }

    #[tokio::test]
    async fn test_apply_writes_atomically_and_preserves_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolv.conf");

        let mut policy = DnsPolicy::default();
        policy.base_domain = "mesh.example.net".to_string();
        apply(&policy, &path).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("nameserver 100.100.100.100"));

        // Invalid policy must leave the previous file in place
        let mut broken = policy.clone();
        broken
            .split_nameservers
            .insert("foo.bar.com".to_string(), vec![]);
        assert!(apply(&broken, &path).await.is_err());

        let after = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, after);

        // No temp file left behind
        assert!(!dir.path().join("resolv.tmp").exists());
    }

    #[tokio::test]
    async fn test_apply_no_config_leaves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolv.conf");
        tokio::fs::write(&path, "nameserver 127.0.0.53\n")
            .await
            .unwrap();

        apply(&DnsPolicy::default(), &path).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "nameserver 127.0.0.53\n");
        assert!(!content.contains("100.100.100.100"));
    }
}
