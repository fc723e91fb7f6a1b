//! Service Configuration
//!
//! Startup configuration for the node's DNS subsystem: listen ports,
//! upstream transport limits, the resolver-file path and the initial DNS
//! policy. Runtime changes arrive through the control-plane API instead.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::policy::DnsPolicy;

/// Main configuration for the meshdns service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    // === Network ===

    /// Port for the stub DNS server
    pub dns_port: u16,

    /// Port for the HTTP control/observability API
    pub api_port: u16,

    /// Destination port for upstream DNS exchanges
    pub upstream_port: u16,

    // === Timing ===

    /// Per-resolver timeout for one upstream exchange (milliseconds).
    /// Exceeding it fails over to the next configured resolver.
    pub upstream_timeout_ms: u64,

    // === Files ===

    /// Path of the OS resolver file this service synthesizes
    pub resolv_conf_path: PathBuf,

    // === Policy ===

    /// Initial DNS policy, replaced at runtime via the API
    #[serde(default)]
    pub policy: DnsPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            dns_port: 53,
            api_port: 8080,
            upstream_port: 53,
            upstream_timeout_ms: 2000,
            resolv_conf_path: PathBuf::from("/etc/resolv.conf"),
            policy: DnsPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_dns_port(mut self, port: u16) -> Self {
        self.dns_port = port;
        self
    }

    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api_port = port;
        self
    }

    pub fn with_resolv_conf_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.resolv_conf_path = path;
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upstream_timeout_ms == 0 {
            anyhow::bail!("upstream_timeout_ms must be greater than zero");
        }

        if self.dns_port == self.api_port {
            anyhow::bail!(
                "dns_port and api_port must differ (both set to {})",
                self.dns_port
            );
        }

        self.policy.validate()?;
        Ok(())
    }
}
