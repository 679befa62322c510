//! DNS Seed Configuration
//!
//! Configurable parameters for the seed service, loaded from TOML and
//! overridden from the command line.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::types::Realm;

/// Which Lightning network(s) to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NetworkSelection {
    Bitcoin,
    Testnet,
    All,
}

impl NetworkSelection {
    /// Served realms with the lightningd network directory each is read from.
    /// The first entry is the default realm for names without `r<N>`.
    pub fn realms(self) -> Vec<(Realm, &'static str)> {
        match self {
            NetworkSelection::Bitcoin => vec![(0, "bitcoin")],
            NetworkSelection::Testnet => vec![(1, "testnet")],
            NetworkSelection::All => vec![(0, "bitcoin"), (1, "testnet")],
        }
    }
}

/// Main configuration for the seed service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    // === Network ===

    /// UDP and TCP listen address for DNS
    pub listen_addr: SocketAddr,

    /// Zone the seed is authoritative for
    pub root_domain: String,

    /// Lightning network(s) served
    pub network: NetworkSelection,

    /// Serve the HTTP status API
    pub api_enabled: bool,

    /// Port for HTTP API
    pub api_port: u16,

    // === Upstream ===

    /// lightningd base directory; `$HOME` is expanded
    pub lightning_dir: String,

    /// RPC socket file name inside `<lightning_dir>/<network>/`
    pub lightning_sock: String,

    /// Interval between `listnodes` calls (seconds)
    pub poll_interval_secs: u64,

    /// Upper bound for one RPC round trip (seconds)
    pub rpc_timeout_secs: u64,

    // === Freshness ===

    /// A node not re-confirmed within this window is no longer served
    pub freshness_window_secs: u64,

    /// Interval between stale-record sweeps (seconds)
    pub sweep_interval_secs: u64,

    // === DNS ===

    /// Maximum records per family in one answer
    pub num_results: usize,

    /// TTL on every answer record
    pub dns_ttl_secs: u32,

    /// Largest UDP payload we advertise and send to EDNS clients
    pub max_udp_payload: u16,

    /// Close TCP connections idle for this long (seconds)
    pub tcp_idle_timeout_secs: u64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            // Network
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
            root_domain: "lseed.bitcoinstats.com".to_string(),
            network: NetworkSelection::Bitcoin,
            api_enabled: true,
            api_port: 8080,

            // Upstream
            lightning_dir: "$HOME/.lightning".to_string(),
            lightning_sock: "lightning-rpc".to_string(),
            poll_interval_secs: 10,
            rpc_timeout_secs: 30,

            // Freshness
            freshness_window_secs: 600, // 10 minutes
            sweep_interval_secs: 60,

            // DNS
            num_results: 25,
            dns_ttl_secs: 60,
            max_udp_payload: 1232,
            tcp_idle_timeout_secs: 10,
        }
    }
}

impl SeedConfig {
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

    pub fn with_listen_addr(mut self, addr: Option<SocketAddr>) -> Self {
        if let Some(addr) = addr {
            self.listen_addr = addr;
        }
        self
    }

    pub fn with_root_domain(mut self, domain: Option<String>) -> Self {
        if let Some(domain) = domain {
            self.root_domain = domain;
        }
        self
    }

    pub fn with_poll_interval(mut self, secs: Option<u64>) -> Self {
        if let Some(secs) = secs {
            self.poll_interval_secs = secs;
        }
        self
    }

    pub fn with_lightning_dir(mut self, dir: Option<String>) -> Self {
        if let Some(dir) = dir {
            self.lightning_dir = dir;
        }
        self
    }

    pub fn with_lightning_sock(mut self, sock: Option<String>) -> Self {
        if let Some(sock) = sock {
            self.lightning_sock = sock;
        }
        self
    }

    pub fn with_network(mut self, network: Option<NetworkSelection>) -> Self {
        if let Some(network) = network {
            self.network = network;
        }
        self
    }

    pub fn with_num_results(mut self, n: Option<usize>) -> Self {
        if let Some(n) = n {
            self.num_results = n;
        }
        self
    }

    pub fn with_api_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.api_port = port;
        }
        self
    }

    /// Unix socket of the lightningd instance serving `network_name`. An
    /// absolute `lightning_sock` is used as is.
    pub fn rpc_socket_path(&self, network_name: &str) -> PathBuf {
        expand_home(&self.lightning_dir)
            .join(network_name)
            .join(expand_home(&self.lightning_sock))
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.root_domain.trim_matches('.').is_empty() {
            anyhow::bail!("root_domain must not be empty");
        }

        if self.num_results == 0 {
            anyhow::bail!("num_results must be at least 1");
        }

        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be at least 1");
        }

        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be at least 1");
        }

        if self.rpc_timeout_secs == 0 {
            anyhow::bail!("rpc_timeout_secs must be at least 1");
        }

        if self.tcp_idle_timeout_secs == 0 {
            anyhow::bail!("tcp_idle_timeout_secs must be at least 1");
        }

        if self.freshness_window_secs <= self.poll_interval_secs {
            anyhow::bail!(
                "freshness_window_secs ({}) must be greater than poll_interval_secs ({})",
                self.freshness_window_secs,
                self.poll_interval_secs
            );
        }

        if u64::from(self.dns_ttl_secs) > self.freshness_window_secs {
            anyhow::bail!(
                "dns_ttl_secs ({}) should not exceed freshness_window_secs ({})",
                self.dns_ttl_secs,
                self.freshness_window_secs
            );
        }

        if self.max_udp_payload < 512 {
            anyhow::bail!(
                "max_udp_payload ({}) must be at least 512",
                self.max_udp_payload
            );
        }

        Ok(())
    }
}

/// Replace a leading `$HOME` or `~` path component with the user's home
/// directory
fn expand_home(path: &str) -> PathBuf {
    let rest = ["$HOME", "~"].iter().find_map(|prefix| {
        let rest = path.strip_prefix(prefix)?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    });

    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SeedConfig::default();
        assert_eq!(config.listen_addr.port(), 53);
        assert_eq!(config.num_results, 25);
        assert_eq!(config.network, NetworkSelection::Bitcoin);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SeedConfig::default();

        config.freshness_window_secs = config.poll_interval_secs;
        assert!(config.validate().is_err());

        let mut config = SeedConfig::default();
        config.num_results = 0;
        assert!(config.validate().is_err());

        let mut config = SeedConfig::default();
        config.max_udp_payload = 511;
        assert!(config.validate().is_err());

        let mut config = SeedConfig::default();
        config.dns_ttl_secs = 601;
        assert!(config.validate().is_err());

        let mut config = SeedConfig::default();
        config.root_domain = ".".to_string();
        assert!(config.validate().is_err());

        let mut config = SeedConfig::default();
        config.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = SeedConfig::default();
        config.rpc_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = SeedConfig::default();
        config.tcp_idle_timeout_secs = 0;
        assert!(config.validate().is_err());

        assert!(SeedConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = SeedConfig::default()
            .with_listen_addr(Some("127.0.0.1:5353".parse().unwrap()))
            .with_network(Some(NetworkSelection::All))
            .with_num_results(None)
            .with_api_port(Some(9090));

        assert_eq!(config.listen_addr.port(), 5353);
        assert_eq!(config.network, NetworkSelection::All);
        assert_eq!(config.num_results, 25);
        assert_eq!(config.api_port, 9090);
    }

    #[test]
    fn test_network_realms() {
        assert_eq!(NetworkSelection::Bitcoin.realms(), vec![(0, "bitcoin")]);
        assert_eq!(NetworkSelection::Testnet.realms(), vec![(1, "testnet")]);
        assert_eq!(
            NetworkSelection::All.realms(),
            vec![(0, "bitcoin"), (1, "testnet")]
        );
    }

    #[test]
    fn test_save_and_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dns-seed.toml");

        let config = SeedConfig::default().with_root_domain(Some("seed.example.org".into()));
        config.save(&path).unwrap();
        let loaded = SeedConfig::load(&path).unwrap();
        assert_eq!(loaded.root_domain, "seed.example.org");

        // Missing keys fall back to defaults
        std::fs::write(&path, "network = \"testnet\"\npoll_interval_secs = 5\n").unwrap();
        let loaded = SeedConfig::load(&path).unwrap();
        assert_eq!(loaded.network, NetworkSelection::Testnet);
        assert_eq!(loaded.poll_interval_secs, 5);
        assert_eq!(loaded.lightning_sock, "lightning-rpc");
    }

    #[test]
    fn test_unknown_network_rejected() {
        assert!(toml::from_str::<SeedConfig>("network = \"regtest\"\n").is_err());
    }

    #[test]
    fn test_rpc_socket_path() {
        let mut config = SeedConfig::default();
        config.lightning_dir = "/var/lib/lightning".to_string();
        assert_eq!(
            config.rpc_socket_path("testnet"),
            PathBuf::from("/var/lib/lightning/testnet/lightning-rpc")
        );

        config.lightning_sock = "/run/lightning/rpc".to_string();
        assert_eq!(
            config.rpc_socket_path("bitcoin"),
            PathBuf::from("/run/lightning/rpc")
        );
    }

    #[test]
    fn test_expand_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_home("$HOME/.lightning"), home.join(".lightning"));
        assert_eq!(expand_home("~/.lightning"), home.join(".lightning"));
        assert_eq!(expand_home("$HOME"), home);
        assert_eq!(expand_home("$HOMEx/rpc"), PathBuf::from("$HOMEx/rpc"));
        assert_eq!(expand_home("~user/rpc"), PathBuf::from("~user/rpc"));

        let mut config = SeedConfig::default();
        config.lightning_sock = "$HOME/sockets/lightning-rpc".to_string();
        assert_eq!(
            config.rpc_socket_path("bitcoin"),
            home.join("sockets/lightning-rpc")
        );
    }
}
