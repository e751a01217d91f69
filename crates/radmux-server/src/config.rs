use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A user entry for the bundled PAP handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: String,
}

/// Which request classes a peer may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPolicy {
    /// Authentication and accounting both accepted.
    #[default]
    All,
    /// Authentication requests only.
    AuthOnly,
    /// Accounting requests only.
    AcctOnly,
}

impl AuthPolicy {
    pub fn permits(self, role: crate::request::SocketRole) -> bool {
        use crate::request::SocketRole;
        match self {
            AuthPolicy::All => true,
            AuthPolicy::AuthOnly => role != SocketRole::Acct,
            AuthPolicy::AcctOnly => role != SocketRole::Auth,
        }
    }
}

/// A known peer: address (single IP or CIDR), shared secret, display name,
/// and the request classes it may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub address: String,
    pub secret: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub auth_policy: AuthPolicy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Client {
    pub fn parse_network(&self) -> Result<IpNetwork, ConfigError> {
        if let Ok(network) = self.address.parse::<IpNetwork>() {
            return Ok(network);
        }
        if let Ok(ip) = self.address.parse::<IpAddr>() {
            return Ok(IpNetwork::from(ip));
        }
        Err(ConfigError::Invalid(format!(
            "Invalid client address: {}",
            self.address
        )))
    }

    pub fn matches(&self, source_ip: IpAddr) -> bool {
        self.parse_network()
            .map(|network| network.contains(source_ip))
            .unwrap_or(false)
    }

    /// Name used in log lines and detail file paths.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Daemon configuration, loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind all sockets to.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Authentication port; accounting binds to this plus one.
    #[serde(default = "default_auth_port")]
    pub auth_port: u16,

    /// Enable the DHCPv4 listener.
    #[serde(default)]
    pub dhcp_enabled: bool,

    #[serde(default = "default_dhcp_port")]
    pub dhcp_port: u16,

    #[serde(default)]
    pub clients: Vec<Client>,

    #[serde(default)]
    pub users: Vec<User>,

    /// Strip the @realm suffix from User-Name before handling.
    #[serde(default = "default_strip_realm")]
    pub strip_realm: bool,

    /// Run each request in an isolated worker task.
    #[serde(default = "default_spawn_workers")]
    pub spawn_workers: bool,

    /// Watchdog horizon for unresponsive workers, in seconds.
    #[serde(default = "default_max_request_time")]
    pub max_request_time: u64,

    /// Retention window for finished requests, in seconds. Retransmissions
    /// arriving within it replay the cached reply.
    #[serde(default = "default_cleanup_delay")]
    pub cleanup_delay: u64,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default)]
    pub log_level: Option<String>,

    /// Directory for per-client accounting and authentication detail files.
    #[serde(default)]
    pub detail_dir: Option<String>,

    #[serde(default)]
    pub pid_file: Option<String>,

    /// Log authentication results.
    #[serde(default)]
    pub log_auth: bool,

    /// Include passwords when logging authentication failures.
    #[serde(default)]
    pub log_auth_pass: bool,

    /// Log user names after realm stripping rather than as received.
    #[serde(default)]
    pub log_stripped_names: bool,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_auth_port() -> u16 {
    1812
}

fn default_dhcp_port() -> u16 {
    67
}

fn default_strip_realm() -> bool {
    true
}

fn default_spawn_workers() -> bool {
    true
}

fn default_max_request_time() -> u64 {
    30
}

fn default_cleanup_delay() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_address: default_listen_address(),
            auth_port: default_auth_port(),
            dhcp_enabled: false,
            dhcp_port: default_dhcp_port(),
            clients: vec![],
            users: vec![],
            strip_realm: true,
            spawn_workers: true,
            max_request_time: default_max_request_time(),
            cleanup_delay: default_cleanup_delay(),
            log_level: None,
            detail_dir: None,
            pid_file: None,
            log_auth: false,
            log_auth_pass: false,
            log_stripped_names: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn listen_ip(&self) -> Result<IpAddr, ConfigError> {
        self.listen_address.parse().map_err(|_| {
            ConfigError::Invalid(format!("Invalid listen address: {}", self.listen_address))
        })
    }

    pub fn auth_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.listen_ip()?, self.auth_port))
    }

    /// Accounting port is derived from the authentication port. Port 0
    /// stays 0 so tests can bind OS-assigned ports.
    pub fn acct_port(&self) -> u16 {
        if self.auth_port == 0 {
            0
        } else {
            self.auth_port + 1
        }
    }

    pub fn acct_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.listen_ip()?, self.acct_port()))
    }

    pub fn dhcp_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.listen_ip()?, self.dhcp_port))
    }

    /// First enabled client matching the source address.
    pub fn find_client(&self, source_ip: IpAddr) -> Option<&Client> {
        self.clients
            .iter()
            .find(|c| c.enabled && c.matches(source_ip))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_ip()?;

        for client in &self.clients {
            if client.secret.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Client {} has empty secret",
                    client.address
                )));
            }
            client.parse_network()?;
        }

        for user in &self.users {
            if user.username.is_empty() {
                return Err(ConfigError::Invalid("User has empty username".to_string()));
            }
        }

        Ok(())
    }
}
