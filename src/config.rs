//! Configuration management for the FTP server
//!
//! The configuration is read once at startup from an optional TOML file with
//! environment overrides, validated, and then shared read-only between all
//! sessions.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::UserAccount;

/// Environment variable prefix, e.g. `VROOT_FTP_CONTROL_PORT=2121`.
pub const ENV_PREFIX: &str = "VROOT_FTP";

/// Complete server configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    // ═══ NETWORK ═══
    /// IP address to bind the FTP control connection
    pub bind_address: String,

    /// Port for FTP control connection
    pub control_port: u16,

    /// Address advertised in PASV replies; defaults to the control
    /// connection's local address
    pub pasv_address: Option<String>,

    /// Port range for PASV/EPSV listeners. `0..0` means ephemeral ports.
    pub data_port_min: u16,
    pub data_port_max: u16,

    // ═══ FILESYSTEM ═══
    /// Virtual root every session is confined to
    pub server_root: PathBuf,

    /// Virtual directory new sessions start in; also the target of `~`
    pub home: String,

    // ═══ BEHAVIOR ═══
    pub banner: String,

    /// Buffer size for file transfers
    pub buffer_size: usize,

    /// Data channel accept/connect/IO timeout
    pub connection_timeout_secs: u64,

    /// Control channel idle timeout
    pub idle_timeout_secs: u64,

    /// Maximum FTP command line length, CRLF included
    pub max_command_length: usize,

    /// Maximum concurrent sessions
    pub max_clients: usize,

    /// Accept PORT/EPRT targets on ports <= 1024
    pub allow_privileged_ports: bool,

    /// Accept data connections to/from addresses other than the control peer
    pub allow_foreign_addresses: bool,

    pub users: Vec<UserAccount>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            control_port: 2121,
            pasv_address: None,
            data_port_min: 0,
            data_port_max: 0,
            server_root: PathBuf::from("./server_root"),
            home: "/".to_string(),
            banner: "Welcome to vroot-ftpd".to_string(),
            buffer_size: 64 * 1024,
            connection_timeout_secs: 30,
            idle_timeout_secs: 300,
            max_command_length: 4096,
            max_clients: 50,
            allow_privileged_ports: false,
            allow_foreign_addresses: false,
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional TOML file with environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        self.control_socket()?;

        if let Some(address) = &self.pasv_address {
            if address.parse::<Ipv4Addr>().is_err() {
                return Err(config::ConfigError::Message(format!(
                    "pasv_address must be an IPv4 address, got {address:?}"
                )));
            }
        }

        if self.server_root.as_os_str().is_empty() {
            return Err(config::ConfigError::Message(
                "server_root cannot be empty".into(),
            ));
        }

        if !self.home.starts_with('/') {
            return Err(config::ConfigError::Message(
                "home must be an absolute virtual path".into(),
            ));
        }

        if self.data_port_min > self.data_port_max {
            return Err(config::ConfigError::Message(
                "data_port_min must not exceed data_port_max".into(),
            ));
        }

        if self.data_port_min == 0 && self.data_port_max != 0 {
            return Err(config::ConfigError::Message(
                "data_port_min cannot be 0 when data_port_max is set".into(),
            ));
        }

        if self.buffer_size == 0 {
            return Err(config::ConfigError::Message(
                "buffer_size must be greater than 0".into(),
            ));
        }

        if self.max_clients == 0 {
            return Err(config::ConfigError::Message(
                "max_clients must be greater than 0".into(),
            ));
        }

        if self.max_command_length < 16 {
            return Err(config::ConfigError::Message(
                "max_command_length must be at least 16".into(),
            ));
        }

        Ok(())
    }

    /// Create the virtual root if needed and replace it with its canonical
    /// form, so that containment checks compare like with like.
    pub fn prepare(mut self) -> std::io::Result<Self> {
        std::fs::create_dir_all(&self.server_root)?;
        self.server_root = self.server_root.canonicalize()?;
        Ok(self)
    }

    /// Get bind address and control port as socket address
    pub fn control_socket(&self) -> Result<SocketAddr, config::ConfigError> {
        let ip: IpAddr = self.bind_address.parse().map_err(|_| {
            config::ConfigError::Message(format!("invalid bind_address {:?}", self.bind_address))
        })?;
        Ok(SocketAddr::new(ip, self.control_port))
    }

    /// Configured PASV port range, `None` for ephemeral ports.
    pub fn data_port_range(&self) -> Option<std::ops::RangeInclusive<u16>> {
        (self.data_port_min != 0).then(|| self.data_port_min..=self.data_port_max)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ServerConfig::default().validate().is_ok());
        assert_eq!(ServerConfig::default().data_port_range(), None);
    }

    #[test]
    fn rejects_inverted_port_range() {
        let config = ServerConfig {
            data_port_min: 3000,
            data_port_max: 2000,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn control_socket_accepts_ipv6() {
        let config = ServerConfig {
            bind_address: "::1".into(),
            control_port: 2100,
            ..ServerConfig::default()
        };
        assert_eq!(config.control_socket().unwrap(), "[::1]:2100".parse().unwrap());

        let bad = ServerConfig {
            bind_address: "localhost".into(),
            ..ServerConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn rejects_relative_home() {
        let config = ServerConfig {
            home: "work".into(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_toml_file_with_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ftpd.toml");
        std::fs::write(
            &path,
            r#"
control_port = 2999
home = "/work"
data_port_min = 40000
data_port_max = 40100

[[users]]
username = "alice"
password = "alice123"
"#,
        )
        .unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.control_port, 2999);
        assert_eq!(config.home, "/work");
        assert_eq!(config.data_port_range(), Some(40000..=40100));
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].username, "alice");
        // untouched fields keep their defaults
        assert_eq!(config.max_clients, 50);
    }

    #[test]
    fn prepare_canonicalizes_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            server_root: dir.path().join("nested/root"),
            ..ServerConfig::default()
        }
        .prepare()
        .unwrap();
        assert!(config.server_root.is_absolute());
        assert!(config.server_root.is_dir());
    }
}
