use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_FILE: &str = "examsync.toml";

/// Service settings, read from TOML. Every field has a default so a partial file (or none) works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// SQLite database file
    pub database: PathBuf,
    pub bind: IpAddr,
    pub port: u16,
    /// Request header carrying the caller identity, set by the authenticating proxy in front of
    /// the service.
    pub identity_header: String,
    /// How long a reconciliation waits for another writer on the same database.
    pub busy_timeout_ms: u64,
    pub max_body_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            database: PathBuf::from("examsync.db"),
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9037,
            identity_header: "x-user-id".to_string(),
            busy_timeout_ms: 5_000,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ServiceConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ServiceConfig, SyncError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read service config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(ServiceConfig::default());
        }
        let content = read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), SyncError> {
        tracing::debug!("Writing service config to: {:?}", path.as_ref());
        let toml_string = toml::to_string(self)?;
        write(path, toml_string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if http::HeaderName::from_bytes(self.identity_header.as_bytes()).is_err() {
            return Err(SyncError::Config(format!(
                "identity_header '{}' is not a valid header name",
                self.identity_header
            )));
        }
        if self.max_body_bytes == 0 {
            return Err(SyncError::Config("max_body_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.socket_addr().port(), 9037);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "port = 8080\nidentity_header = \"x-auth-user\"\n").unwrap();
        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.identity_header, "x-auth-user");
        assert_eq!(config.busy_timeout(), Duration::from_millis(5_000));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let config = ServiceConfig {
            database: dir.path().join("tests.db"),
            port: 7001,
            ..Default::default()
        };
        config.write(&path).unwrap();
        assert_eq!(ServiceConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_bad_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "identity_header = \"bad header\"\n").unwrap();
        assert!(matches!(
            ServiceConfig::load(&path),
            Err(SyncError::Config(_))
        ));
    }
}
