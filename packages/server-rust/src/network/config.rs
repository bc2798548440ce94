//! Listener settings for the `tenantry` HTTP server.
//!
//! Tenancy behaviour (cache TTL, timeouts, admin token) lives in
//! [`crate::service::TenancyConfig`]; this module only covers the socket and
//! the HTTP layer stack.

use std::path::PathBuf;
use std::time::Duration;

/// Listener and HTTP-layer configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Serve HTTPS instead of plain HTTP when set.
    pub tls: Option<TlsConfig>,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete. Expiry answers 408.
    pub request_timeout: Duration,
    /// Upper bound on waiting for open tenant data contexts at shutdown.
    pub drain_timeout: Duration,
}

impl NetworkConfig {
    /// `host:port` string handed to the TCP listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            tls: None,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// PEM certificate chain and private key for HTTPS.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM file holding the server certificate chain, leaf first.
    pub cert_path: PathBuf,
    /// PEM file holding the private key for the leaf certificate.
    pub key_path: PathBuf,
}

impl TlsConfig {
    /// TLS is enabled only when both paths are given.
    #[must_use]
    pub fn from_paths(cert_path: Option<PathBuf>, key_path: Option<PathBuf>) -> Option<Self> {
        Some(Self {
            cert_path: cert_path?,
            key_path: key_path?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 0);
        assert!(config.tls.is_none());
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn bind_addr_brackets_ipv6_hosts() {
        let mut config = NetworkConfig {
            port: 8080,
            ..NetworkConfig::default()
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");

        config.host = "::1".to_string();
        assert_eq!(config.bind_addr(), "[::1]:8080");

        config.host = "[::]".to_string();
        assert_eq!(config.bind_addr(), "[::]:8080");
    }

    #[test]
    fn tls_needs_both_paths() {
        let cert = Some(PathBuf::from("/etc/tenantry/cert.pem"));
        let key = Some(PathBuf::from("/etc/tenantry/key.pem"));

        assert!(TlsConfig::from_paths(cert.clone(), None).is_none());
        assert!(TlsConfig::from_paths(None, key.clone()).is_none());

        let tls = TlsConfig::from_paths(cert, key).unwrap();
        assert_eq!(tls.cert_path, PathBuf::from("/etc/tenantry/cert.pem"));
        assert_eq!(tls.key_path, PathBuf::from("/etc/tenantry/key.pem"));
    }
}
