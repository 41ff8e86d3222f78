//! Scrape target descriptors.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// TLS negotiation mode for a target connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

/// One configured database server.
///
/// Targets are parsed once at startup and shared read-only by every scrape.
/// The [`identity`](Target::identity) is the value of the `host` label on
/// every series recorded for this target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Display identity override (defaults to `host`).
    #[serde(default)]
    pub name: Option<String>,

    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 5432).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login role.
    #[serde(default = "default_user")]
    pub user: String,

    /// Login password.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Database to connect to (default: "postgres").
    #[serde(default = "default_database")]
    pub database: String,

    /// TLS mode (default: prefer).
    #[serde(default)]
    pub ssl_mode: SslMode,

    /// Application name reported to the server.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_application_name() -> String {
    "pgsight".to_string()
}

impl Target {
    /// Create a target with default connection parameters.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            name: None,
            host: host.into(),
            port: default_port(),
            user: default_user(),
            password: None,
            database: default_database(),
            ssl_mode: SslMode::default(),
            application_name: default_application_name(),
        }
    }

    /// Set the display identity.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The stable identity used as the `host` label value.
    pub fn identity(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.host)
    }

    /// `host:port`, for log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the descriptor is usable.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Target("host must not be empty".to_string()));
        }
        if self.identity().trim().is_empty() {
            return Err(Error::Target(format!(
                "target {} has an empty name",
                self.address()
            )));
        }
        if self.port == 0 {
            return Err(Error::Target(format!(
                "target '{}' has port 0",
                self.identity()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_target_defaults() {
        let target: Target = parse_config(r#"{ host: "db1" }"#).unwrap();

        assert_eq!(target.host, "db1");
        assert_eq!(target.port, 5432);
        assert_eq!(target.user, "postgres");
        assert_eq!(target.database, "postgres");
        assert_eq!(target.ssl_mode, SslMode::Prefer);
        assert_eq!(target.identity(), "db1");
    }

    #[test]
    fn test_target_name_overrides_identity() {
        let target = Target::new("10.0.0.5").with_name("primary");
        assert_eq!(target.identity(), "primary");
        assert_eq!(target.address(), "10.0.0.5:5432");
    }

    #[test]
    fn test_ssl_mode_kebab_case() {
        let target: Target =
            parse_config(r#"{ host: "db1", ssl_mode: "verify-full" }"#).unwrap();
        assert_eq!(target.ssl_mode, SslMode::VerifyFull);
        assert_eq!(target.ssl_mode.as_str(), "verify-full");
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        assert!(Target::new("  ").validate().is_err());
        assert!(Target::new("db1").with_name("").validate().is_err());
        assert!(Target::new("db1").validate().is_ok());
    }
}
