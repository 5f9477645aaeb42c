// Explicit connection and scenario settings. Nothing here is global.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigurationError;

pub const DEFAULT_ADDR: &str = "127.0.0.1:9300";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials and transport-security material, carried as-is.
///
/// The client never inspects the trust store or validates the secret; both
/// are handed to the handshake or kept for a future TLS transport.
#[derive(Clone, PartialEq)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub principal: String,
    pub secret: String,
    pub trust_store_location: Option<PathBuf>,
    pub trust_store_password: Option<String>,
}

impl SecurityConfig {
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            enabled: false,
            principal: principal.into(),
            secret: secret.into(),
            trust_store_location: None,
            trust_store_password: None,
        }
    }

    /// Same transport settings, different principal.
    pub fn for_principal(&self, principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: secret.into(),
            ..self.clone()
        }
    }

    pub fn from_env() -> Result<Self, ConfigurationError> {
        Ok(Self {
            enabled: env_bool("SQLSHELL_SSL", false)?,
            principal: std::env::var("SQLSHELL_USER").unwrap_or_else(|_| "test_admin".to_string()),
            secret: std::env::var("SQLSHELL_PASSWORD").unwrap_or_default(),
            trust_store_location: std::env::var("SQLSHELL_TRUSTSTORE").ok().map(PathBuf::from),
            trust_store_password: std::env::var("SQLSHELL_TRUSTSTORE_PASSWORD").ok(),
        })
    }
}

// Secrets stay out of logs and panic messages.
impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("enabled", &self.enabled)
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .field("trust_store_location", &self.trust_store_location)
            .field("trust_store_password", &self.trust_store_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub security: SecurityConfig,
    /// Run one round trip right after authentication and fail fast on rejection.
    pub probe_on_connect: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(endpoint: impl Into<String>, security: SecurityConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            security,
            probe_on_connect: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_probe(mut self, probe_on_connect: bool) -> Self {
        self.probe_on_connect = probe_on_connect;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn from_env() -> Result<Self, ConfigurationError> {
        let endpoint = std::env::var("SQLSHELL_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        let mut config = Self::new(endpoint, SecurityConfig::from_env()?);
        config.probe_on_connect = env_bool("SQLSHELL_PROBE", true)?;
        if let Ok(raw) = std::env::var("SQLSHELL_READ_TIMEOUT_MS") {
            let ms = raw.parse::<u64>().map_err(|_| ConfigurationError::InvalidEnv {
                name: "SQLSHELL_READ_TIMEOUT_MS".into(),
                value: raw.clone(),
            })?;
            config.read_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// Fixture-wide settings a security scenario is built from.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub endpoint: String,
    pub admin: SecurityConfig,
    /// Password shared by every restricted test principal.
    pub user_secret: String,
    pub read_timeout: Duration,
}

impl ScenarioConfig {
    pub fn new(endpoint: impl Into<String>, admin: SecurityConfig, user_secret: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            admin,
            user_secret: user_secret.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Security settings for `user`, or the admin's when `user` is `None`.
    pub fn security_for(&self, user: Option<&str>) -> SecurityConfig {
        match user {
            None => self.admin.clone(),
            Some(user) => self.admin.for_principal(user, self.user_secret.clone()),
        }
    }

    pub fn connection(&self, user: Option<&str>, probe_on_connect: bool) -> ConnectionConfig {
        ConnectionConfig::new(self.endpoint.clone(), self.security_for(user))
            .with_probe(probe_on_connect)
            .with_read_timeout(self.read_timeout)
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, ConfigurationError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigurationError::InvalidEnv { name: name.to_string(), value }),
        },
    }
}
