//! Configuration loading and validation.
//!
//! Config is JSON5. Location: `~/.classgate/classgate.json`, or
//! `$CLASSGATE_STATE_DIR/classgate.json` when set.
//!
//! Everything that can make the service insecure or unavailable (short
//! signing secret, malformed duration strings, zero quotas) is rejected by
//! [`Config::validate`] before any request is served.

mod duration;

pub use duration::parse_duration;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Minimum signing secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duration string that is not a valid Go-style duration.
    #[error("Invalid duration: {0:?}")]
    InvalidDuration(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Token signing and lifetimes.
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Invitation links.
    #[serde(default)]
    pub invitations: InvitationConfig,

    /// Per-identity request quotas.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded, parsed, or validated.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default().with_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific path.
    ///
    /// Environment overrides are applied before validation.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("classgate.json")
    }

    /// Get the Classgate state directory.
    ///
    /// Uses `CLASSGATE_STATE_DIR` env var if set, otherwise `~/.classgate`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("CLASSGATE_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".classgate")
        } else {
            PathBuf::from(".classgate")
        }
    }

    /// Apply environment variable overrides.
    ///
    /// `CLASSGATE_JWT_SECRET`, `CLASSGATE_DATA_DIR`, `CLASSGATE_PORT`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(secret) = std::env::var("CLASSGATE_JWT_SECRET") {
            self.jwt.secret = Some(secret);
        }

        if let Ok(dir) = std::env::var("CLASSGATE_DATA_DIR") {
            self.server.data_dir = PathBuf::from(dir);
        }

        if let Ok(port) = std::env::var("CLASSGATE_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!(value = %port, "Ignoring CLASSGATE_PORT: {e}"),
            }
        }

        self
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("Port cannot be 0".to_string()));
        }

        self.jwt.validate()?;
        self.rate_limit.validate()?;

        if self.invitations.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "invitations.base_url cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of the admin signing key (PKCS#8 PEM).
    #[must_use]
    pub fn admin_private_key_path(&self) -> PathBuf {
        self.jwt
            .admin_private_key_path
            .clone()
            .unwrap_or_else(|| self.server.data_dir.join("keys").join("admin_ed25519.pem"))
    }

    /// Path of the admin verification key (SPKI PEM).
    #[must_use]
    pub fn admin_public_key_path(&self) -> PathBuf {
        self.jwt
            .admin_public_key_path
            .clone()
            .unwrap_or_else(|| {
                self.server
                    .data_dir
                    .join("keys")
                    .join("admin_ed25519.pub.pem")
            })
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind_address: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory for the database and admin keys.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("classgate")
}

/// Token signing configuration.
///
/// Lifetimes are Go-style duration strings. They are parsed once by
/// [`JwtConfig::validate`]; the typed getters panic if called on a config
/// that never passed validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HMAC signing secret for access, refresh and invitation tokens.
    #[serde(default)]
    pub secret: Option<String>,

    /// Access token lifetime.
    #[serde(default = "default_access_expiry")]
    pub access_token_expiry: String,

    /// Refresh token lifetime.
    #[serde(default = "default_refresh_expiry")]
    pub refresh_token_expiry: String,

    /// Invitation lifetime.
    #[serde(default = "default_invitation_expiry")]
    pub invitation_expiry: String,

    /// Admin signing key location. Defaults under `server.data_dir`.
    #[serde(default)]
    pub admin_private_key_path: Option<PathBuf>,

    /// Admin verification key location. Defaults under `server.data_dir`.
    #[serde(default)]
    pub admin_public_key_path: Option<PathBuf>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: None,
            access_token_expiry: default_access_expiry(),
            refresh_token_expiry: default_refresh_expiry(),
            invitation_expiry: default_invitation_expiry(),
            admin_private_key_path: None,
            admin_public_key_path: None,
        }
    }
}

fn default_access_expiry() -> String {
    "1h".to_string()
}

fn default_refresh_expiry() -> String {
    "720h".to_string()
}

fn default_invitation_expiry() -> String {
    "72h".to_string()
}

impl JwtConfig {
    /// Validate the secret and every duration string.
    ///
    /// # Errors
    ///
    /// Returns error if the secret is missing or shorter than
    /// [`MIN_SECRET_LEN`] bytes, or a duration does not parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.secret {
            None => {
                return Err(ConfigError::Validation(
                    "jwt.secret is required".to_string(),
                ));
            }
            Some(secret) if secret.len() < MIN_SECRET_LEN => {
                return Err(ConfigError::Validation(format!(
                    "jwt.secret must be at least {MIN_SECRET_LEN} bytes (got {})",
                    secret.len()
                )));
            }
            Some(_) => {}
        }

        parse_duration(&self.access_token_expiry)?;
        parse_duration(&self.refresh_token_expiry)?;
        parse_duration(&self.invitation_expiry)?;
        Ok(())
    }

    /// Signing secret bytes (empty if unset; validation rejects that).
    #[must_use]
    pub fn secret_bytes(&self) -> &[u8] {
        self.secret.as_deref().map_or(&[], str::as_bytes)
    }

    /// Access token lifetime.
    ///
    /// # Panics
    ///
    /// Panics if the duration string is invalid, which means
    /// [`JwtConfig::validate`] was skipped at startup.
    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        validated_duration("jwt.access_token_expiry", &self.access_token_expiry)
    }

    /// Refresh token lifetime.
    ///
    /// # Panics
    ///
    /// See [`JwtConfig::access_token_ttl`].
    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        validated_duration("jwt.refresh_token_expiry", &self.refresh_token_expiry)
    }

    /// Invitation lifetime.
    ///
    /// # Panics
    ///
    /// See [`JwtConfig::access_token_ttl`].
    #[must_use]
    pub fn invitation_ttl(&self) -> Duration {
        validated_duration("jwt.invitation_expiry", &self.invitation_expiry)
    }
}

/// Invitation link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationConfig {
    /// Public base URL used to build shareable links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

/// Role-weighted fixed-window quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length.
    #[serde(default = "default_window")]
    pub window: String,

    /// How often elapsed counters are swept.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,

    /// Requests per window for admins.
    #[serde(default = "default_admin_limit")]
    pub admin: u32,

    /// Requests per window for teachers.
    #[serde(default = "default_teacher_limit")]
    pub teacher: u32,

    /// Requests per window for students.
    #[serde(default = "default_student_limit")]
    pub student: u32,

    /// Requests per window for anonymous or unrecognized callers.
    #[serde(default = "default_default_limit")]
    pub default: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            sweep_interval: default_sweep_interval(),
            admin: default_admin_limit(),
            teacher: default_teacher_limit(),
            student: default_student_limit(),
            default: default_default_limit(),
        }
    }
}

fn default_window() -> String {
    "1m".to_string()
}

fn default_sweep_interval() -> String {
    "5m".to_string()
}

const fn default_admin_limit() -> u32 {
    1000
}

const fn default_teacher_limit() -> u32 {
    300
}

const fn default_student_limit() -> u32 {
    120
}

const fn default_default_limit() -> u32 {
    60
}

impl RateLimitConfig {
    /// Validate durations and quotas.
    ///
    /// The default ceiling applies to anonymous and unrecognized callers, so
    /// it may not be more generous than any role's ceiling.
    ///
    /// # Errors
    ///
    /// Returns error on a bad duration, a zero quota, or a default quota
    /// above a role quota.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_duration(&self.window)?;
        parse_duration(&self.sweep_interval)?;

        for (name, limit) in [
            ("admin", self.admin),
            ("teacher", self.teacher),
            ("student", self.student),
            ("default", self.default),
        ] {
            if limit == 0 {
                return Err(ConfigError::Validation(format!(
                    "rate_limit.{name} must be greater than 0"
                )));
            }
            if self.default > limit {
                return Err(ConfigError::Validation(format!(
                    "rate_limit.default ({}) exceeds rate_limit.{name} ({limit})",
                    self.default
                )));
            }
        }

        Ok(())
    }

    /// Window length.
    ///
    /// # Panics
    ///
    /// Panics if validation was skipped and the string is invalid.
    #[must_use]
    pub fn window(&self) -> Duration {
        validated_duration("rate_limit.window", &self.window)
    }

    /// Sweep interval.
    ///
    /// # Panics
    ///
    /// Panics if validation was skipped and the string is invalid.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        validated_duration("rate_limit.sweep_interval", &self.sweep_interval)
    }
}

/// Parse a duration that validation has already accepted.
fn validated_duration(field: &str, value: &str) -> Duration {
    match parse_duration(value) {
        Ok(duration) => duration,
        Err(e) => panic!("{field} used without validation: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.jwt.secret = Some("0123456789abcdef0123456789abcdef".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.jwt.access_token_expiry, "1h");
        assert_eq!(config.rate_limit.default, 60);
    }

    #[test]
    fn test_valid_config_passes() {
        let config = valid_config();
        config.validate().unwrap();
        assert_eq!(config.jwt.access_token_ttl(), Duration::from_secs(3600));
        assert_eq!(config.jwt.refresh_token_ttl(), Duration::from_secs(720 * 3600));
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_missing_secret_rejected() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = valid_config();
        config.jwt.secret = Some("too-short".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_human_duration_fails_startup_validation() {
        let mut config = valid_config();
        config.jwt.access_token_expiry = "1 hour".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    #[should_panic(expected = "used without validation")]
    fn test_getter_panics_when_validation_skipped() {
        let mut config = valid_config();
        config.jwt.refresh_token_expiry = "30 days".to_string();
        let _ = config.jwt.refresh_token_ttl();
    }

    #[test]
    fn test_default_quota_must_be_most_restrictive() {
        let mut config = valid_config();
        config.rate_limit.default = 500;
        assert!(config.validate().is_err());

        config.rate_limit.default = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_validation() {
        let mut config = valid_config();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_paths_default_under_data_dir() {
        let mut config = valid_config();
        config.server.data_dir = PathBuf::from("/srv/classgate");
        assert_eq!(
            config.admin_private_key_path(),
            PathBuf::from("/srv/classgate/keys/admin_ed25519.pem")
        );

        config.jwt.admin_public_key_path = Some(PathBuf::from("/etc/admin.pub"));
        assert_eq!(config.admin_public_key_path(), PathBuf::from("/etc/admin.pub"));
    }

    #[test]
    fn test_json5_parsing() {
        let json5_content = r#"{
            // comments are fine
            server: { port: 9090 },
            jwt: {
                secret: "0123456789abcdef0123456789abcdef",
                access_token_expiry: "15m",
            },
            rate_limit: { student: 50, default: 20 },
        }"#;

        let config: Config = json5::from_str(json5_content).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.jwt.access_token_ttl(), Duration::from_secs(900));
        assert_eq!(config.rate_limit.student, 50);
        assert_eq!(config.rate_limit.teacher, 300);
    }

    #[test]
    fn test_config_roundtrip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("classgate.json");

        let mut config = valid_config();
        config.invitations.base_url = "https://school.example".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.invitations.base_url, "https://school.example");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("classgate.json");
        std::fs::write(
            &path,
            r#"{ jwt: { secret: "0123456789abcdef0123456789abcdef", access_token_expiry: "1 hour" } }"#,
        )
        .unwrap();

        assert!(Config::load(&path).is_err());
    }
}
