//! Configuration management

use std::path::PathBuf;

use anyhow::{self, Context, Result};

use crate::services::import::ArchiveLimits;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string. Checked by `database_url()`.
    database_url: Option<String>,

    pub database_max_connections: u32,

    /// JWT secret key for token validation. Checked by `jwt_secret()`.
    jwt_secret: Option<String>,

    /// Where profile pictures are stored
    pub media_dir: PathBuf,

    /// Where validated imports wait for confirmation
    pub staging_dir: PathBuf,

    /// Hours before an unconfirmed staged import is purged
    pub staging_ttl_hours: i64,

    pub archive_limits: ArchiveLimits,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup.
    ///
    /// The database URL and JWT secret are only checked when a command asks
    /// for them, so a dry-run import needs neither.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let nats_url = lookup("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let jwt_secret = lookup("JWT_SECRET");

        let defaults = ArchiveLimits::default();
        let archive_limits = ArchiveLimits {
            max_entries: parse_or(&lookup, "IMPORT_MAX_ARCHIVE_ENTRIES", defaults.max_entries)?,
            max_uncompressed_bytes: parse_or(
                &lookup,
                "IMPORT_MAX_ARCHIVE_BYTES",
                defaults.max_uncompressed_bytes,
            )?,
        };

        let staging_ttl_hours: i64 = parse_or(&lookup, "STAGING_TTL_HOURS", 24)?;
        if staging_ttl_hours <= 0 {
            anyhow::bail!("STAGING_TTL_HOURS must be positive (got {})", staging_ttl_hours);
        }

        Ok(Self {
            nats_url,
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            jwt_secret,
            media_dir: lookup("MEDIA_DIR").unwrap_or_else(|| "./media".to_string()).into(),
            staging_dir: lookup("STAGING_DIR").unwrap_or_else(|| "./staging".to_string()).into(),
            staging_ttl_hours,
            archive_limits,
        })
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url.as_deref().context("DATABASE_URL must be set")
    }

    pub fn jwt_secret(&self) -> Result<&str> {
        let secret = self
            .jwt_secret
            .as_deref()
            .context("JWT_SECRET must be set. Generate one with: openssl rand -base64 48")?;
        if secret.len() < 32 {
            anyhow::bail!(
                "JWT_SECRET must be at least 32 bytes (current: {} bytes). Generate one with: openssl rand -base64 48",
                secret.len()
            );
        }
        Ok(secret)
    }

    pub fn staging_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.staging_ttl_hours)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is not a valid number ({:?}): {}", key, raw, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    fn config_with(vars: &[(&str, &str)]) -> Config {
        config(vars).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = config(&[("DATABASE_URL", "postgres://test"), ("JWT_SECRET", SECRET)]).unwrap();
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.media_dir, PathBuf::from("./media"));
        assert_eq!(config.staging_dir, PathBuf::from("./staging"));
        assert_eq!(config.staging_ttl(), chrono::Duration::hours(24));
        assert_eq!(config.archive_limits, ArchiveLimits::default());
        assert_eq!(config.database_max_connections, 10);
    }

    #[test]
    fn test_config_overrides() {
        let config = config(&[
            ("DATABASE_URL", "postgres://test"),
            ("JWT_SECRET", SECRET),
            ("NATS_URL", "nats://nats:4222"),
            ("STAGING_TTL_HOURS", "2"),
            ("IMPORT_MAX_ARCHIVE_ENTRIES", "10"),
            ("IMPORT_MAX_ARCHIVE_BYTES", "1024"),
        ])
        .unwrap();
        assert_eq!(config.nats_url, "nats://nats:4222");
        assert_eq!(config.staging_ttl_hours, 2);
        assert_eq!(config.archive_limits.max_entries, 10);
        assert_eq!(config.archive_limits.max_uncompressed_bytes, 1024);
    }

    #[test]
    fn test_config_checks_database_and_secret_on_use() {
        let config = config(&[("JWT_SECRET", SECRET)]).unwrap();
        assert!(config.database_url().is_err());
        assert_eq!(config.jwt_secret().unwrap(), SECRET);

        let config = config_with(&[("DATABASE_URL", "postgres://test")]);
        assert_eq!(config.database_url().unwrap(), "postgres://test");
        assert!(config.jwt_secret().is_err());

        let config = config_with(&[("DATABASE_URL", "postgres://test"), ("JWT_SECRET", "short")]);
        let err = config.jwt_secret().unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn test_config_loads_without_database_or_secret() {
        let config = config_with(&[]);
        assert_eq!(config.media_dir, PathBuf::from("./media"));
        assert!(config.database_url().is_err());
        assert!(config.jwt_secret().is_err());
    }

    #[test]
    fn test_config_rejects_bad_numbers() {
        let err = config(&[
            ("DATABASE_URL", "postgres://test"),
            ("JWT_SECRET", SECRET),
            ("IMPORT_MAX_ARCHIVE_ENTRIES", "many"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("IMPORT_MAX_ARCHIVE_ENTRIES"));

        assert!(config(&[
            ("DATABASE_URL", "postgres://test"),
            ("JWT_SECRET", SECRET),
            ("STAGING_TTL_HOURS", "0"),
        ])
        .is_err());
    }
}
