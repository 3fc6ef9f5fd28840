use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

const DEV_JWT_SECRET: &str = "servicedesk-development-secret-do-not-deploy";
pub const MEMORY_DATABASE_URL: &str = "memory://";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "test" | "staging" => Ok(Self::Development),
            other => Err(anyhow!("Unknown APP_ENV value: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub email: EmailConfig,
    pub storage: StorageConfig,
    pub bootstrap_admin: Option<BootstrapAdmin>,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public URL used when building links in notifications.
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with(MEMORY_DATABASE_URL)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub jwt_secret: String,
    pub ttl_hours: i64,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub smtp_server: Option<String>,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub template_dir: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid value for {key} ({raw}): {e}")),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, so tests never touch the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV") {
            Some(raw) => raw.parse()?,
            None => Environment::Development,
        };

        let port = parse_or(&lookup, "SERVER_PORT", 8080u16)?;
        let server = ServerConfig {
            host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            base_url: get("APP_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{port}")),
        };

        let database = DatabaseConfig {
            url: get("DATABASE_URL")
                .context("DATABASE_URL is required (use memory:// for the in-memory store)")?,
            pool_size: parse_or(&lookup, "DATABASE_POOL_SIZE", 10u32)?,
        };

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) if secret.len() >= 32 => secret,
            Some(_) if environment.is_production() => {
                bail!("JWT_SECRET must be at least 32 characters in production")
            }
            None if environment.is_production() => bail!("JWT_SECRET is required in production"),
            Some(secret) => {
                warn!("JWT_SECRET is shorter than 32 characters; acceptable only for development");
                secret
            }
            None => {
                warn!("JWT_SECRET not set, using development secret");
                DEV_JWT_SECRET.to_string()
            }
        };
        let session = SessionConfig {
            jwt_secret,
            ttl_hours: parse_or(&lookup, "SESSION_TTL_HOURS", 24i64)?,
        };
        if session.ttl_hours <= 0 {
            bail!("SESSION_TTL_HOURS must be positive");
        }

        let email = EmailConfig {
            smtp_server: get("SMTP_HOST"),
            smtp_port: parse_or(&lookup, "SMTP_PORT", 587u16)?,
            username: get("SMTP_USER"),
            password: get("SMTP_PASS"),
            from: get("SMTP_FROM").unwrap_or_else(|| "no-reply@servicedesk.local".to_string()),
            template_dir: get("EMAIL_TEMPLATE_DIR").map(PathBuf::from),
        };

        let storage = StorageConfig {
            upload_dir: PathBuf::from(get("UPLOAD_DIR").unwrap_or_else(|| "./uploads".to_string())),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?,
        };

        let bootstrap_admin = match (get("BOOTSTRAP_ADMIN_EMAIL"), get("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (Some(_), None) | (None, Some(_)) => {
                warn!("BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must both be set; skipping bootstrap");
                None
            }
            (None, None) => None,
        };

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            environment,
            server,
            database,
            session,
            email,
            storage,
            bootstrap_admin,
            cors_allowed_origins,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "memory://")])).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.base_url, "http://localhost:8080");
        assert!(config.database.is_memory());
        assert_eq!(config.database.pool_size, 10);
        assert_eq!(config.session.ttl_hours, 24);
        assert_eq!(config.storage.max_upload_bytes, 10_485_760);
        assert!(config.email.smtp_server.is_none());
        assert!(!config.is_production());
    }

    #[test]
    fn test_database_url_required() {
        assert!(AppConfig::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn test_production_requires_strong_secret() {
        let short = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "memory://"),
            ("APP_ENV", "production"),
            ("JWT_SECRET", "short"),
        ]));
        assert!(short.is_err());

        let ok = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "memory://"),
            ("APP_ENV", "production"),
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
        ]))
        .unwrap();
        assert!(ok.is_production());
    }

    #[test]
    fn test_invalid_numbers_are_reported() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "memory://"),
            ("SERVER_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));
    }

    #[test]
    fn test_cors_origins_split() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "memory://"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ("APP_URL", "https://desk.example/"),
        ]))
        .unwrap();
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.server.base_url, "https://desk.example");
    }
}
