use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Browser clients send the session cookie, so origins are always explicit
/// and credentials are allowed.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_localhost: bool,
    pub max_age_secs: u64,
}

impl CorsConfig {
    pub fn production() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_localhost: false,
            max_age_secs: 7200,
        }
    }

    pub fn development() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_localhost: true,
            max_age_secs: 3600,
        }
    }

    pub fn with_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    pub fn build(self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {o}");
                    None
                }
            })
            .collect();

        let allow_origin = if !origins.is_empty() {
            AllowOrigin::list(origins)
        } else if self.allow_localhost {
            AllowOrigin::predicate(|origin: &HeaderValue, _| is_local_origin(origin))
        } else {
            AllowOrigin::list(Vec::<HeaderValue>::new())
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
            .expose_headers([header::CONTENT_DISPOSITION])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(self.max_age_secs))
    }
}

pub fn create_cors_layer(origins: &[String], production: bool) -> CorsLayer {
    let config = if production {
        CorsConfig::production()
    } else {
        CorsConfig::development()
    };
    if origins.is_empty() {
        info!("CORS: no origins configured, production={production}");
    } else {
        info!("CORS: {} allowed origins", origins.len());
    }
    config.with_origins(origins.to_vec()).build()
}

fn is_local_origin(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let host = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"));
    match host {
        Some(rest) => {
            let name = rest.split(':').next().unwrap_or_default();
            name == "localhost" || name == "127.0.0.1"
        }
        None => false,
    }
}
