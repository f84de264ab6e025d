use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

use crate::registry::DEFAULT_MAX_BATCH;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub email: EmailConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub max_request_size_bytes: usize,
    pub notification_page_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub cors_origins: Vec<String>,
    /// HS256 shared secret, or an RSA public key PEM for RS256 session tokens.
    #[serde(skip_serializing)]
    pub auth_secret_key: String,
    pub auth_issuer: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    pub session_token_expiry_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(skip_serializing)]
    pub resend_api_key: Option<String>,
    pub from_address: String,
    pub api_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub max_batch: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            self.server.log_level = v;
        }

        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = non_empty(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }

        if let Ok(v) = env::var("CORS_ORIGIN") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("AUTH_SECRET_KEY") {
            self.security.auth_secret_key = v;
        }
        if let Ok(v) = env::var("AUTH_ISSUER") {
            self.security.auth_issuer = non_empty(v);
        }
        if let Ok(v) = env::var("WEBHOOK_SECRET") {
            self.security.webhook_secret = non_empty(v);
        }

        if let Ok(v) = env::var("RESEND_API_KEY") {
            self.email.resend_api_key = non_empty(v);
        }
        if let Ok(v) = env::var("EMAIL_FROM") {
            self.email.from_address = v;
        }

        if let Ok(v) = env::var("SYNC_MAX_BATCH") {
            self.sync.max_batch = v.parse().unwrap_or(self.sync.max_batch);
        }

        self
    }

    /// Fails with every missing required variable at once, so a misconfigured
    /// deployment is fixed in one pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.security.auth_secret_key.is_empty() {
            missing.push("AUTH_SECRET_KEY");
        }
        if self.database.url.is_none() && self.environment != Environment::Development {
            missing.push("DATABASE_URL");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 3000,
                log_level: "debug".to_string(),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            api: ApiConfig {
                max_request_size_bytes: 1024 * 1024, // 1MB
                notification_page_limit: 100,
            },
            security: SecurityConfig {
                cors_origins: vec!["*".to_string()],
                auth_secret_key: String::new(),
                auth_issuer: None,
                webhook_secret: None,
                session_token_expiry_hours: 24 * 7,
            },
            email: EmailConfig::default(),
            sync: SyncConfig {
                max_batch: DEFAULT_MAX_BATCH,
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig {
                port: 3000,
                log_level: "info".to_string(),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
            },
            api: ApiConfig {
                max_request_size_bytes: 1024 * 1024,
                notification_page_limit: 100,
            },
            security: SecurityConfig {
                cors_origins: vec!["*".to_string()],
                auth_secret_key: String::new(),
                auth_issuer: None,
                webhook_secret: None,
                session_token_expiry_hours: 24,
            },
            email: EmailConfig::default(),
            sync: SyncConfig {
                max_batch: DEFAULT_MAX_BATCH,
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                port: 3000,
                log_level: "info".to_string(),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
            },
            api: ApiConfig {
                max_request_size_bytes: 1024 * 1024,
                notification_page_limit: 100,
            },
            security: SecurityConfig {
                cors_origins: vec!["*".to_string()],
                auth_secret_key: String::new(),
                auth_issuer: None,
                webhook_secret: None,
                session_token_expiry_hours: 4,
            },
            email: EmailConfig::default(),
            sync: SyncConfig {
                max_batch: DEFAULT_MAX_BATCH,
            },
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            resend_api_key: None,
            from_address: "MyLife OS <noreply@mylifeos.app>".to_string(),
            api_base_url: "https://api.resend.com".to_string(),
        }
    }
}

fn non_empty(v: String) -> Option<String> {
    let trimmed = v.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
