//! Environment configuration

use std::env;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub jwt_secret_key: String,
    pub jwt_algorithm: String,
    pub access_token_expire_minutes: i64,
    pub ably_api_key: Option<String>,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub cors_origins: Vec<String>,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: var("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            database_url: var("DATABASE_URL"),
            redis_url: var("REDIS_URL"),
            jwt_secret_key: var("JWT_SECRET_KEY").unwrap_or_else(|| "CHANGE_ME_SECRET".into()),
            jwt_algorithm: var("JWT_ALGORITHM").unwrap_or_else(|| "HS256".into()),
            access_token_expire_minutes: var("ACCESS_TOKEN_EXPIRE_MINUTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1440),
            ably_api_key: var("ABLY_API_KEY").or_else(|| var("ABLY_REALTIME_KEY")),
            smtp_server: var("SMTP_SERVER").unwrap_or_else(|| "smtp.gmail.com".into()),
            smtp_port: var("SMTP_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(587),
            smtp_username: var("SMTP_USERNAME").unwrap_or_default(),
            smtp_password: var("SMTP_PASSWORD").unwrap_or_default(),
            from_email: var("FROM_EMAIL").unwrap_or_default(),
            cors_origins: var("CORS_ORIGINS")
                .unwrap_or_else(|| "http://localhost:3000,http://localhost:5173".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Whether the SMTP credentials are present.
    pub fn smtp_auth_configured(&self) -> bool {
        !self.smtp_username.is_empty() && !self.smtp_password.is_empty()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            database_url: None,
            redis_url: None,
            jwt_secret_key: "CHANGE_ME_SECRET".into(),
            jwt_algorithm: "HS256".into(),
            access_token_expire_minutes: 1440,
            ably_api_key: None,
            smtp_server: "smtp.gmail.com".into(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_email: String::new(),
            cors_origins: vec!["http://localhost:3000".into()],
        }
    }
}
