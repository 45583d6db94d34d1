use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub calendar: CalendarConfig,
    pub invites: InviteConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin.
    pub frontend_url: String,
    /// Emit JSON log lines instead of the human-readable format.
    /// Read from env var `LOG_FORMAT` (`json` enables it).
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for the /api surface
    pub api_per_second: u32,
    /// Burst size for the /api surface
    pub api_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    /// When true, a full replace rejects the whole request on the first malformed
    /// item instead of skipping it and reporting a warning.
    pub strict_replace: bool,
    /// Upper bound on the number of items accepted by one full replace.
    pub max_replace_items: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InviteConfig {
    /// Delivery endpoint for assembled invites. Invites are disabled when unset.
    pub webhook_url: Option<String>,
    pub timeout_seconds: u64,
}

fn parse_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
                json_logs: env::var("LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/calendars.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
            },
            rate_limit: RateLimitConfig {
                api_per_second: env::var("RATE_LIMIT_API_PER_SECOND")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                api_burst: env::var("RATE_LIMIT_API_BURST")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .unwrap_or(20),
            },
            calendar: CalendarConfig {
                strict_replace: parse_flag("CALENDAR_STRICT_REPLACE", false),
                max_replace_items: env::var("CALENDAR_MAX_REPLACE_ITEMS")
                    .unwrap_or_else(|_| "250".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("CALENDAR_MAX_REPLACE_ITEMS".to_string()))?,
            },
            invites: InviteConfig {
                webhook_url: env::var("INVITE_WEBHOOK_URL")
                    .ok()
                    .filter(|v| !v.trim().is_empty()),
                timeout_seconds: env::var("INVITE_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10u64),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
                json_logs: false,
            },
            database: DatabaseConfig {
                url: "sqlite://data/calendars.db".to_string(),
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: String::new(),
            },
            rate_limit: RateLimitConfig {
                api_per_second: 5,
                api_burst: 20,
            },
            calendar: CalendarConfig {
                strict_replace: false,
                max_replace_items: 250,
            },
            invites: InviteConfig {
                webhook_url: None,
                timeout_seconds: 10,
            },
        }
    }
}
