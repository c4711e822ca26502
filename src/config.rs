use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub api_rps: u32,
    pub log_format: LogFormat,
    pub roster_fixture_path: Option<String>,
    pub sige: SigeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Credentials for the live academic roster (SIGE Acadêmico).
#[derive(Debug, Clone, Default)]
pub struct SigeConfig {
    pub base_url: Option<String>,
    pub token_url: Option<String>,
    pub access_token: Option<String>,
    pub grant_type: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub scope: Option<String>,
}

impl SigeConfig {
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some() && self.token_url.is_some()
    }
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let log_format = match get_env_opt("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(Error::Config(format!("Invalid value for LOG_FORMAT: {}", other)))
            }
        };

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            database_max_connections: get_env_parse_or("DATABASE_MAX_CONNECTIONS", 20)?,
            jwt_secret: get_env("JWT_SECRET")?,
            api_rps: get_env_parse_or("API_RPS", 50)?,
            log_format,
            roster_fixture_path: get_env_opt("ROSTER_FIXTURE_PATH"),
            sige: SigeConfig {
                base_url: get_env_opt("SIGE_ACADEMICO_BASE_URL"),
                token_url: get_env_opt("SIGE_ACADEMICO_TOKEN_URL"),
                access_token: get_env_opt("SIGE_ACADEMICO_ACCESS_TOKEN"),
                grant_type: get_env_opt("SIGE_ACADEMICO_GRANT_TYPE")
                    .unwrap_or_else(|| "client_credentials".to_string()),
                client_id: get_env_opt("SIGE_ACADEMICO_CLIENT_ID"),
                client_secret: get_env_opt("SIGE_ACADEMICO_CLIENT_SECRET"),
                username: get_env_opt("SIGE_ACADEMICO_USERNAME"),
                password: get_env_opt("SIGE_ACADEMICO_PASSWORD"),
                scope: get_env_opt("SIGE_ACADEMICO_SCOPE"),
            },
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

// Blank values count as unset.
fn get_env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        None => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn try_get_config() -> Result<&'static Config> {
    CONFIG
        .get()
        .ok_or_else(|| Error::Config("Configuration has not been initialized".to_string()))
}
