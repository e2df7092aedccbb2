use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Default Orange Book download link published by the FDA.
pub const DEFAULT_SOURCE_URL: &str = "https://www.fda.gov/media/76860/download?attachment";

/// User-Agent presented to the source server. The FDA endpoint rejects
/// obvious non-browser clients, so this tracks a current desktop Chrome.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the
/// process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files — useful for
/// testing or when the caller manages env setup.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// This is the core parsing/validation logic, decoupled from the actual
/// environment so it can be tested with a pure `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default =
        |var: &str, default: &str| -> String { lookup(var).unwrap_or_else(|_| default.to_string()) };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("OBETL_ENV", "development"));
    let log_level = or_default("OBETL_LOG_LEVEL", "info");
    let catalog_path = PathBuf::from(or_default("OBETL_CATALOG_PATH", "./config/datasets.yaml"));
    let source_base_url = or_default("OBETL_SOURCE_URL", DEFAULT_SOURCE_URL);

    let db_max_connections = parse_u32("OBETL_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("OBETL_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("OBETL_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let fetch_timeout_secs = parse_u64("OBETL_FETCH_TIMEOUT_SECS", "120")?;
    let fetch_user_agent = or_default("OBETL_FETCH_USER_AGENT", DEFAULT_USER_AGENT);
    let fetch_max_retries = parse_u32("OBETL_FETCH_MAX_RETRIES", "4")?;
    let fetch_retry_backoff_base_ms = parse_u64("OBETL_FETCH_RETRY_BACKOFF_BASE_MS", "1000")?;

    let max_concurrent_datasets = parse_usize("OBETL_MAX_CONCURRENT_DATASETS", "2")?;
    let pipeline_max_retries = parse_u32("OBETL_PIPELINE_MAX_RETRIES", "1")?;

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        catalog_path,
        source_base_url,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        fetch_timeout_secs,
        fetch_user_agent,
        fetch_max_retries,
        fetch_retry_backoff_base_ms,
        max_concurrent_datasets,
        pipeline_max_retries,
    })
}

fn parse_environment(raw: &str) -> Environment {
    match raw.to_ascii_lowercase().as_str() {
        "test" => Environment::Test,
        "production" | "prod" => Environment::Production,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
