use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if values are present but invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if values are present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
///
/// # Errors
///
/// Returns `ConfigError` if values are present but invalid.
#[allow(clippy::too_many_lines)]
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let u32_var = |var: &str, default: &str| -> Result<u32, ConfigError> {
        parse_as(var, &or_default(var, default))
    };
    let u64_var = |var: &str, default: &str| -> Result<u64, ConfigError> {
        parse_as(var, &or_default(var, default))
    };
    let usize_var = |var: &str, default: &str| -> Result<usize, ConfigError> {
        parse_as(var, &or_default(var, default))
    };
    let f64_var = |var: &str, default: &str| -> Result<f64, ConfigError> {
        let value: f64 = parse_as(var, &or_default(var, default))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: "must be a finite number".to_string(),
            })
        }
    };

    let env = parse_environment(&or_default("RADAR_ENV", "development"));
    let log_level = or_default("RADAR_LOG_LEVEL", "info");
    let registry_path = PathBuf::from(or_default(
        "RADAR_REGISTRY_PATH",
        "./config/registry.yaml",
    ));
    let database_url = lookup("DATABASE_URL").ok();

    let db_max_connections = u32_var("RADAR_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = u32_var("RADAR_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = u64_var("RADAR_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let source_base_url = or_default("RADAR_SOURCE_BASE_URL", "https://old.reddit.com")
        .trim_end_matches('/')
        .to_string();
    let fetch_timeout_secs = u64_var("RADAR_FETCH_TIMEOUT_SECS", "15")?;
    let fetch_min_delay_ms = u64_var("RADAR_FETCH_MIN_DELAY_MS", "2000")?;
    let fetch_max_delay_ms = u64_var("RADAR_FETCH_MAX_DELAY_MS", "5000")?;
    if fetch_min_delay_ms > fetch_max_delay_ms {
        return Err(ConfigError::InvalidEnvVar {
            var: "RADAR_FETCH_MIN_DELAY_MS".to_string(),
            reason: format!(
                "min delay {fetch_min_delay_ms}ms exceeds max delay {fetch_max_delay_ms}ms"
            ),
        });
    }
    let fetch_burst_probability = f64_var("RADAR_FETCH_BURST_PROBABILITY", "0.15")?;
    if !(0.0..=1.0).contains(&fetch_burst_probability) {
        return Err(ConfigError::InvalidEnvVar {
            var: "RADAR_FETCH_BURST_PROBABILITY".to_string(),
            reason: "must be within [0, 1]".to_string(),
        });
    }
    let fetch_burst_multiplier = f64_var("RADAR_FETCH_BURST_MULTIPLIER", "2.5")?;
    let fetch_max_retries = u32_var("RADAR_FETCH_MAX_RETRIES", "3")?;
    let fetch_backoff_base_ms = u64_var("RADAR_FETCH_BACKOFF_BASE_MS", "2000")?;
    let fetch_backoff_max_ms = u64_var("RADAR_FETCH_BACKOFF_MAX_MS", "60000")?;
    let pacing_widen_factor = f64_var("RADAR_PACING_WIDEN_FACTOR", "1.5")?;
    let pacing_min_cap_ms = u64_var("RADAR_PACING_MIN_CAP_MS", "10000")?;
    let pacing_max_cap_ms = u64_var("RADAR_PACING_MAX_CAP_MS", "20000")?;

    let harvest_page_size = u32_var("RADAR_HARVEST_PAGE_SIZE", "100")?;
    let harvest_item_cap = usize_var("RADAR_HARVEST_ITEM_CAP", "500")?;

    let tei_url = or_default("RADAR_TEI_URL", "http://localhost:8080")
        .trim_end_matches('/')
        .to_string();
    let enrich_url = or_default("RADAR_ENRICH_URL", "https://api.openai.com/v1")
        .trim_end_matches('/')
        .to_string();
    let enrich_api_key = lookup("RADAR_ENRICH_API_KEY").ok();
    let enrich_model = or_default("RADAR_ENRICH_MODEL", "gpt-4o-mini");
    let enrich_concurrency = usize_var("RADAR_ENRICH_CONCURRENCY", "4")?;
    let enrich_timeout_secs = u64_var("RADAR_ENRICH_TIMEOUT_SECS", "60")?;

    let context_max_tokens = usize_var("RADAR_CONTEXT_MAX_TOKENS", "7500")?;
    let context_reply_reserve = usize_var("RADAR_CONTEXT_REPLY_RESERVE", "1000")?;
    let score_batch_size = usize_var("RADAR_SCORE_BATCH_SIZE", "50")?;
    let run_stall_timeout_mins = u64_var("RADAR_RUN_STALL_TIMEOUT_MINS", "15")?;
    let schedule_cron = or_default("RADAR_SCHEDULE_CRON", "0 0 */6 * * *");

    Ok(AppConfig {
        env,
        log_level,
        registry_path,
        database_url,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        source_base_url,
        fetch_timeout_secs,
        fetch_min_delay_ms,
        fetch_max_delay_ms,
        fetch_burst_probability,
        fetch_burst_multiplier,
        fetch_max_retries,
        fetch_backoff_base_ms,
        fetch_backoff_max_ms,
        pacing_widen_factor,
        pacing_min_cap_ms,
        pacing_max_cap_ms,
        harvest_page_size,
        harvest_item_cap,
        tei_url,
        enrich_url,
        enrich_api_key,
        enrich_model,
        enrich_concurrency,
        enrich_timeout_secs,
        context_max_tokens,
        context_reply_reserve,
        score_batch_size,
        run_stall_timeout_mins,
        schedule_cron,
    })
}

fn parse_as<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
