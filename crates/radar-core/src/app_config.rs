use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub log_level: String,
    pub registry_path: PathBuf,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub source_base_url: String,
    pub fetch_timeout_secs: u64,
    pub fetch_min_delay_ms: u64,
    pub fetch_max_delay_ms: u64,
    pub fetch_burst_probability: f64,
    pub fetch_burst_multiplier: f64,
    pub fetch_max_retries: u32,
    pub fetch_backoff_base_ms: u64,
    pub fetch_backoff_max_ms: u64,
    pub pacing_widen_factor: f64,
    pub pacing_min_cap_ms: u64,
    pub pacing_max_cap_ms: u64,
    pub harvest_page_size: u32,
    pub harvest_item_cap: usize,
    pub tei_url: String,
    pub enrich_url: String,
    pub enrich_api_key: Option<String>,
    pub enrich_model: String,
    pub enrich_concurrency: usize,
    pub enrich_timeout_secs: u64,
    pub context_max_tokens: usize,
    pub context_reply_reserve: usize,
    pub score_batch_size: usize,
    pub run_stall_timeout_mins: u64,
    pub schedule_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("registry_path", &self.registry_path)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[redacted]"),
            )
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("source_base_url", &self.source_base_url)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("fetch_min_delay_ms", &self.fetch_min_delay_ms)
            .field("fetch_max_delay_ms", &self.fetch_max_delay_ms)
            .field("fetch_burst_probability", &self.fetch_burst_probability)
            .field("fetch_burst_multiplier", &self.fetch_burst_multiplier)
            .field("fetch_max_retries", &self.fetch_max_retries)
            .field("fetch_backoff_base_ms", &self.fetch_backoff_base_ms)
            .field("fetch_backoff_max_ms", &self.fetch_backoff_max_ms)
            .field("pacing_widen_factor", &self.pacing_widen_factor)
            .field("pacing_min_cap_ms", &self.pacing_min_cap_ms)
            .field("pacing_max_cap_ms", &self.pacing_max_cap_ms)
            .field("harvest_page_size", &self.harvest_page_size)
            .field("harvest_item_cap", &self.harvest_item_cap)
            .field("tei_url", &self.tei_url)
            .field("enrich_url", &self.enrich_url)
            .field(
                "enrich_api_key",
                &self.enrich_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("enrich_model", &self.enrich_model)
            .field("enrich_concurrency", &self.enrich_concurrency)
            .field("enrich_timeout_secs", &self.enrich_timeout_secs)
            .field("context_max_tokens", &self.context_max_tokens)
            .field("context_reply_reserve", &self.context_reply_reserve)
            .field("score_batch_size", &self.score_batch_size)
            .field("run_stall_timeout_mins", &self.run_stall_timeout_mins)
            .field("schedule_cron", &self.schedule_cron)
            .finish()
    }
}
