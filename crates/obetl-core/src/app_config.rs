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
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    /// Path to the dataset catalog YAML.
    pub catalog_path: PathBuf,
    /// URL of the Orange Book ZIP archive.
    pub source_base_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Browser User-Agent presented to the source server.
    pub fetch_user_agent: String,
    /// Additional attempts after the first failure, for transient errors.
    pub fetch_max_retries: u32,
    pub fetch_retry_backoff_base_ms: u64,
    /// Worker bound for independent datasets loading concurrently.
    pub max_concurrent_datasets: usize,
    /// Whole-pipeline retries per dataset on retryable failures.
    pub pipeline_max_retries: u32,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("catalog_path", &self.catalog_path)
            .field("source_base_url", &self.source_base_url)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("fetch_user_agent", &self.fetch_user_agent)
            .field("fetch_max_retries", &self.fetch_max_retries)
            .field(
                "fetch_retry_backoff_base_ms",
                &self.fetch_retry_backoff_base_ms,
            )
            .field("max_concurrent_datasets", &self.max_concurrent_datasets)
            .field("pipeline_max_retries", &self.pipeline_max_retries)
            .finish()
    }
}
