use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scanner: ScannerConfig,
    pub ner: NerServiceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Orchestrator and sampling limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Parallel scan workers; each accepted job runs on one worker
    pub worker_count: usize,
    /// Submissions rejected with ResourceExhausted beyond this queue depth
    pub max_queued: usize,
    /// Default ceiling on concurrently borrowed handles per connection
    pub max_handles_per_connection: u32,
    /// Seconds a borrow waits for a free handle before failing
    pub handle_acquire_timeout_secs: u64,
    /// Per-query timeout against the target database, in seconds.
    /// Column sampling is hard-cancelled at twice this value.
    pub query_timeout_secs: u64,
    /// Seconds a cancelled job may take to reach a terminal state before
    /// it is force-failed
    pub cancellation_deadline_secs: u64,
}

/// NER sidecar endpoint and circuit-breaker tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NerServiceConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Non-null sample values sent per batch
    pub max_samples: usize,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before admitting a probe
    pub reset_timeout_secs: u64,
    /// Interval of the background health probe
    pub health_probe_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/privsense.db".to_string() }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_queued: 100,
            max_handles_per_connection: 10,
            handle_acquire_timeout_secs: 30,
            query_timeout_secs: 30,
            cancellation_deadline_secs: 30,
        }
    }
}

impl Default for NerServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 10,
            max_samples: 50,
            failure_threshold: 5,
            reset_timeout_secs: 30,
            health_probe_interval_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,privsense=debug".to_string(),
            file: Some("logs/privsense.log".to_string()),
        }
    }
}

impl ScannerConfig {
    pub fn handle_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.handle_acquire_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn cancellation_deadline(&self) -> Duration {
        Duration::from_secs(self.cancellation_deadline_secs)
    }
}

impl NerServiceConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "privsense")]
#[command(version, about = "PrivSense - PII discovery for relational databases")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Control-store database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Logging level (overrides config file, e.g., "info,privsense=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// NER sidecar base URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub ner_url: Option<String>,

    /// Enable/disable the NER strategy (overrides config file)
    #[arg(long, value_name = "BOOL")]
    pub ner_enabled: Option<bool>,

    /// Number of parallel scan workers (overrides config file)
    #[arg(long, value_name = "COUNT")]
    pub workers: Option<usize>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file
    /// support.
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(cli_args)
    }

    pub fn load_with_args(cli_args: CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_DATABASE_URL
    /// - APP_LOG_LEVEL
    /// - APP_NER_URL / APP_NER_ENABLED
    /// - APP_SCAN_WORKERS / APP_SCAN_MAX_QUEUED
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(url) = std::env::var("APP_NER_URL") {
            self.ner.base_url = url;
            tracing::info!("Override ner.base_url from env: {}", self.ner.base_url);
        }

        if let Ok(enabled) = std::env::var("APP_NER_ENABLED")
            && let Ok(val) = enabled.parse()
        {
            self.ner.enabled = val;
            tracing::info!("Override ner.enabled from env: {}", self.ner.enabled);
        }

        if let Ok(workers) = std::env::var("APP_SCAN_WORKERS")
            && let Ok(val) = workers.parse()
        {
            self.scanner.worker_count = val;
            tracing::info!("Override scanner.worker_count from env: {}", val);
        }

        if let Ok(queued) = std::env::var("APP_SCAN_MAX_QUEUED")
            && let Ok(val) = queued.parse()
        {
            self.scanner.max_queued = val;
            tracing::info!("Override scanner.max_queued from env: {}", val);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(url) = &args.ner_url {
            self.ner.base_url = url.clone();
            tracing::info!("Override ner.base_url from CLI: {}", self.ner.base_url);
        }

        if let Some(enabled) = args.ner_enabled {
            self.ner.enabled = enabled;
            tracing::info!("Override ner.enabled from CLI: {}", self.ner.enabled);
        }

        if let Some(workers) = args.workers {
            self.scanner.worker_count = workers;
            tracing::info!("Override scanner.worker_count from CLI: {}", workers);
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.scanner.worker_count == 0 {
            anyhow::bail!("scanner.worker_count must be > 0");
        }
        if self.scanner.max_handles_per_connection == 0 {
            anyhow::bail!("scanner.max_handles_per_connection must be > 0");
        }
        if self.scanner.query_timeout_secs == 0 {
            anyhow::bail!("scanner.query_timeout_secs must be > 0");
        }
        if self.ner.enabled && self.ner.base_url.is_empty() {
            anyhow::bail!("ner.base_url cannot be empty while ner.enabled is true");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
