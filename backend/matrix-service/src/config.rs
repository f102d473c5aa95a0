use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Remote spreadsheet store configuration
    pub sheet: SheetConfig,
    /// Local snapshot storage configuration
    pub storage: StorageConfig,
    /// Background outbox configuration
    pub outbox: OutboxConfig,
    /// Optional AI analyzer configuration
    pub insights: InsightsConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port, defaults to 8080 when not set
    pub http_port: u16,
}

#[derive(Debug, Clone)]
pub struct SheetConfig {
    /// Web-app endpoint URL; empty disables remote persistence and the
    /// service runs local-only (permanently degraded).
    pub endpoint_url: String,
    /// Hard per-request timeout
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the snapshot files
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Delivery attempts before a queued write is abandoned
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct InsightsConfig {
    /// API key for the generative analyzer; absent disables insights
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        // MATRIX_HTTP_PORT is optional; default to 8080
        let http_port = env::var("MATRIX_HTTP_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8080);

        // SHEET_ENDPOINT_URL may be unset: the service still starts and
        // serves from the local snapshot instead of refusing to boot.
        let endpoint_url = env::var("SHEET_ENDPOINT_URL").unwrap_or_default();

        let timeout_secs = env::var("SHEET_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(20);

        let data_dir = env::var("MATRIX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let max_retries = env::var("OUTBOX_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(5);

        let api_key = env::var("GEMINI_API_KEY")
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());

        let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());

        Ok(Self {
            server: ServerConfig { http_port },
            sheet: SheetConfig {
                endpoint_url,
                timeout: Duration::from_secs(timeout_secs),
            },
            storage: StorageConfig { data_dir },
            outbox: OutboxConfig { max_retries },
            insights: InsightsConfig { api_key, model },
        })
    }
}
