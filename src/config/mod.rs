use std::env;

use crate::error::AppError;

/// Default reasoning backend location.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub request: RequestConfig,
    pub logging: LoggingConfig,
    pub graph: GraphQueryConfig,
}

/// Reasoning backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Graph query parameters used for enrichment and in-graph search
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQueryConfig {
    pub depth: u32,
    pub limit: u32,
    pub data_sources: Vec<String>,
    /// Id prefix of nodes produced by the lightweight graph query.
    pub synthetic_prefix: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let base_url =
            env::var("ASSISTANT_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(AppError::Config {
                message: format!("ASSISTANT_BASE_URL must be an http(s) URL, got '{}'", base_url),
            });
        }

        let backend = BackendConfig {
            base_url,
            api_key: env::var("ASSISTANT_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
        };

        let request = RequestConfig {
            timeout_ms: parse_var("REQUEST_TIMEOUT_MS").unwrap_or(30000),
            max_retries: parse_var("MAX_RETRIES").unwrap_or(2),
            retry_delay_ms: parse_var("RETRY_DELAY_MS").unwrap_or(500),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let defaults = GraphQueryConfig::default();
        let graph = GraphQueryConfig {
            depth: parse_var("GRAPH_DEPTH").unwrap_or(defaults.depth),
            limit: parse_var("GRAPH_LIMIT").unwrap_or(defaults.limit),
            data_sources: env::var("GRAPH_DATA_SOURCES")
                .ok()
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect::<Vec<_>>()
                })
                .filter(|sources| !sources.is_empty())
                .unwrap_or(defaults.data_sources),
            synthetic_prefix: env::var("SYNTHETIC_NODE_PREFIX")
                .unwrap_or(defaults.synthetic_prefix),
        };

        if graph.limit == 0 {
            return Err(AppError::Config {
                message: "GRAPH_LIMIT must be greater than zero".to_string(),
            });
        }

        Ok(Config {
            backend,
            request,
            logging,
            graph,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl Default for GraphQueryConfig {
    fn default() -> Self {
        Self {
            depth: 2,
            limit: 50,
            data_sources: vec!["knowledge_graph".to_string()],
            synthetic_prefix: "local_".to_string(),
        }
    }
}
