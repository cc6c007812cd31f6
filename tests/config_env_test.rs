//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Config::from_env() also loads a .env file
//! via dotenvy when one exists, so the tests only assert on variables they
//! set themselves.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use algo_graph_assistant::config::{Config, LogFormat};
use serial_test::serial;
use std::env;

fn with_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
    for (key, value) in vars {
        env::set_var(key, value);
    }
    f();
    for (key, _) in vars {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_config_from_env_loads_successfully() {
    let result = Config::from_env();
    assert!(result.is_ok(), "Config::from_env() failed: {:?}", result.err());
}

#[test]
#[serial]
fn test_config_from_env_custom_base_url_and_key() {
    with_vars(
        &[
            ("ASSISTANT_BASE_URL", "https://assistant.example.com"),
            ("ASSISTANT_API_KEY", "secret-key"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.backend.base_url, "https://assistant.example.com");
            assert_eq!(config.backend.api_key.as_deref(), Some("secret-key"));
        },
    );
}

#[test]
#[serial]
fn test_config_from_env_blank_key_is_none() {
    with_vars(&[("ASSISTANT_API_KEY", "   ")], || {
        let config = Config::from_env().unwrap();
        assert!(config.backend.api_key.is_none());
    });
}

#[test]
#[serial]
fn test_config_from_env_rejects_non_http_url() {
    with_vars(&[("ASSISTANT_BASE_URL", "ftp://files.example.com")], || {
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("ASSISTANT_BASE_URL"));
    });
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    with_vars(&[("LOG_FORMAT", "JSON"), ("LOG_LEVEL", "debug")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "debug");
    });
}

#[test]
#[serial]
fn test_config_from_env_request_overrides() {
    with_vars(
        &[
            ("REQUEST_TIMEOUT_MS", "1500"),
            ("MAX_RETRIES", "5"),
            ("RETRY_DELAY_MS", "20"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.request.timeout_ms, 1500);
            assert_eq!(config.request.max_retries, 5);
            assert_eq!(config.request.retry_delay_ms, 20);
        },
    );
}

#[test]
#[serial]
fn test_config_from_env_invalid_number_uses_default() {
    with_vars(&[("REQUEST_TIMEOUT_MS", "soon")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.request.timeout_ms, 30000);
    });
}

#[test]
#[serial]
fn test_config_from_env_graph_overrides() {
    with_vars(
        &[
            ("GRAPH_DEPTH", "3"),
            ("GRAPH_LIMIT", "120"),
            ("GRAPH_DATA_SOURCES", "knowledge_graph, leetcode ,,"),
            ("SYNTHETIC_NODE_PREFIX", "tmp_"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.graph.depth, 3);
            assert_eq!(config.graph.limit, 120);
            assert_eq!(
                config.graph.data_sources,
                vec!["knowledge_graph".to_string(), "leetcode".to_string()]
            );
            assert_eq!(config.graph.synthetic_prefix, "tmp_");
        },
    );
}

#[test]
#[serial]
fn test_config_from_env_zero_graph_limit_rejected() {
    with_vars(&[("GRAPH_LIMIT", "0")], || {
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("GRAPH_LIMIT"));
    });
}
