use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use esgate_config::{Config, Error};

const SAMPLE_CONFIG_TOML: &str = include_str!("fixtures/sample_config.toml");

fn sample_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value = toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.");
	let table = root
		.as_table_mut()
		.and_then(|root| root.get_mut(section))
		.and_then(Value::as_table_mut)
		.expect("Sample config must include the requested section.");

	table.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render sample config.")
}

fn write_temp_config(payload: &str) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now().duration_since(UNIX_EPOCH).expect("Clock before epoch.").as_nanos();
	let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
	let path = env::temp_dir().join(format!("esgate_config_test_{nanos}_{seq}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn validation_message(raw: &str) -> String {
	match esgate_config::parse(raw) {
		Err(Error::Validation { message }) => message,
		other => panic!("Expected validation error, got {other:?}."),
	}
}

#[test]
fn loads_sample_config_and_normalizes() {
	let path = write_temp_config(SAMPLE_CONFIG_TOML);
	let cfg: Config = esgate_config::load(&path).expect("Failed to load sample config.");

	fs::remove_file(&path).expect("Failed to remove test config.");

	assert_eq!(cfg.search_backend.url, "http://127.0.0.1:9200");
	assert!(cfg.search_backend.api_key.is_none());
	assert_eq!(cfg.security.fail_mode, "open");
	assert_eq!(cfg.limits.max_size, 1_000);
	assert_eq!(cfg.executor.max_attempts, 3);
}

#[test]
fn missing_sections_fall_back_to_defaults() {
	let cfg = esgate_config::parse("[service]\nlog_level = \"debug\"\n").expect("Expected defaults.");

	assert_eq!(cfg.service.log_level, "debug");
	assert_eq!(cfg.limits.default_size, 100);
	assert_eq!(cfg.limits.default_timeout, "30s");
	assert_eq!(cfg.executor.call_token, "execute_elasticsearch_query");
	assert_eq!(cfg.analysis.large_result_threshold, 10_000);
}

#[test]
fn rejects_unknown_fail_mode() {
	let raw = sample_with("security", "fail_mode", Value::String("maybe".to_string()));

	assert!(validation_message(&raw).contains("security.fail_mode"));
}

#[test]
fn rejects_default_size_above_max_size() {
	let raw = sample_with("limits", "default_size", Value::Integer(5_000));

	assert!(validation_message(&raw).contains("limits.default_size"));
}

#[test]
fn rejects_malformed_default_timeout() {
	let raw = sample_with("limits", "default_timeout", Value::String("soon".to_string()));

	assert!(validation_message(&raw).contains("limits.default_timeout"));
}

#[test]
fn rejects_zero_history_cap() {
	let raw = sample_with("executor", "history_cap", Value::Integer(0));

	assert!(validation_message(&raw).contains("executor.history_cap"));
}

#[test]
fn rejects_non_http_backend_url() {
	let raw = sample_with("search_backend", "url", Value::String("localhost:9200".to_string()));

	assert!(validation_message(&raw).contains("search_backend.url"));
}

#[test]
fn reports_read_errors_with_path() {
	let path = env::temp_dir().join("esgate_config_missing_file.toml");
	let err = esgate_config::load(&path).expect_err("Expected read error.");

	assert!(matches!(err, Error::ReadConfig { .. }));
	assert!(err.to_string().contains("esgate_config_missing_file.toml"));
}
