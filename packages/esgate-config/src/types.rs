use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
	pub service: Service,
	pub search_backend: SearchBackend,
	pub llm: LlmProviderConfig,
	pub limits: Limits,
	pub security: Security,
	pub executor: Executor,
	pub analysis: Analysis,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Service {
	pub log_level: String,
}
impl Default for Service {
	fn default() -> Self {
		Self { log_level: "info".to_string() }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SearchBackend {
	pub url: String,
	/// Optional. Sent as `Authorization: ApiKey <value>`.
	pub api_key: Option<String>,
	pub timeout_ms: u64,
	/// Timeout for the document-count estimate issued during query analysis.
	pub count_timeout_ms: u64,
}
impl Default for SearchBackend {
	fn default() -> Self {
		Self {
			url: "http://localhost:9200".to_string(),
			api_key: None,
			timeout_ms: 30_000,
			count_timeout_ms: 2_000,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}
impl Default for LlmProviderConfig {
	fn default() -> Self {
		Self {
			provider_id: "openai".to_string(),
			api_base: "https://api.openai.com".to_string(),
			api_key: String::new(),
			path: "/v1/chat/completions".to_string(),
			model: "gpt-4o-mini".to_string(),
			temperature: 0.1,
			timeout_ms: 60_000,
			default_headers: Map::new(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Limits {
	pub max_size: u64,
	pub default_size: u64,
	/// Elasticsearch duration string injected when a query carries no `timeout`.
	pub default_timeout: String,
	pub max_source_bytes: usize,
	pub max_error_chars: usize,
	pub max_query_depth: usize,
}
impl Default for Limits {
	fn default() -> Self {
		Self {
			max_size: 1_000,
			default_size: 100,
			default_timeout: "30s".to_string(),
			max_source_bytes: 10_000,
			max_error_chars: 200,
			max_query_depth: 64,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Security {
	/// What the threat scanner reports when it cannot complete a scan: "open" or "closed".
	pub fail_mode: String,
	pub max_scan_bytes: usize,
	pub detection_history_cap: usize,
}
impl Default for Security {
	fn default() -> Self {
		Self {
			fail_mode: "open".to_string(),
			max_scan_bytes: 1_048_576,
			detection_history_cap: 1_000,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Executor {
	pub call_token: String,
	pub history_cap: usize,
	pub max_attempts: u32,
}
impl Default for Executor {
	fn default() -> Self {
		Self {
			call_token: "execute_elasticsearch_query".to_string(),
			history_cap: 1_000,
			max_attempts: 3,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Analysis {
	pub cache_enabled: bool,
	pub cache_capacity: usize,
	pub cache_ttl_secs: u64,
	/// Estimated hit count above which total-hit tracking is capped.
	pub large_result_threshold: u64,
}
impl Default for Analysis {
	fn default() -> Self {
		Self {
			cache_enabled: true,
			cache_capacity: 256,
			cache_ttl_secs: 300,
			large_result_threshold: 10_000,
		}
	}
}
