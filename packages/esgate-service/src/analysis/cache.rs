use std::{
	collections::{HashMap, VecDeque},
	sync::Mutex,
};

use serde_json::Value;
use time::{Duration, OffsetDateTime};

use crate::analysis::QueryAnalysis;

const ANALYSIS_CACHE_SCHEMA_VERSION: i32 = 1;
const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;
/// Paging and response-shaping keys that do not change an analysis.
const VOLATILE_KEYS: &[&str] = &["size", "from", "timeout", "explain", "_source", "track_total_hits"];

/// Blake3 signature of `{index, body}` with volatile keys removed.
pub fn analysis_cache_key(index: &str, body: &Value) -> String {
	let mut body = body.clone();

	if let Some(map) = body.as_object_mut() {
		for key in VOLATILE_KEYS {
			map.remove(*key);
		}
	}

	let payload = serde_json::json!({
		"kind": "analysis",
		"schema_version": ANALYSIS_CACHE_SCHEMA_VERSION,
		"index": index,
		"body": body,
	});

	blake3::hash(payload.to_string().as_bytes()).to_hex().to_string()
}

pub fn cache_key_prefix(key: &str) -> &str {
	&key[..key.len().min(12)]
}

struct CachedAnalysis {
	analysis: QueryAnalysis,
	expires_at: OffsetDateTime,
}

#[derive(Default)]
struct CacheState {
	entries: HashMap<String, CachedAnalysis>,
	order: VecDeque<String>,
}

/// Bounded, TTL-expiring store of analyses. The oldest insertion is evicted first.
pub struct AnalysisCache {
	capacity: usize,
	ttl: Duration,
	state: Mutex<CacheState>,
}
impl AnalysisCache {
	pub fn new(capacity: usize, ttl_secs: u64) -> Self {
		Self {
			capacity: capacity.max(1),
			ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
			state: Mutex::new(CacheState::default()),
		}
	}

	pub fn from_config(cfg: &esgate_config::Analysis) -> Option<Self> {
		cfg.cache_enabled.then(|| Self::new(cfg.cache_capacity, cfg.cache_ttl_secs))
	}

	pub fn get(&self, key: &str) -> Option<QueryAnalysis> {
		self.get_at(key, OffsetDateTime::now_utc())
	}

	pub fn insert(&self, key: String, analysis: QueryAnalysis) {
		self.insert_at(key, analysis, OffsetDateTime::now_utc());
	}

	pub fn len(&self) -> usize {
		self.state.lock().unwrap_or_else(|err| err.into_inner()).entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn get_at(&self, key: &str, now: OffsetDateTime) -> Option<QueryAnalysis> {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
		let expired = match state.entries.get(key) {
			Some(cached) if cached.expires_at > now => return Some(cached.analysis.clone()),
			Some(_) => true,
			None => false,
		};

		if expired {
			state.entries.remove(key);
			state.order.retain(|queued| queued != key);
		}

		None
	}

	fn insert_at(&self, key: String, analysis: QueryAnalysis, now: OffsetDateTime) {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		if state.entries.contains_key(&key) {
			state.order.retain(|queued| queued != &key);
		}

		while state.entries.len() >= self.capacity && !state.entries.contains_key(&key) {
			let Some(oldest) = state.order.pop_front() else {
				break;
			};

			state.entries.remove(&oldest);
		}

		state.order.push_back(key.clone());
		state.entries.insert(key, CachedAnalysis { analysis, expires_at: now + self.ttl });
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use time::{Duration, OffsetDateTime};

	use crate::analysis::{
		FieldMap, analyze_with_estimate,
		cache::{AnalysisCache, analysis_cache_key},
	};

	fn analysis() -> crate::analysis::QueryAnalysis {
		analyze_with_estimate(&FieldMap::default(), &json!({"query": {"match_all": {}}}), 0, 64)
	}

	#[test]
	fn key_ignores_paging_but_not_the_query() {
		let a = analysis_cache_key("products", &json!({"query": {"match_all": {}}, "size": 5}));
		let b = analysis_cache_key("products", &json!({"size": 50, "query": {"match_all": {}}}));
		let c = analysis_cache_key("products", &json!({"query": {"match": {"name": "x"}}}));
		let d = analysis_cache_key("orders", &json!({"query": {"match_all": {}}}));

		assert_eq!(a, b);
		assert_ne!(a, c);
		assert_ne!(a, d);
		assert_eq!(a.len(), 64);
	}

	#[test]
	fn evicts_oldest_when_full() {
		let cache = AnalysisCache::new(2, 60);

		cache.insert("a".to_string(), analysis());
		cache.insert("b".to_string(), analysis());
		cache.insert("c".to_string(), analysis());

		assert_eq!(cache.len(), 2);
		assert!(cache.get("a").is_none());
		assert!(cache.get("b").is_some());
		assert!(cache.get("c").is_some());
	}

	#[test]
	fn expired_entries_are_dropped() {
		let cache = AnalysisCache::new(4, 10);
		let now = OffsetDateTime::now_utc();

		cache.insert_at("a".to_string(), analysis(), now);

		assert!(cache.get_at("a", now + Duration::seconds(5)).is_some());
		assert!(cache.get_at("a", now + Duration::seconds(11)).is_none());
		assert!(cache.is_empty());
	}
}
