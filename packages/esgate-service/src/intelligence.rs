use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::Value;

use crate::{
	Error, Result, SchemaProvider, SearchBackend,
	analysis::{
		AnalysisCache, FieldMap, QueryAnalysis, QueryAnalyzer,
		cache::{analysis_cache_key, cache_key_prefix},
	},
	error,
	executor::sanitize,
	optimize::{QueryOptimizer, Strategy},
};
use esgate_config::{Config, Limits};
use esgate_domain::{
	blocklist,
	limits::{self, apply_limits},
	threat::ThreatScanner,
};

#[derive(Clone, Debug, Serialize)]
pub struct SearchMetrics {
	pub strategy: Strategy,
	pub original_size: Option<u64>,
	pub optimized_size: u64,
	pub execution_ms: u64,
	pub cache_hit: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct EnhancedSearchResult {
	pub hits: Vec<Value>,
	pub total_hits: u64,
	pub max_score: Option<f64>,
	pub took_ms: u64,
	pub timed_out: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub aggregations: Option<Value>,
	pub analysis: QueryAnalysis,
	pub metrics: SearchMetrics,
	pub suggestions: Vec<String>,
}

/// Schema-aware search: analyze, optimize for a strategy, clamp, then execute.
pub struct QueryIntelligence {
	analyzer: QueryAnalyzer,
	optimizer: QueryOptimizer,
	cache: Option<AnalysisCache>,
	scanner: Arc<ThreatScanner>,
	backend: Arc<dyn SearchBackend>,
	schema: Arc<dyn SchemaProvider>,
	limits: Limits,
	timeout: Duration,
	large_result_threshold: u64,
}
impl QueryIntelligence {
	pub fn new(
		cfg: &Config,
		scanner: Arc<ThreatScanner>,
		backend: Arc<dyn SearchBackend>,
		schema: Arc<dyn SchemaProvider>,
	) -> Self {
		Self {
			analyzer: QueryAnalyzer::new(
				backend.clone(),
				Duration::from_millis(cfg.search_backend.count_timeout_ms),
				cfg.limits.max_query_depth,
			),
			optimizer: QueryOptimizer::from_config(cfg),
			cache: AnalysisCache::from_config(&cfg.analysis),
			scanner,
			backend,
			schema,
			limits: cfg.limits.clone(),
			timeout: Duration::from_millis(cfg.search_backend.timeout_ms),
			large_result_threshold: cfg.analysis.large_result_threshold,
		}
	}

	/// Returns the analysis and whether it came from the cache.
	pub async fn analyze(&self, index: &str, body: &Value) -> Result<(QueryAnalysis, bool)> {
		check_target(index, body)?;

		let key = analysis_cache_key(index, body);

		if let Some(analysis) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
			tracing::debug!(index, cache_key_prefix = cache_key_prefix(&key), "Analysis cache hit.");

			return Ok((analysis, true));
		}

		let schema = self.field_map(index).await;
		let analysis = self.analyzer.analyze(&schema, index, body).await;

		if let Some(cache) = &self.cache {
			cache.insert(key, analysis.clone());
		}

		Ok((analysis, false))
	}

	pub async fn search(
		&self,
		index: &str,
		body: &Value,
		strategy: Strategy,
	) -> Result<EnhancedSearchResult> {
		check_target(index, body)?;
		self.check_security(body)?;

		let (analysis, cache_hit) = self.analyze(index, body).await?;
		let optimized = self.optimizer.optimize(body, &analysis, strategy);
		let limited = apply_limits(&optimized, &self.limits);
		let started = Instant::now();
		let response =
			tokio::time::timeout(self.timeout, self.backend.search(index, &limited, self.timeout))
				.await
				.map_err(|_| self.timed_out())?
				.map_err(|err| self.backend_failure(index, err))?;
		let execution_ms = started.elapsed().as_millis() as u64;
		let sanitized = sanitize::sanitize_response(&response, self.limits.max_source_bytes);
		let total_hits = sanitize::result_count(&response).unwrap_or(0);
		let mut suggestions = analysis.optimization_opportunities.clone();

		if total_hits == 0 {
			suggestions
				.push("No documents matched; broaden the query or relax its filters.".to_string());
		} else if total_hits > self.large_result_threshold {
			suggestions.push(format!(
				"More than {} documents matched; add filters to narrow the result set.",
				self.large_result_threshold
			));
		}

		tracing::info!(
			index,
			%strategy,
			cache_hit,
			total_hits,
			execution_ms,
			complexity = ?analysis.complexity,
			"Analysis-driven search completed."
		);

		Ok(EnhancedSearchResult {
			hits: sanitized.pointer("/hits/hits").and_then(Value::as_array).cloned().unwrap_or_default(),
			total_hits,
			max_score: response.pointer("/hits/max_score").and_then(Value::as_f64),
			took_ms: response.get("took").and_then(Value::as_u64).unwrap_or(0),
			timed_out: response.get("timed_out").and_then(Value::as_bool).unwrap_or(false),
			aggregations: response.get("aggregations").cloned(),
			metrics: SearchMetrics {
				strategy,
				original_size: body.get("size").and_then(Value::as_u64),
				optimized_size: limited.get("size").and_then(Value::as_u64).unwrap_or(0),
				execution_ms,
				cache_hit,
			},
			analysis,
			suggestions,
		})
	}

	fn check_security(&self, body: &Value) -> Result<()> {
		let serialized = body.to_string();

		if let Err(blocked) = blocklist::check(&serialized) {
			return Err(Error::SecurityViolation {
				message: format!("blocked operation {}", blocked.operation),
			});
		}

		let detection = self.scanner.scan_text(&serialized);

		if detection.should_block {
			tracing::warn!(
				risk_score = detection.risk_score,
				threat_types = ?detection.threat_types(),
				"Search body blocked by threat scan."
			);

			return Err(Error::SecurityViolation {
				message: format!("risk score {}", detection.risk_score),
			});
		}

		Ok(())
	}

	fn timed_out(&self) -> Error {
		Error::Timeout { message: format!("Search exceeded {} ms.", self.timeout.as_millis()) }
	}

	/// Backend text reaches callers only redacted and bounded.
	fn backend_failure(&self, index: &str, err: color_eyre::Report) -> Error {
		if error::is_timeout(&err) {
			return self.timed_out();
		}

		let message = sanitize::truncate_chars(
			&self.scanner.redact(&err.to_string()),
			self.limits.max_error_chars,
		);

		tracing::warn!(index, error = %message, "Analysis-driven search failed.");

		Error::Provider { message }
	}

	/// Schema failures degrade to an empty field map; analysis must not block the search.
	async fn field_map(&self, index: &str) -> FieldMap {
		match self.schema.get_schema(index).await {
			Ok(mapping) => FieldMap::from_mapping(&mapping),
			Err(err) => {
				tracing::warn!(index, error = %err, "Schema lookup failed; analyzing without it.");

				FieldMap::default()
			},
		}
	}
}

fn check_target(index: &str, body: &Value) -> Result<()> {
	if !limits::is_allowed_index(index) {
		return Err(Error::InvalidRequest {
			message: "index is not an allowed index name.".to_string(),
		});
	}
	if !body.is_object() {
		return Err(Error::InvalidRequest { message: "search body must be an object.".to_string() });
	}

	Ok(())
}
