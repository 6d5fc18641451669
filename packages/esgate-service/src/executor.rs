//! Runs query requests embedded in LLM output through validation, security scanning and
//! resource limits before they reach the search backend.
//!
//! Each candidate advances through [`ExecutionStage`]s independently; a failure in one candidate
//! never affects its siblings. Raw backend errors are kept only in the redacted execution record
//! and are reachable through [`SafeExecutor::diagnostics`]. Callers see a generic message that
//! carries the execution id.

pub mod sanitize;

use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{SearchBackend, error};
use esgate_config::{Config, Limits};
use esgate_domain::{
	blocklist,
	extract::{CallTokenLocator, CandidateLocator, CandidateQuery, Extractor},
	history::BoundedLog,
	intent,
	limits::{self, apply_limits},
	threat::{Message, ThreatScanner},
};

const CONTEXT_DOCUMENTS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStage {
	Extracted,
	Validated,
	Scanned,
	Limited,
	Executed,
	Succeeded,
	Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
	#[error("Invalid query request: {message}")]
	Structural { message: String },
	#[error("Blocked by security policy: {reason}")]
	SecurityViolation { reason: String },
	#[error("Backend error: {message}")]
	Backend { message: String },
	#[error("Timed out after {timeout_ms} ms.")]
	Timeout { timeout_ms: u64 },
}
impl ExecutionError {
	pub fn error_type(&self) -> &'static str {
		match self {
			Self::Structural { .. } => "structural_error",
			Self::SecurityViolation { .. } => "security_violation",
			Self::Backend { .. } => "backend_error",
			Self::Timeout { .. } => "timeout",
		}
	}

	/// Whether asking the model for a corrected query may help.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Self::SecurityViolation { .. })
	}

	fn user_message(&self, execution_id: Uuid) -> String {
		match self {
			Self::Structural { message } => format!("Invalid query request: {message}"),
			Self::SecurityViolation { .. } => {
				format!("Query blocked by security policy (reference {execution_id}).")
			},
			Self::Backend { .. } => format!("Query execution failed (reference {execution_id})."),
			Self::Timeout { timeout_ms } => {
				format!("Query timed out after {timeout_ms} ms (reference {execution_id}).")
			},
		}
	}
}

/// Immutable audit entry, one per candidate.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionRecord {
	pub execution_id: Uuid,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	pub conversation_id: String,
	pub index: Option<String>,
	/// The body as it stood at the last completed stage.
	pub query_body: Value,
	pub success: bool,
	pub result_count: Option<u64>,
	pub duration_ms: u64,
	/// Truncated, secret-redacted diagnostic text.
	pub error: Option<String>,
	pub error_type: Option<String>,
	/// `Succeeded` or `Failed`.
	pub stage: ExecutionStage,
	/// Last stage the candidate completed.
	pub last_stage: ExecutionStage,
}

#[derive(Clone, Debug, Serialize)]
pub struct OutcomeMetadata {
	pub duration_ms: u64,
	pub result_count: Option<u64>,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExecutionOutcome {
	pub success: bool,
	pub execution_id: Uuid,
	pub index: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_type: Option<String>,
	pub metadata: OutcomeMetadata,
	/// Whether a corrected query could succeed. Always false on success.
	#[serde(skip)]
	pub retryable: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchResult {
	/// True when at least one candidate was found.
	pub executed: bool,
	pub query_count: usize,
	pub results: Vec<ExecutionOutcome>,
	pub conversation_id: String,
}
impl BatchResult {
	pub fn succeeded(&self) -> usize {
		self.results.iter().filter(|outcome| outcome.success).count()
	}

	/// True when some candidate failed in a way a corrected query cannot fix.
	pub fn has_unretryable_failure(&self) -> bool {
		self.results.iter().any(|outcome| !outcome.success && !outcome.retryable)
	}

	/// Chat message summarizing the batch for the model's next turn.
	pub fn to_context_message(&self) -> Value {
		let summary: Vec<Value> = self
			.results
			.iter()
			.map(|outcome| {
				if outcome.success {
					let result = outcome.result.as_ref().unwrap_or(&Value::Null);

					json!({
						"index": outcome.index,
						"success": true,
						"result_count": outcome.metadata.result_count,
						"documents": sanitize::hit_sources(result, CONTEXT_DOCUMENTS),
					})
				} else {
					json!({
						"index": outcome.index,
						"success": false,
						"error": outcome.error,
						"error_type": outcome.error_type,
					})
				}
			})
			.collect();
		let content = json!({ "query_results": summary }).to_string();

		json!({ "role": "system", "content": content })
	}
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
	pub total: usize,
	pub succeeded: usize,
	pub failed: usize,
	pub success_rate: f64,
	pub mean_duration_ms: f64,
}

struct ValidatedQuery {
	index: String,
	body: Value,
}

struct Executed {
	result: Value,
	result_count: Option<u64>,
}

/// What the record keeps about a candidate as it moves through the stages.
struct StageTrace {
	stage: ExecutionStage,
	index: Option<String>,
	body: Value,
}

pub struct SafeExecutor {
	extractor: Extractor<Box<dyn CandidateLocator>>,
	scanner: Arc<ThreatScanner>,
	backend: Arc<dyn SearchBackend>,
	history: Arc<BoundedLog<ExecutionRecord>>,
	limits: Limits,
	timeout: Duration,
}
impl SafeExecutor {
	pub fn new(cfg: &Config, scanner: Arc<ThreatScanner>, backend: Arc<dyn SearchBackend>) -> Self {
		Self {
			extractor: boxed_extractor(CallTokenLocator::new(cfg.executor.call_token.clone())),
			scanner,
			backend,
			history: Arc::new(BoundedLog::new(cfg.executor.history_cap)),
			limits: cfg.limits.clone(),
			timeout: Duration::from_millis(cfg.search_backend.timeout_ms),
		}
	}

	pub fn with_locator<L>(mut self, locator: L) -> Self
	where
		L: CandidateLocator + 'static,
	{
		self.extractor = boxed_extractor(locator);

		self
	}

	pub fn with_history(mut self, history: Arc<BoundedLog<ExecutionRecord>>) -> Self {
		self.history = history;

		self
	}

	pub fn history(&self) -> &BoundedLog<ExecutionRecord> {
		&self.history
	}

	pub fn extract(&self, text: &str) -> Vec<CandidateQuery> {
		self.extractor.extract(text)
	}

	pub async fn execute_text(
		&self,
		text: &str,
		conversation_id: &str,
		question: Option<&str>,
	) -> BatchResult {
		let candidates = self.extractor.extract(text);

		tracing::debug!(conversation_id, candidates = candidates.len(), "Extracted query candidates.");

		self.execute_candidates(&candidates, conversation_id, question).await
	}

	/// Runs candidates one at a time, in order.
	pub async fn execute_candidates(
		&self,
		candidates: &[CandidateQuery],
		conversation_id: &str,
		question: Option<&str>,
	) -> BatchResult {
		let mut results = Vec::with_capacity(candidates.len());

		for candidate in candidates {
			results.push(self.execute_candidate(candidate, conversation_id, question).await);
		}

		BatchResult {
			executed: !candidates.is_empty(),
			query_count: candidates.len(),
			results,
			conversation_id: conversation_id.to_string(),
		}
	}

	pub async fn execute_candidate(
		&self,
		candidate: &CandidateQuery,
		conversation_id: &str,
		question: Option<&str>,
	) -> ExecutionOutcome {
		let execution_id = Uuid::new_v4();
		let timestamp = OffsetDateTime::now_utc();
		let started = Instant::now();
		let mut trace = StageTrace {
			stage: ExecutionStage::Extracted,
			index: candidate.index().map(str::to_string),
			body: candidate.to_value(),
		};
		let result = self.run_stages(candidate, question, &mut trace).await;
		let duration_ms = started.elapsed().as_millis() as u64;
		let (outcome, record) = match result {
			Ok(executed) => {
				tracing::info!(
					%execution_id,
					conversation_id,
					index = trace.index.as_deref(),
					result_count = executed.result_count,
					duration_ms,
					"Query executed."
				);

				let record = ExecutionRecord {
					execution_id,
					timestamp,
					conversation_id: conversation_id.to_string(),
					index: trace.index.clone(),
					query_body: trace.body,
					success: true,
					result_count: executed.result_count,
					duration_ms,
					error: None,
					error_type: None,
					stage: ExecutionStage::Succeeded,
					last_stage: trace.stage,
				};
				let outcome = ExecutionOutcome {
					success: true,
					execution_id,
					index: trace.index,
					result: Some(executed.result),
					error: None,
					error_type: None,
					metadata: OutcomeMetadata {
						duration_ms,
						result_count: executed.result_count,
						timestamp,
					},
					retryable: false,
				};

				(outcome, record)
			},
			Err(err) => {
				self.log_failure(execution_id, conversation_id, trace.index.as_deref(), &err);

				// Redact before truncating so a cut cannot leave a partial secret behind.
				let diagnostic = sanitize::truncate_chars(
					&self.scanner.redact(&err.to_string()),
					self.limits.max_error_chars,
				);
				let record = ExecutionRecord {
					execution_id,
					timestamp,
					conversation_id: conversation_id.to_string(),
					index: trace.index.clone(),
					query_body: trace.body,
					success: false,
					result_count: None,
					duration_ms,
					error: Some(diagnostic),
					error_type: Some(err.error_type().to_string()),
					stage: ExecutionStage::Failed,
					last_stage: trace.stage,
				};
				let outcome = ExecutionOutcome {
					success: false,
					execution_id,
					index: trace.index,
					result: None,
					error: Some(err.user_message(execution_id)),
					error_type: Some(err.error_type().to_string()),
					metadata: OutcomeMetadata { duration_ms, result_count: None, timestamp },
					retryable: err.is_retryable(),
				};

				(outcome, record)
			},
		};

		self.history.push(record);

		outcome
	}

	/// Redacted diagnostic record for an execution id reported to a user.
	pub fn diagnostics(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
		self.history.find(|record| record.execution_id == execution_id)
	}

	pub fn recent(&self, n: usize) -> Vec<ExecutionRecord> {
		self.history.recent(n)
	}

	pub fn for_conversation(&self, conversation_id: &str) -> Vec<ExecutionRecord> {
		self.history.filter(|record| record.conversation_id == conversation_id)
	}

	pub fn stats(&self) -> ExecutionStats {
		let records = self.history.snapshot();

		if records.is_empty() {
			return ExecutionStats::default();
		}

		let total = records.len();
		let succeeded = records.iter().filter(|record| record.success).count();
		let total_duration: u64 = records.iter().map(|record| record.duration_ms).sum();

		ExecutionStats {
			total,
			succeeded,
			failed: total - succeeded,
			success_rate: succeeded as f64 / total as f64,
			mean_duration_ms: total_duration as f64 / total as f64,
		}
	}

	async fn run_stages(
		&self,
		candidate: &CandidateQuery,
		question: Option<&str>,
		trace: &mut StageTrace,
	) -> Result<Executed, ExecutionError> {
		let validated = validate(candidate)?;

		trace.stage = ExecutionStage::Validated;
		trace.index = Some(validated.index.clone());
		trace.body = validated.body.clone();

		self.scan(candidate)?;

		trace.stage = ExecutionStage::Scanned;

		let limited = apply_limits(&validated.body, &self.limits);

		trace.stage = ExecutionStage::Limited;
		trace.body = limited.clone();

		let count_only = question.map(intent::is_count_question).unwrap_or(false)
			&& candidate.size() == Some(0)
			&& !has_aggregations(&validated.body);
		let response = self.run(&validated.index, &limited, count_only).await?;

		trace.stage = ExecutionStage::Executed;

		Ok(Executed {
			result_count: sanitize::result_count(&response),
			result: sanitize::sanitize_response(&response, self.limits.max_source_bytes),
		})
	}

	fn scan(&self, candidate: &CandidateQuery) -> Result<(), ExecutionError> {
		let serialized = candidate.to_value().to_string();

		if let Err(blocked) = blocklist::check(&serialized) {
			return Err(ExecutionError::SecurityViolation {
				reason: format!("blocked operation {}", blocked.operation),
			});
		}

		let detection = self.scanner.detect(&[Message::new("user", serialized)]);

		if detection.should_block {
			return Err(ExecutionError::SecurityViolation {
				reason: format!(
					"risk score {} ({})",
					detection.risk_score,
					detection.threat_types().join(", ")
				),
			});
		}

		Ok(())
	}

	async fn run(&self, index: &str, body: &Value, count_only: bool) -> Result<Value, ExecutionError> {
		let timeout_ms = self.timeout.as_millis() as u64;

		if count_only {
			let query = body.get("query").cloned().unwrap_or_else(|| json!({ "match_all": {} }));
			let count_body = json!({ "query": query });
			let count = tokio::time::timeout(
				self.timeout,
				self.backend.count(index, &count_body, self.timeout),
			)
			.await
			.map_err(|_| ExecutionError::Timeout { timeout_ms })?
			.map_err(|err| backend_failure(err, timeout_ms))?;

			return Ok(json!({ "count": count }));
		}

		tokio::time::timeout(self.timeout, self.backend.search(index, body, self.timeout))
			.await
			.map_err(|_| ExecutionError::Timeout { timeout_ms })?
			.map_err(|err| backend_failure(err, timeout_ms))
	}

	fn log_failure(
		&self,
		execution_id: Uuid,
		conversation_id: &str,
		index: Option<&str>,
		err: &ExecutionError,
	) {
		let error_type = err.error_type();

		match err {
			ExecutionError::Structural { message } => tracing::info!(
				%execution_id,
				conversation_id,
				index,
				error_type,
				message = message.as_str(),
				"Query rejected."
			),
			ExecutionError::SecurityViolation { reason } => tracing::warn!(
				%execution_id,
				conversation_id,
				index,
				error_type,
				reason = reason.as_str(),
				"Query blocked."
			),
			ExecutionError::Backend { .. } | ExecutionError::Timeout { .. } => tracing::warn!(
				%execution_id,
				conversation_id,
				index,
				error_type,
				"Query execution failed."
			),
		}
	}
}

fn boxed_extractor<L>(locator: L) -> Extractor<Box<dyn CandidateLocator>>
where
	L: CandidateLocator + 'static,
{
	let locator: Box<dyn CandidateLocator> = Box::new(locator);

	Extractor::with_locator(locator)
}

fn validate(candidate: &CandidateQuery) -> Result<ValidatedQuery, ExecutionError> {
	let index = match candidate.raw.get("index") {
		Some(Value::String(index)) if !index.trim().is_empty() => index.clone(),
		_ => {
			return Err(ExecutionError::Structural {
				message: "index must be a non-empty string.".to_string(),
			});
		},
	};

	if !limits::is_allowed_index(&index) {
		return Err(ExecutionError::Structural {
			message: "index is not an allowed index name.".to_string(),
		});
	}
	if !candidate.query().map(Value::is_object).unwrap_or(false) {
		return Err(ExecutionError::Structural { message: "query must be an object.".to_string() });
	}

	let mut body: Map<String, Value> = candidate.raw.clone();

	body.remove("index");

	Ok(ValidatedQuery { index, body: Value::Object(body) })
}

/// HTTP-level deadlines race the outer one; both are reported as timeouts.
fn backend_failure(err: color_eyre::Report, timeout_ms: u64) -> ExecutionError {
	if error::is_timeout(&err) {
		return ExecutionError::Timeout { timeout_ms };
	}

	ExecutionError::Backend { message: err.to_string() }
}

fn has_aggregations(body: &Value) -> bool {
	body.get("aggs").is_some() || body.get("aggregations").is_some()
}
