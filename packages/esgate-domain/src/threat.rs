//! Secret, credential and PII detection over chat messages.
//!
//! The pattern table is compiled once per process. Each regex match against a message becomes one
//! [`ThreatInstance`]; instances are folded into a 0-100 risk score and a block decision.
//!
//! When a scan cannot complete, [`FailMode`] decides the outcome. `Open` (the default) lets the
//! content through with an error annotation; `Closed` blocks it. Operators must pick one
//! explicitly in `security.fail_mode`.

use std::{
	borrow::Cow,
	fmt::{Display, Formatter},
	sync::{Arc, OnceLock},
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::history::BoundedLog;

pub const DEFAULT_THREATS: &[ThreatDefinition] = &[
	ThreatDefinition {
		threat_type: "provider_api_key",
		level: ThreatLevel::Critical,
		pattern: r"\bsk-(?:[A-Za-z]+-)?[A-Za-z0-9_]{16,}",
		description: "LLM provider API key.",
		remediation: "Revoke the key and remove it from the conversation.",
	},
	ThreatDefinition {
		threat_type: "secret_assignment",
		level: ThreatLevel::High,
		pattern: r#"(?i)\b(?:api[_-]?key|access[_-]?token|auth[_-]?token|token|secret|password|passwd)\s*["']?\s*[:=]\s*["']?[^\s"',}]{6,}"#,
		description: "Credential assigned to a key, token, secret or password field.",
		remediation: "Move the credential to a secret store and reference it indirectly.",
	},
	ThreatDefinition {
		threat_type: "bearer_token",
		level: ThreatLevel::High,
		pattern: r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]{20,}=*",
		description: "HTTP bearer token.",
		remediation: "Invalidate the session token.",
	},
	ThreatDefinition {
		threat_type: "cloud_access_key",
		level: ThreatLevel::Critical,
		pattern: r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b",
		description: "Cloud access key ID.",
		remediation: "Deactivate the access key and audit its recent use.",
	},
	ThreatDefinition {
		threat_type: "jwt",
		level: ThreatLevel::High,
		pattern: r"\beyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}",
		description: "JSON Web Token.",
		remediation: "Expire the token and rotate the signing key if it was long-lived.",
	},
	ThreatDefinition {
		threat_type: "private_key",
		level: ThreatLevel::Critical,
		pattern: r"-----BEGIN (?:[A-Z0-9]+ )*PRIVATE KEY-----",
		description: "PEM private key.",
		remediation: "Treat the key pair as compromised and reissue it.",
	},
	ThreatDefinition {
		threat_type: "database_uri",
		level: ThreatLevel::Critical,
		pattern: r#"(?i)\b(?:postgres(?:ql)?|mysql|mssql|mongodb(?:\+srv)?|redis|amqp)://[^\s:/@"]+:[^\s@/"]+@[^\s"]+"#,
		description: "Database connection URI with embedded credentials.",
		remediation: "Rotate the database password and load the URI from configuration.",
	},
	ThreatDefinition {
		threat_type: "private_ip",
		level: ThreatLevel::Low,
		pattern: r"\b(?:10\.\d{1,3}\.\d{1,3}\.\d{1,3}|192\.168\.\d{1,3}\.\d{1,3}|172\.(?:1[6-9]|2\d|3[01])\.\d{1,3}\.\d{1,3})\b",
		description: "Private network address.",
		remediation: "Avoid exposing internal topology.",
	},
	ThreatDefinition {
		threat_type: "email_credential",
		level: ThreatLevel::Medium,
		pattern: r#"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\s*[:|]\s*[^\s"',}]{6,}"#,
		description: "Email address paired with what looks like a password.",
		remediation: "Reset the account password.",
	},
	ThreatDefinition {
		threat_type: "credit_card",
		level: ThreatLevel::High,
		pattern: r"\b(?:\d{4}[- ]){3}\d{4}\b|\b\d{16}\b",
		description: "Payment card number.",
		remediation: "Remove cardholder data; it must not enter the search pipeline.",
	},
	ThreatDefinition {
		threat_type: "ssn",
		level: ThreatLevel::High,
		pattern: r"\b\d{3}-\d{2}-\d{4}\b",
		description: "Social security number.",
		remediation: "Remove the identifier from the request.",
	},
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatLevel {
	Low,
	Medium,
	High,
	Critical,
}
impl ThreatLevel {
	pub fn base_score(self) -> u32 {
		match self {
			Self::Low => 10,
			Self::Medium => 25,
			Self::High => 50,
			Self::Critical => 75,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
	Open,
	Closed,
}
impl FailMode {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"open" => Some(Self::Open),
			"closed" => Some(Self::Closed),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug)]
pub struct ThreatDefinition {
	pub threat_type: &'static str,
	pub level: ThreatLevel,
	pub pattern: &'static str,
	pub description: &'static str,
	pub remediation: &'static str,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
	pub role: String,
	pub content: Value,
}
impl Message {
	pub fn new(role: impl Into<String>, content: impl Into<Value>) -> Self {
		Self { role: role.into(), content: content.into() }
	}

	/// Scanned text: strings verbatim, anything else as compact JSON with sorted keys.
	pub fn text(&self) -> Cow<'_, str> {
		match &self.content {
			Value::String(text) => Cow::Borrowed(text.as_str()),
			other => Cow::Owned(other.to_string()),
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct ThreatInstance {
	pub threat_type: String,
	pub level: ThreatLevel,
	pub description: String,
	pub remediation: String,
	pub message_index: usize,
	/// Redacted preview of the matched text. Never empty.
	pub pattern_match: String,
	pub match_len: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct DetectionMetadata {
	pub messages_scanned: usize,
	pub patterns_checked: usize,
	#[serde(with = "time::serde::rfc3339")]
	pub scanned_at: OffsetDateTime,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DetectionResult {
	pub threats: Vec<ThreatInstance>,
	pub risk_score: u32,
	pub should_block: bool,
	pub metadata: DetectionMetadata,
}
impl DetectionResult {
	pub fn critical_count(&self) -> usize {
		self.threats.iter().filter(|threat| threat.level == ThreatLevel::Critical).count()
	}

	pub fn threat_types(&self) -> Vec<String> {
		let mut types: Vec<String> =
			self.threats.iter().map(|threat| threat.threat_type.clone()).collect();

		types.sort();
		types.dedup();

		types
	}
}

/// What the detection history keeps per scan. Matched text is never retained.
#[derive(Clone, Debug, Serialize)]
pub struct DetectionSummary {
	#[serde(with = "time::serde::rfc3339")]
	pub scanned_at: OffsetDateTime,
	pub threat_count: usize,
	pub threat_types: Vec<String>,
	pub risk_score: u32,
	pub should_block: bool,
	pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionStats {
	pub total: usize,
	pub blocked: usize,
	pub failed: usize,
	pub mean_risk_score: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanError {
	InputTooLarge { bytes: usize, limit: usize },
}
impl Display for ScanError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::InputTooLarge { bytes, limit } => {
				write!(f, "scan input exceeds {limit} bytes ({bytes} bytes)")
			},
		}
	}
}

#[derive(Debug)]
struct CompiledThreat {
	definition: ThreatDefinition,
	regex: Regex,
}

pub struct ThreatScanner {
	patterns: Arc<Vec<CompiledThreat>>,
	fail_mode: FailMode,
	max_scan_bytes: usize,
	history: Arc<BoundedLog<DetectionSummary>>,
}
impl ThreatScanner {
	pub fn new(cfg: &esgate_config::Security) -> Self {
		Self::build(default_patterns(), cfg)
	}

	/// Scanner over a caller-supplied table. Entries whose pattern does not compile are skipped.
	pub fn with_definitions(definitions: &[ThreatDefinition], cfg: &esgate_config::Security) -> Self {
		Self::build(Arc::new(compile(definitions)), cfg)
	}

	pub fn with_history(mut self, history: Arc<BoundedLog<DetectionSummary>>) -> Self {
		self.history = history;

		self
	}

	pub fn fail_mode(&self) -> FailMode {
		self.fail_mode
	}

	pub fn pattern_count(&self) -> usize {
		self.patterns.len()
	}

	pub fn history(&self) -> &BoundedLog<DetectionSummary> {
		&self.history
	}

	/// Never fails; scan errors are resolved through the configured [`FailMode`].
	pub fn detect(&self, messages: &[Message]) -> DetectionResult {
		let result = match self.try_detect(messages) {
			Ok(result) => result,
			Err(err) => {
				tracing::warn!(
					error = %err,
					fail_mode = ?self.fail_mode,
					"Threat scan did not complete; applying fail mode."
				);

				self.degraded(messages.len(), err)
			},
		};

		self.history.push(DetectionSummary {
			scanned_at: result.metadata.scanned_at,
			threat_count: result.threats.len(),
			threat_types: result.threat_types(),
			risk_score: result.risk_score,
			should_block: result.should_block,
			error: result.metadata.error.clone(),
		});

		result
	}

	pub fn scan_text(&self, text: &str) -> DetectionResult {
		self.detect(&[Message::new("user", text)])
	}

	pub fn try_detect(&self, messages: &[Message]) -> Result<DetectionResult, ScanError> {
		let mut threats = Vec::new();
		let mut scanned_bytes = 0_usize;

		for (message_index, message) in messages.iter().enumerate() {
			let text = message.text();

			scanned_bytes = scanned_bytes.saturating_add(text.len());

			if scanned_bytes > self.max_scan_bytes {
				return Err(ScanError::InputTooLarge {
					bytes: scanned_bytes,
					limit: self.max_scan_bytes,
				});
			}

			for compiled in self.patterns.iter() {
				for found in compiled.regex.find_iter(&text) {
					if found.as_str().is_empty() {
						continue;
					}

					threats.push(ThreatInstance {
						threat_type: compiled.definition.threat_type.to_string(),
						level: compiled.definition.level,
						description: compiled.definition.description.to_string(),
						remediation: compiled.definition.remediation.to_string(),
						message_index,
						pattern_match: redact_preview(found.as_str()),
						match_len: found.as_str().len(),
					});
				}
			}
		}

		let risk_score = risk_score(&threats);
		let critical_count =
			threats.iter().filter(|threat| threat.level == ThreatLevel::Critical).count();

		Ok(DetectionResult {
			should_block: should_block(risk_score, critical_count),
			threats,
			risk_score,
			metadata: DetectionMetadata {
				messages_scanned: messages.len(),
				patterns_checked: self.patterns.len(),
				scanned_at: OffsetDateTime::now_utc(),
				error: None,
			},
		})
	}

	/// Replaces every match of every pattern with `[REDACTED:<threat_type>]`.
	pub fn redact(&self, text: &str) -> String {
		let mut redacted = text.to_string();

		for compiled in self.patterns.iter() {
			let replacement = format!("[REDACTED:{}]", compiled.definition.threat_type);

			redacted = compiled.regex.replace_all(&redacted, replacement.as_str()).into_owned();
		}

		redacted
	}

	pub fn stats(&self) -> DetectionStats {
		let entries = self.history.snapshot();

		if entries.is_empty() {
			return DetectionStats::default();
		}

		let total_risk: u64 = entries.iter().map(|entry| u64::from(entry.risk_score)).sum();

		DetectionStats {
			total: entries.len(),
			blocked: entries.iter().filter(|entry| entry.should_block).count(),
			failed: entries.iter().filter(|entry| entry.error.is_some()).count(),
			mean_risk_score: total_risk as f64 / entries.len() as f64,
		}
	}

	fn build(patterns: Arc<Vec<CompiledThreat>>, cfg: &esgate_config::Security) -> Self {
		let fail_mode = FailMode::parse(&cfg.fail_mode).unwrap_or_else(|| {
			tracing::warn!(fail_mode = %cfg.fail_mode, "Unknown fail mode; defaulting to open.");

			FailMode::Open
		});

		Self {
			patterns,
			fail_mode,
			max_scan_bytes: cfg.max_scan_bytes,
			history: Arc::new(BoundedLog::new(cfg.detection_history_cap)),
		}
	}

	fn degraded(&self, messages_scanned: usize, err: ScanError) -> DetectionResult {
		let (risk_score, should_block) = match self.fail_mode {
			FailMode::Open => (0, false),
			FailMode::Closed => (100, true),
		};

		DetectionResult {
			threats: Vec::new(),
			risk_score,
			should_block,
			metadata: DetectionMetadata {
				messages_scanned,
				patterns_checked: 0,
				scanned_at: OffsetDateTime::now_utc(),
				error: Some(err.to_string()),
			},
		}
	}
}

/// Sum of level scores, amplified by up to 1.5x when several threats co-occur, capped at 100.
pub fn risk_score(threats: &[ThreatInstance]) -> u32 {
	if threats.is_empty() {
		return 0;
	}

	let base: u32 = threats.iter().map(|threat| threat.level.base_score()).sum();
	let count = threats.len();
	let multiplier = if count > 1 { (1.0 + 0.1 * (count - 1) as f64).min(1.5) } else { 1.0 };

	(f64::from(base) * multiplier).floor().min(100.0) as u32
}

pub fn should_block(risk_score: u32, critical_count: usize) -> bool {
	critical_count > 0 || risk_score >= 75
}

fn default_patterns() -> Arc<Vec<CompiledThreat>> {
	static PATTERNS: OnceLock<Arc<Vec<CompiledThreat>>> = OnceLock::new();

	Arc::clone(PATTERNS.get_or_init(|| Arc::new(compile(DEFAULT_THREATS))))
}

fn compile(definitions: &[ThreatDefinition]) -> Vec<CompiledThreat> {
	definitions
		.iter()
		.filter_map(|definition| match Regex::new(definition.pattern) {
			Ok(regex) => Some(CompiledThreat { definition: *definition, regex }),
			Err(err) => {
				tracing::warn!(
					threat_type = definition.threat_type,
					error = %err,
					"Skipping threat pattern that does not compile."
				);

				None
			},
		})
		.collect()
}

fn redact_preview(matched: &str) -> String {
	let prefix: String = matched.chars().take(4).collect();

	format!("{prefix}***")
}
