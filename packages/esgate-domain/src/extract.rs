//! Pulls query requests out of free-form LLM output.
//!
//! LLM text is not trusted to be well formed. Candidate objects are delimited by walking braces
//! (string-literal aware) instead of by a regex, so nested `bool`/`aggs` bodies stay intact, and a
//! broken occurrence is skipped without affecting the ones after it.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde_json::{Map, Value};

pub const DEFAULT_CALL_TOKEN: &str = "execute_elasticsearch_query";

/// Where a candidate object starts inside the scanned text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CandidateSpan {
	/// Byte offset of the marker that introduced the candidate.
	pub start: usize,
	/// Byte offset of the opening `{`.
	pub open: usize,
	/// Byte offset to continue scanning from when this candidate is discarded.
	pub resume: usize,
}

/// Finds the next place in `text` where the model emitted a query object.
pub trait CandidateLocator
where
	Self: Send + Sync,
{
	fn next_span(&self, text: &str, from: usize) -> Option<CandidateSpan>;
}

impl<T> CandidateLocator for Box<T>
where
	T: CandidateLocator + ?Sized,
{
	fn next_span(&self, text: &str, from: usize) -> Option<CandidateSpan> {
		(**self).next_span(text, from)
	}
}

/// Matches the `execute_elasticsearch_query({...})` call convention.
#[derive(Clone, Debug)]
pub struct CallTokenLocator {
	token: String,
}
impl CallTokenLocator {
	pub fn new(token: impl Into<String>) -> Self {
		Self { token: token.into() }
	}
}
impl Default for CallTokenLocator {
	fn default() -> Self {
		Self::new(DEFAULT_CALL_TOKEN)
	}
}
impl CandidateLocator for CallTokenLocator {
	fn next_span(&self, text: &str, from: usize) -> Option<CandidateSpan> {
		let mut cursor = from;

		while cursor < text.len() {
			let start = cursor + text.get(cursor..)?.find(self.token.as_str())?;
			let resume = start + self.token.len();

			if let Some(open) = opening_brace_after_call(text, resume) {
				return Some(CandidateSpan { start, open, resume });
			}

			cursor = resume;
		}

		None
	}
}

/// Matches fenced ```` ```json ```` blocks, for models that answer with plain JSON.
#[derive(Clone, Debug, Default)]
pub struct JsonFenceLocator;
impl CandidateLocator for JsonFenceLocator {
	fn next_span(&self, text: &str, from: usize) -> Option<CandidateSpan> {
		const FENCE: &str = "```json";

		let mut cursor = from;

		while cursor < text.len() {
			let start = cursor + text.get(cursor..)?.find(FENCE)?;
			let resume = start + FENCE.len();
			let body = text[resume..].trim_start();
			let open = text.len() - body.len();

			if body.starts_with('{') {
				return Some(CandidateSpan { start, open, resume });
			}

			cursor = resume;
		}

		None
	}
}

/// An unvalidated query request found in LLM output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CandidateQuery {
	pub raw: Map<String, Value>,
	/// Byte offset of the call marker in the source text.
	#[serde(skip)]
	pub offset: usize,
}
impl CandidateQuery {
	pub fn index(&self) -> Option<&str> {
		self.raw.get("index").and_then(Value::as_str)
	}

	pub fn query(&self) -> Option<&Value> {
		self.raw.get("query")
	}

	pub fn size(&self) -> Option<i64> {
		self.raw.get("size").and_then(Value::as_i64)
	}

	pub fn to_value(&self) -> Value {
		Value::Object(self.raw.clone())
	}
}

#[derive(Clone, Debug)]
pub struct ParseError {
	pub offset: usize,
	pub message: String,
}
impl Display for ParseError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "candidate at byte {}: {}", self.offset, self.message)
	}
}

pub struct Extractor<L = CallTokenLocator> {
	locator: L,
}
impl Extractor<CallTokenLocator> {
	pub fn new(call_token: impl Into<String>) -> Self {
		Self { locator: CallTokenLocator::new(call_token) }
	}
}
impl Default for Extractor<CallTokenLocator> {
	fn default() -> Self {
		Self { locator: CallTokenLocator::default() }
	}
}
impl<L> Extractor<L>
where
	L: CandidateLocator,
{
	pub fn with_locator(locator: L) -> Self {
		Self { locator }
	}

	/// Returns every parseable candidate in document order.
	pub fn extract(&self, text: &str) -> Vec<CandidateQuery> {
		let mut candidates = Vec::new();
		let mut cursor = 0;

		while let Some(span) = self.locator.next_span(text, cursor) {
			match self.parse_span(text, span) {
				Ok((raw, end)) => {
					candidates.push(CandidateQuery { raw, offset: span.start });

					cursor = end.max(span.resume);
				},
				Err(err) => {
					tracing::debug!(error = %err, "Skipping unparseable query candidate.");

					cursor = span.resume;
				},
			}
		}

		candidates
	}

	fn parse_span(
		&self,
		text: &str,
		span: CandidateSpan,
	) -> Result<(Map<String, Value>, usize), ParseError> {
		let (candidate, end) = match walk_braces(text, span.open) {
			Walk::Closed { end } => (&text[span.open..end], end),
			Walk::Unterminated => {
				// Never let an unclosed object swallow the next call.
				let end = self
					.locator
					.next_span(text, span.resume)
					.map(|next| next.start)
					.unwrap_or(text.len());

				(&text[span.open..end], end)
			},
		};

		if let Ok(raw) = parse_object(candidate) {
			return Ok((raw, end));
		}

		let cleaned = cleanup(candidate);

		parse_object(&cleaned)
			.map(|raw| (raw, end))
			.map_err(|message| ParseError { offset: span.start, message })
	}
}

pub fn extract_candidates(text: &str) -> Vec<CandidateQuery> {
	Extractor::default().extract(text)
}

enum Walk {
	Closed { end: usize },
	Unterminated,
}

fn opening_brace_after_call(text: &str, after_token: usize) -> Option<usize> {
	let rest = text.get(after_token..)?;
	let trimmed = rest.trim_start();
	let trimmed = trimmed.strip_prefix('(')?.trim_start();

	trimmed.starts_with('{').then(|| text.len() - trimmed.len())
}

fn walk_braces(text: &str, open: usize) -> Walk {
	let bytes = text.as_bytes();
	let mut depth = 0_usize;
	let mut in_string = false;
	let mut escaped = false;

	for (offset, byte) in bytes.iter().enumerate().skip(open) {
		if in_string {
			match byte {
				_ if escaped => escaped = false,
				b'\\' => escaped = true,
				b'"' => in_string = false,
				_ => {},
			}

			continue;
		}

		match byte {
			b'"' => in_string = true,
			b'{' => depth += 1,
			b'}' => {
				depth = depth.saturating_sub(1);

				if depth == 0 {
					return Walk::Closed { end: offset + 1 };
				}
			},
			_ => {},
		}
	}

	Walk::Unterminated
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, String> {
	match serde_json::from_str::<Value>(raw) {
		Ok(Value::Object(map)) => Ok(map),
		Ok(_) => Err("candidate is not a JSON object.".to_string()),
		Err(err) => Err(err.to_string()),
	}
}

/// Single repair pass: drops `//` comments and trailing commas, then closes open braces.
fn cleanup(raw: &str) -> String {
	let chars: Vec<char> = raw.chars().collect();
	let mut out = String::with_capacity(raw.len() + 4);
	let mut in_string = false;
	let mut escaped = false;
	let mut depth = 0_usize;
	let mut index = 0;

	while index < chars.len() {
		let ch = chars[index];

		if in_string {
			out.push(ch);

			match ch {
				_ if escaped => escaped = false,
				'\\' => escaped = true,
				'"' => in_string = false,
				_ => {},
			}

			index += 1;

			continue;
		}

		match ch {
			'"' => {
				in_string = true;

				out.push(ch);
			},
			'/' if chars.get(index + 1) == Some(&'/') => {
				while index < chars.len() && chars[index] != '\n' {
					index += 1;
				}

				continue;
			},
			',' => {
				let next = chars[index + 1..].iter().find(|next| !next.is_whitespace());

				if !matches!(next, Some('}') | Some(']')) {
					out.push(ch);
				}
			},
			'{' => {
				depth += 1;

				out.push(ch);
			},
			'}' => {
				depth = depth.saturating_sub(1);

				out.push(ch);
			},
			_ => out.push(ch),
		}

		index += 1;
	}

	let trimmed_len = out.trim_end().len();

	out.truncate(trimmed_len);

	if out.ends_with(',') {
		out.pop();
	}

	for _ in 0..depth {
		out.push('}');
	}

	out
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use crate::extract::{
		CallTokenLocator, CandidateLocator, Extractor, JsonFenceLocator, cleanup,
		extract_candidates,
	};

	#[test]
	fn extracts_nested_bool_and_aggs_bodies() {
		let text = r#"Let me look that up.
execute_elasticsearch_query({"index": "orders", "query": {"bool": {"must": [{"match": {"status": "shipped"}}], "filter": [{"range": {"total": {"gte": 10}}}]}}, "aggs": {"by_region": {"terms": {"field": "region"}, "aggs": {"avg_total": {"avg": {"field": "total"}}}}}})
Done."#;
		let candidates = extract_candidates(text);

		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].index(), Some("orders"));
		assert_eq!(
			candidates[0].raw["aggs"]["by_region"]["aggs"]["avg_total"],
			json!({"avg": {"field": "total"}})
		);
	}

	#[test]
	fn braces_inside_strings_do_not_close_the_object() {
		let text = r#"execute_elasticsearch_query({"index": "logs", "query": {"match": {"message": "unexpected } in \"payload\" {"}}})"#;
		let candidates = extract_candidates(text);

		assert_eq!(candidates.len(), 1);
		assert_eq!(
			candidates[0].raw["query"]["match"]["message"],
			json!("unexpected } in \"payload\" {")
		);
	}

	#[test]
	fn extracts_every_occurrence_in_order() {
		let text = r#"
execute_elasticsearch_query({"index": "a", "query": {"match_all": {}}})
then
execute_elasticsearch_query( {"index": "b", "query": {"term": {"id": 7}}} )
and
execute_elasticsearch_query({"index": "c", "query": {"exists": {"field": "x"}}, "size": 0})
"#;
		let indices: Vec<_> =
			extract_candidates(text).iter().map(|c| c.index().unwrap_or_default().to_string()).collect();

		assert_eq!(indices, vec!["a", "b", "c"]);
	}

	#[test]
	fn invalid_occurrence_is_skipped_without_aborting() {
		let text = r#"
execute_elasticsearch_query({"index": "broken", "query": {match: oops}})
execute_elasticsearch_query({"index": "good", "query": {"match_all": {}}})
"#;
		let candidates = extract_candidates(text);

		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].index(), Some("good"));
	}

	#[test]
	fn unterminated_occurrence_does_not_swallow_the_next_call() {
		let text = r#"
execute_elasticsearch_query({"index": "broken", "query": {"match": {"a": 1 oops
execute_elasticsearch_query({"index": "good", "query": {"match_all": {}}})
"#;
		let candidates = extract_candidates(text);

		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].index(), Some("good"));
	}

	#[test]
	fn cleanup_repairs_comments_trailing_commas_and_missing_braces() {
		let text = "execute_elasticsearch_query({\"index\": \"a\", // target\n \"query\": {\"match_all\": {},},";
		let candidates = extract_candidates(text);

		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].query(), Some(&json!({"match_all": {}})));
	}

	#[test]
	fn cleanup_keeps_comment_markers_inside_strings() {
		assert_eq!(cleanup(r#"{"url": "http://x", }"#), r#"{"url": "http://x" }"#);
	}

	#[test]
	fn candidates_without_required_keys_are_still_returned() {
		let text = r#"execute_elasticsearch_query({"query": {"match_all": {}}})"#;
		let candidates = extract_candidates(text);

		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].index(), None);
	}

	#[test]
	fn non_object_payloads_are_ignored() {
		assert!(extract_candidates("execute_elasticsearch_query([1, 2])").is_empty());
		assert!(extract_candidates("no calls here").is_empty());
	}

	#[test]
	fn custom_token_and_fence_locators() {
		let custom = Extractor::new("run_query");
		let text = r#"run_query({"index": "x", "query": {"match_all": {}}})"#;

		assert_eq!(custom.extract(text).len(), 1);

		let fenced = Extractor::with_locator(JsonFenceLocator);
		let text = "Here:\n```json\n{\"index\": \"y\", \"query\": {\"term\": {\"k\": 1}}}\n```";
		let candidates = fenced.extract(text);

		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].index(), Some("y"));
	}

	#[test]
	fn token_without_object_is_not_a_span() {
		let locator = CallTokenLocator::default();

		assert!(locator.next_span("call execute_elasticsearch_query with care", 0).is_none());
	}
}
