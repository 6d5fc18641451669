use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::analysis::QueryAnalysis;

/// Clauses that only decide membership and can run in filter context.
const EXACT_MATCH_CLAUSES: &[&str] = &["term", "terms", "range", "exists", "ids", "prefix"];
const SIMPLIFIED_TERMS_SIZE: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
	Performance,
	Accuracy,
	Balanced,
}
impl Strategy {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Performance => "performance",
			Self::Accuracy => "accuracy",
			Self::Balanced => "balanced",
		}
	}
}
impl Display for Strategy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for Strategy {
	type Err = String;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"performance" => Ok(Self::Performance),
			"accuracy" => Ok(Self::Accuracy),
			"balanced" => Ok(Self::Balanced),
			other => Err(format!(
				"Unknown strategy '{other}'; expected performance, accuracy or balanced."
			)),
		}
	}
}

/// Rewrites search bodies for a [`Strategy`] using a prior [`QueryAnalysis`].
#[derive(Clone, Copy, Debug)]
pub struct QueryOptimizer {
	large_result_threshold: u64,
	max_depth: usize,
}
impl QueryOptimizer {
	pub fn new(large_result_threshold: u64, max_depth: usize) -> Self {
		Self { large_result_threshold, max_depth }
	}

	pub fn from_config(cfg: &esgate_config::Config) -> Self {
		Self::new(cfg.analysis.large_result_threshold, cfg.limits.max_query_depth)
	}

	/// Returns an optimized copy of `body`. The input is never modified.
	pub fn optimize(&self, body: &Value, analysis: &QueryAnalysis, strategy: Strategy) -> Value {
		let Some(original) = body.as_object() else {
			return body.clone();
		};
		let mut out = original.clone();
		let size = original.get("size").and_then(Value::as_u64);

		match strategy {
			Strategy::Performance => {
				out.insert("size".to_string(), json!(size.unwrap_or(20).min(100)));
				out.insert("timeout".to_string(), json!("5s"));

				move_exact_matches_to_filter(&mut out);

				if analysis.aggregation_complexity > 3 {
					simplify_aggregations(&mut out);
				}
			},
			Strategy::Accuracy => {
				out.insert("size".to_string(), json!(size.unwrap_or(50).max(50)));
				out.insert("explain".to_string(), json!(true));

				if let Some(query) = out.get_mut("query") {
					add_fuzziness(query, &analysis.semantic_fields, self.max_depth);
				}
			},
			Strategy::Balanced => {
				out.insert("size".to_string(), json!(size.unwrap_or(50).min(200)));
				out.insert("timeout".to_string(), json!("15s"));

				if analysis.performance_score < 50.0 {
					move_exact_matches_to_filter(&mut out);
				}
			},
		}

		if analysis.estimated_docs > self.large_result_threshold
			&& !out.contains_key("track_total_hits")
		{
			out.insert("track_total_hits".to_string(), json!(self.large_result_threshold));
		}
		if !out.contains_key("_source") {
			out.insert("_source".to_string(), json!(true));
		}

		Value::Object(out)
	}
}

fn is_exact_match(clause: &Value) -> bool {
	clause
		.as_object()
		.filter(|map| map.len() == 1)
		.and_then(|map| map.keys().next())
		.map(|key| EXACT_MATCH_CLAUSES.contains(&key.as_str()))
		.unwrap_or(false)
}

/// Moves exact-match clauses out of the top-level `bool.must` into `bool.filter`.
///
/// A bare exact-match query is wrapped in a `bool.filter`.
fn move_exact_matches_to_filter(body: &mut Map<String, Value>) {
	let Some(query) = body.get_mut("query") else {
		return;
	};

	if is_exact_match(query) {
		let clause = query.take();

		*query = json!({ "bool": { "filter": [clause] } });

		return;
	}

	let Some(bool_query) = query.get_mut("bool").and_then(Value::as_object_mut) else {
		return;
	};
	let must = match bool_query.remove("must") {
		Some(Value::Array(clauses)) => clauses,
		Some(single) => vec![single],
		None => return,
	};
	let (exact, scoring): (Vec<Value>, Vec<Value>) = must.into_iter().partition(is_exact_match);

	if !scoring.is_empty() {
		bool_query.insert("must".to_string(), Value::Array(scoring));
	}
	if exact.is_empty() {
		return;
	}

	let mut filter = match bool_query.remove("filter") {
		Some(Value::Array(clauses)) => clauses,
		Some(single) => vec![single],
		None => Vec::new(),
	};

	filter.extend(exact);
	bool_query.insert("filter".to_string(), Value::Array(filter));
}

/// Drops sub-aggregations and caps `terms.size`.
fn simplify_aggregations(body: &mut Map<String, Value>) {
	for key in ["aggs", "aggregations"] {
		let Some(named) = body.get_mut(key).and_then(Value::as_object_mut) else {
			continue;
		};

		for definition in named.values_mut().filter_map(Value::as_object_mut) {
			definition.remove("aggs");
			definition.remove("aggregations");

			if let Some(terms) = definition.get_mut("terms").and_then(Value::as_object_mut) {
				let size = terms
					.get("size")
					.and_then(Value::as_u64)
					.unwrap_or(SIMPLIFIED_TERMS_SIZE)
					.min(SIMPLIFIED_TERMS_SIZE);

				terms.insert("size".to_string(), json!(size));
			}
		}
	}
}

/// Rewrites `match` clauses on semantic fields to `{query, fuzziness: "AUTO"}`.
fn add_fuzziness(query: &mut Value, semantic_fields: &[String], max_depth: usize) {
	let mut pending: Vec<(&mut Value, usize)> = vec![(query, 0)];

	while let Some((node, depth)) = pending.pop() {
		let children: Vec<&mut Value> = match node {
			Value::Object(map) => {
				let mut children = Vec::new();

				for (key, child) in map.iter_mut() {
					if key == "match" {
						if let Some(fields) = child.as_object_mut() {
							fuzzify_match(fields, semantic_fields);
						}
					} else {
						children.push(child);
					}
				}

				children
			},
			Value::Array(items) => items.iter_mut().collect(),
			_ => continue,
		};

		if depth < max_depth {
			pending.extend(children.into_iter().map(|child| (child, depth + 1)));
		}
	}
}

fn fuzzify_match(fields: &mut Map<String, Value>, semantic_fields: &[String]) {
	for (field, clause) in fields.iter_mut() {
		if !semantic_fields.iter().any(|semantic| semantic == field) {
			continue;
		}

		if let Some(options) = clause.as_object_mut() {
			options.entry("fuzziness").or_insert_with(|| json!("AUTO"));
		} else if clause.is_string() || clause.is_number() {
			*clause = json!({ "query": clause.take(), "fuzziness": "AUTO" });
		}
	}
}
