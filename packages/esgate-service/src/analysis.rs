//! Query classification: clause vocabulary, field usage, complexity tiers and a heuristic
//! performance score.
//!
//! Every walk is an explicit worklist of `(node, depth)` pairs bounded by
//! `limits.max_query_depth`, so arbitrarily deep LLM output cannot exhaust the stack.

pub mod cache;
pub mod schema;

pub use cache::AnalysisCache;
pub use schema::{FieldInfo, FieldMap};

use std::{
	collections::{BTreeMap, BTreeSet},
	sync::Arc,
	time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::SearchBackend;

const SIMPLE_CLAUSES: &[&str] = &[
	"match",
	"match_all",
	"match_none",
	"match_phrase",
	"match_bool_prefix",
	"term",
	"terms",
	"exists",
	"ids",
	"prefix",
];
const MEDIUM_CLAUSES: &[&str] = &[
	"bool",
	"range",
	"wildcard",
	"fuzzy",
	"regexp",
	"multi_match",
	"query_string",
	"simple_query_string",
	"match_phrase_prefix",
	"dis_max",
	"boosting",
	"constant_score",
];
const COMPLEX_CLAUSES: &[&str] = &[
	"nested",
	"has_child",
	"has_parent",
	"parent_id",
	"function_score",
	"script_score",
	"more_like_this",
	"percolate",
	"script",
	"geo_shape",
];
const BUCKET_AGGREGATIONS: &[&str] = &["terms", "histogram", "date_histogram"];
const NESTED_AGGREGATIONS: &[&str] = &["nested", "reverse_nested"];
const METRIC_AGGREGATIONS: &[&str] = &[
	"avg",
	"sum",
	"min",
	"max",
	"stats",
	"extended_stats",
	"cardinality",
	"percentiles",
	"value_count",
];
const FILTERING_CLAUSES: &[&str] = &["filter", "term", "terms", "range"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Complexity {
	Simple,
	Medium,
	Complex,
	Advanced,
}
impl Complexity {
	pub fn from_score(score: u32) -> Self {
		match score {
			0..=2 => Self::Simple,
			3..=5 => Self::Medium,
			6..=10 => Self::Complex,
			_ => Self::Advanced,
		}
	}

	fn penalty(self) -> f64 {
		match self {
			Self::Simple => 0.0,
			Self::Medium => 10.0,
			Self::Complex => 25.0,
			Self::Advanced => 40.0,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryAnalysis {
	pub complexity: Complexity,
	pub complexity_score: u32,
	pub estimated_docs: u64,
	pub field_usage: BTreeMap<String, u32>,
	pub query_types: BTreeSet<String>,
	pub performance_score: f64,
	pub semantic_fields: Vec<String>,
	pub aggregation_complexity: u32,
	pub index_coverage: f64,
	pub optimization_opportunities: Vec<String>,
	/// Set when part of the body lay deeper than the traversal bound and was not inspected.
	pub depth_limited: bool,
}

pub struct QueryAnalyzer {
	backend: Arc<dyn SearchBackend>,
	count_timeout: Duration,
	max_depth: usize,
}
impl QueryAnalyzer {
	pub fn new(backend: Arc<dyn SearchBackend>, count_timeout: Duration, max_depth: usize) -> Self {
		Self { backend, count_timeout, max_depth }
	}

	pub async fn analyze(&self, schema: &FieldMap, index: &str, body: &Value) -> QueryAnalysis {
		let estimated_docs = self.estimate_docs(index, body).await;

		analyze_with_estimate(schema, body, estimated_docs, self.max_depth)
	}

	/// Hit-count estimate for the body's query. Failures degrade to 0.
	pub async fn estimate_docs(&self, index: &str, body: &Value) -> u64 {
		let query = body.get("query").cloned().unwrap_or_else(|| json!({ "match_all": {} }));
		let count_body = json!({ "query": query });
		let call = self.backend.count(index, &count_body, self.count_timeout);

		match tokio::time::timeout(self.count_timeout, call).await {
			Ok(Ok(count)) => count,
			Ok(Err(err)) => {
				tracing::warn!(index, error = %err, "Document count estimate failed.");

				0
			},
			Err(_) => {
				tracing::warn!(
					index,
					timeout_ms = self.count_timeout.as_millis() as u64,
					"Document count estimate timed out."
				);

				0
			},
		}
	}
}

/// The pure part of [`QueryAnalyzer::analyze`].
pub fn analyze_with_estimate(
	schema: &FieldMap,
	body: &Value,
	estimated_docs: u64,
	max_depth: usize,
) -> QueryAnalysis {
	let mut depth_limited = false;
	let mut query_types = BTreeSet::new();
	let mut filtering = false;
	let mut bool_filter = false;

	for clause_root in ["query", "post_filter"] {
		let Some(root) = body.get(clause_root) else {
			continue;
		};

		depth_limited |= walk(root, max_depth, |key, value| {
			if clause_points(key).is_some() {
				query_types.insert(key.to_string());
			}
			if FILTERING_CLAUSES.contains(&key) {
				filtering = true;
			}
			if key == "bool" && value.get("filter").is_some() {
				bool_filter = true;
			}
		});
	}

	let mut field_usage = BTreeMap::new();

	depth_limited |= walk(body, max_depth, |key, value| {
		count_field_uses(schema, key, value, &mut field_usage);
	});

	let (aggregation_complexity, aggregated_fields, aggs_limited) = aggregations(body, max_depth);

	depth_limited |= aggs_limited;

	let complexity_score = complexity_score(&query_types, body);
	let complexity = Complexity::from_score(complexity_score);
	let semantic_fields: Vec<String> = field_usage
		.keys()
		.filter(|name| schema.get(name).map(FieldInfo::is_semantic).unwrap_or(false))
		.cloned()
		.collect();
	let index_coverage = if schema.is_empty() {
		0.0
	} else {
		field_usage.len() as f64 / schema.len() as f64 * 100.0
	};
	let mut optimization_opportunities = Vec::new();

	if query_types.contains("bool") && !bool_filter {
		optimization_opportunities
			.push("Move exact-match clauses from bool.must into bool.filter.".to_string());
	}
	if query_types.contains("wildcard") {
		optimization_opportunities
			.push("Replace wildcard queries with prefix or keyword lookups.".to_string());
	}
	if body.get("sort").is_some() && !filtering {
		optimization_opportunities
			.push("Add a filter to narrow the result set before sorting.".to_string());
	}
	if aggregations_use(body, "terms", max_depth) {
		optimization_opportunities
			.push("Bound terms aggregations with an explicit size.".to_string());
	}

	let mut unsortable: Vec<&str> = aggregated_fields
		.iter()
		.map(String::as_str)
		.chain(sort_fields(body))
		.filter_map(|name| schema.resolve(name).filter(|resolved| *resolved == name))
		.filter(|name| {
			schema
				.get(name)
				.map(|info| info.field_type == "text" && !info.keyword_subfield)
				.unwrap_or(false)
		})
		.collect();

	unsortable.sort_unstable();
	unsortable.dedup();

	for name in unsortable {
		optimization_opportunities.push(format!(
			"Field '{name}' is text without a keyword sub-field; add one for sorting and aggregations."
		));
	}

	let performance_score =
		performance_score(complexity, estimated_docs, aggregation_complexity, index_coverage);

	QueryAnalysis {
		complexity,
		complexity_score,
		estimated_docs,
		field_usage,
		query_types,
		performance_score,
		semantic_fields,
		aggregation_complexity,
		index_coverage,
		optimization_opportunities,
		depth_limited,
	}
}

pub fn complexity_score(query_types: &BTreeSet<String>, body: &Value) -> u32 {
	let clauses: u32 = query_types.iter().filter_map(|key| clause_points(key)).sum();
	let mut score = clauses;

	if body.get("aggs").is_some() || body.get("aggregations").is_some() {
		score += 2;
	}
	if body.get("sort").is_some() {
		score += 1;
	}
	if body.get("highlight").is_some() {
		score += 1;
	}

	score
}

pub fn performance_score(
	complexity: Complexity,
	estimated_docs: u64,
	aggregation_complexity: u32,
	index_coverage: f64,
) -> f64 {
	let mut score = 100.0 - complexity.penalty();

	score -= match estimated_docs {
		docs if docs > 1_000_000 => 30.0,
		docs if docs > 100_000 => 20.0,
		docs if docs > 10_000 => 10.0,
		_ => 0.0,
	};
	score -= f64::from(aggregation_complexity.saturating_mul(5).min(20));

	if index_coverage > 50.0 {
		score -= 5.0;
	} else if index_coverage < 5.0 {
		score += 5.0;
	}

	score.clamp(0.0, 100.0)
}

fn clause_points(key: &str) -> Option<u32> {
	if SIMPLE_CLAUSES.contains(&key) {
		Some(1)
	} else if MEDIUM_CLAUSES.contains(&key) {
		Some(2)
	} else if COMPLEX_CLAUSES.contains(&key) {
		Some(4)
	} else {
		None
	}
}

/// Visits every `(key, value)` object entry at most `max_depth` levels below `root`.
///
/// Returns whether any node was left unvisited because of the bound.
fn walk<F>(root: &Value, max_depth: usize, mut visit: F) -> bool
where
	F: FnMut(&str, &Value),
{
	let mut limited = false;
	let mut pending = vec![(root, 0_usize)];

	while let Some((node, depth)) = pending.pop() {
		let children: Vec<&Value> = match node {
			Value::Object(map) => {
				for (key, value) in map {
					visit(key, value);
				}

				map.values().collect()
			},
			Value::Array(items) => items.iter().collect(),
			_ => continue,
		};

		for child in children.into_iter().filter(|child| child.is_object() || child.is_array()) {
			if depth + 1 > max_depth {
				limited = true;

				continue;
			}

			pending.push((child, depth + 1));
		}
	}

	limited
}

fn count_field_uses(
	schema: &FieldMap,
	key: &str,
	value: &Value,
	usage: &mut BTreeMap<String, u32>,
) {
	let mut record = |name: &str| {
		if let Some(field) = schema.resolve(name) {
			*usage.entry(field.to_string()).or_default() += 1;
		}
	};

	match key {
		"field" => {
			if let Some(name) = value.as_str() {
				record(name);
			}
		},
		"fields" => {
			for name in value.as_array().into_iter().flatten().filter_map(Value::as_str) {
				record(name.split('^').next().unwrap_or(name));
			}
		},
		"sort" => {
			for name in value.as_array().into_iter().flatten().filter_map(Value::as_str) {
				record(name);
			}
		},
		_ => record(key),
	}
}

/// Aggregation complexity, fields referenced by aggregations, and whether the bound was hit.
fn aggregations(body: &Value, max_depth: usize) -> (u32, Vec<String>, bool) {
	let mut complexity = 0_u32;
	let mut fields = Vec::new();
	let mut limited = false;
	let mut pending: Vec<(&Value, usize)> =
		aggregation_blocks(body).into_iter().map(|block| (block, 0)).collect();

	while let Some((block, depth)) = pending.pop() {
		let Some(named) = block.as_object() else {
			continue;
		};

		for definition in named.values().filter_map(Value::as_object) {
			for (agg_type, agg_body) in definition {
				if BUCKET_AGGREGATIONS.contains(&agg_type.as_str())
					|| METRIC_AGGREGATIONS.contains(&agg_type.as_str())
				{
					complexity += 1;
				} else if NESTED_AGGREGATIONS.contains(&agg_type.as_str()) {
					complexity += 2;
				}

				if let Some(field) = agg_body.get("field").and_then(Value::as_str) {
					fields.push(field.to_string());
				}
			}

			for sub in aggregation_blocks_of(definition) {
				if depth + 1 > max_depth {
					limited = true;

					continue;
				}

				pending.push((sub, depth + 1));
			}
		}
	}

	(complexity, fields, limited)
}

fn aggregations_use(body: &Value, agg_type: &str, max_depth: usize) -> bool {
	let mut pending: Vec<(&Value, usize)> =
		aggregation_blocks(body).into_iter().map(|block| (block, 0)).collect();

	while let Some((block, depth)) = pending.pop() {
		for definition in block.as_object().into_iter().flat_map(|named| named.values()) {
			let Some(definition) = definition.as_object() else {
				continue;
			};

			if definition.contains_key(agg_type) {
				return true;
			}
			if depth < max_depth {
				pending.extend(aggregation_blocks_of(definition).into_iter().map(|sub| (sub, depth + 1)));
			}
		}
	}

	false
}

fn aggregation_blocks(body: &Value) -> Vec<&Value> {
	body.as_object().map(aggregation_blocks_of).unwrap_or_default()
}

fn aggregation_blocks_of(map: &serde_json::Map<String, Value>) -> Vec<&Value> {
	["aggs", "aggregations"].into_iter().filter_map(|key| map.get(key)).collect()
}

fn sort_fields(body: &Value) -> impl Iterator<Item = &str> {
	let sort = body.get("sort");
	let items: Vec<&Value> = match sort {
		Some(Value::Array(items)) => items.iter().collect(),
		Some(other) => vec![other],
		None => Vec::new(),
	};

	items.into_iter().flat_map(|item| -> Vec<&str> {
		match item {
			Value::String(name) => vec![name.as_str()],
			Value::Object(map) => map.keys().map(String::as_str).collect(),
			_ => Vec::new(),
		}
	})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use crate::analysis::{Complexity, FieldMap, analyze_with_estimate, performance_score};

	fn schema() -> FieldMap {
		FieldMap::from_mapping(&json!({
			"properties": {
				"name": { "type": "text", "fields": { "keyword": { "type": "keyword" } } },
				"description": { "type": "text" },
				"category": { "type": "keyword" },
				"price": { "type": "float" },
				"created_at": { "type": "date" }
			}
		}))
	}

	#[test]
	fn tiers_follow_score_boundaries() {
		assert_eq!(Complexity::from_score(0), Complexity::Simple);
		assert_eq!(Complexity::from_score(2), Complexity::Simple);
		assert_eq!(Complexity::from_score(3), Complexity::Medium);
		assert_eq!(Complexity::from_score(5), Complexity::Medium);
		assert_eq!(Complexity::from_score(6), Complexity::Complex);
		assert_eq!(Complexity::from_score(10), Complexity::Complex);
		assert_eq!(Complexity::from_score(11), Complexity::Advanced);
	}

	#[test]
	fn simple_match_all() {
		let analysis = analyze_with_estimate(&schema(), &json!({"query": {"match_all": {}}}), 100, 64);

		assert_eq!(analysis.complexity, Complexity::Simple);
		assert_eq!(analysis.complexity_score, 1);
		assert_eq!(analysis.query_types.iter().collect::<Vec<_>>(), vec!["match_all"]);
		assert!(analysis.field_usage.is_empty());
		assert_eq!(analysis.index_coverage, 0.0);
		// Coverage below 5% earns the bonus, then the clamp applies.
		assert_eq!(analysis.performance_score, 100.0);
	}

	#[test]
	fn bool_with_sort_and_aggregations() {
		let body = json!({
			"query": {
				"bool": {
					"must": [
						{ "match": { "description": "wireless headphones" } },
						{ "term": { "category": "audio" } }
					]
				}
			},
			"sort": [{ "price": "asc" }],
			"aggs": {
				"by_category": {
					"terms": { "field": "category" },
					"aggs": { "avg_price": { "avg": { "field": "price" } } }
				}
			}
		});
		let analysis = analyze_with_estimate(&schema(), &body, 50_000, 64);

		// bool 2 + match 1 + term 1 + aggs 2 + sort 1.
		assert_eq!(analysis.complexity_score, 7);
		assert_eq!(analysis.complexity, Complexity::Complex);
		assert_eq!(analysis.aggregation_complexity, 2);
		assert_eq!(analysis.semantic_fields, vec!["description".to_string()]);
		assert_eq!(analysis.field_usage.get("category"), Some(&2));
		assert_eq!(analysis.field_usage.get("price"), Some(&2));
		assert_eq!(analysis.index_coverage, 60.0);
		// 100 - 25 - 10 - 10 - 5.
		assert_eq!(analysis.performance_score, 50.0);
		assert!(analysis.optimization_opportunities.iter().any(|op| op.contains("bool.filter")));
		assert!(analysis.optimization_opportunities.iter().any(|op| op.contains("terms aggregations")));
		assert!(!analysis.optimization_opportunities.iter().any(|op| op.contains("before sorting")));
	}

	#[test]
	fn keyword_suffix_counts_toward_parent() {
		let body = json!({
			"query": { "match_all": {} },
			"aggs": { "names": { "terms": { "field": "name.keyword" } } }
		});
		let analysis = analyze_with_estimate(&schema(), &body, 0, 64);

		assert_eq!(analysis.field_usage.get("name"), Some(&1));
		assert!(!analysis.optimization_opportunities.iter().any(|op| op.contains("'name'")));
	}

	#[test]
	fn text_without_keyword_is_flagged_for_sorting() {
		let body = json!({ "query": { "match_all": {} }, "sort": ["description"] });
		let analysis = analyze_with_estimate(&schema(), &body, 0, 64);

		assert_eq!(analysis.field_usage.get("description"), Some(&1));
		assert!(analysis.optimization_opportunities.iter().any(|op| op.contains("'description'")));
		assert!(analysis.optimization_opportunities.iter().any(|op| op.contains("before sorting")));
	}

	#[test]
	fn multi_match_fields_strip_boosts() {
		let body = json!({
			"query": { "multi_match": { "query": "usb", "fields": ["name^3", "description"] } }
		});
		let analysis = analyze_with_estimate(&schema(), &body, 0, 64);

		assert_eq!(analysis.field_usage.get("name"), Some(&1));
		assert_eq!(analysis.field_usage.get("description"), Some(&1));
		assert!(analysis.query_types.contains("multi_match"));
	}

	#[test]
	fn complex_clauses_reach_advanced() {
		let body = json!({
			"query": {
				"function_score": {
					"query": {
						"nested": {
							"path": "variants",
							"query": { "bool": { "filter": [{ "range": { "price": { "gte": 10 } } }] } }
						}
					},
					"script_score": { "script": { "source": "_score" } }
				}
			}
		});
		let analysis = analyze_with_estimate(&schema(), &body, 0, 64);

		// function_score 4 + nested 4 + bool 2 + range 2 + script_score 4 + script 4.
		assert_eq!(analysis.complexity_score, 20);
		assert_eq!(analysis.complexity, Complexity::Advanced);
		assert!(!analysis.optimization_opportunities.iter().any(|op| op.contains("bool.filter")));
	}

	#[test]
	fn deep_nesting_is_bounded() {
		let mut query = json!({ "match_all": {} });

		for _ in 0..200 {
			query = json!({ "bool": { "must": [query] } });
		}

		let analysis = analyze_with_estimate(&schema(), &json!({ "query": query }), 0, 64);

		assert!(analysis.depth_limited);
		assert!(!analysis.query_types.contains("match_all"));
		assert!(analysis.query_types.contains("bool"));
	}

	#[test]
	fn performance_penalties_and_clamp() {
		assert_eq!(performance_score(Complexity::Simple, 0, 0, 20.0), 100.0);
		assert_eq!(performance_score(Complexity::Medium, 200_000, 1, 20.0), 65.0);
		assert_eq!(performance_score(Complexity::Advanced, 5_000_000, 10, 80.0), 5.0);
		assert_eq!(performance_score(Complexity::Simple, 0, 0, 1.0), 100.0);
	}
}
