use serde_json::{Value, json};

use esgate_domain::{blocklist, extract, intent, limits, threat::ThreatScanner};

fn call(body: &Value) -> String {
	format!("execute_elasticsearch_query({body})")
}

#[test]
fn extraction_round_trips_every_well_formed_occurrence() {
	let bodies = vec![
		json!({"index": "products", "query": {"match": {"category": "electronics"}}}),
		json!({
			"index": "orders",
			"query": {"bool": {"must": [{"term": {"status": "paid"}}], "filter": [{"range": {"total": {"gt": 5}}}]}},
			"aggs": {"by_day": {"date_histogram": {"field": "created_at", "calendar_interval": "day"}, "aggs": {"revenue": {"sum": {"field": "total"}}}}}
		}),
		json!({"index": "notes", "query": {"match": {"body": "braces {like} these"}}, "size": 5}),
	];
	let text = bodies
		.iter()
		.map(call)
		.collect::<Vec<_>>()
		.join("\nI will also try another phrasing:\n");
	let candidates = extract::extract_candidates(&text);

	assert_eq!(candidates.len(), bodies.len());

	for (candidate, body) in candidates.iter().zip(&bodies) {
		assert_eq!(&candidate.to_value(), body);
	}
}

#[test]
fn extraction_skips_only_the_malformed_occurrence() {
	let text = format!(
		"{}\nexecute_elasticsearch_query({{\"index\": \"x\", \"query\": {{\"match\": }}}})",
		call(&json!({"index": "ok", "query": {"match_all": {}}}))
	);
	let candidates = extract::extract_candidates(&text);

	assert_eq!(candidates.len(), 1);
	assert_eq!(candidates[0].index(), Some("ok"));
}

#[test]
fn serialized_candidates_pass_through_the_gates() {
	let scanner = ThreatScanner::new(&esgate_config::Security::default());
	let text = call(&json!({"index": "products", "query": {"match": {"category": "electronics"}}}));
	let candidate = &extract::extract_candidates(&text)[0];
	let serialized = candidate.to_value().to_string();

	assert!(blocklist::check(&serialized).is_ok());
	assert!(!scanner.scan_text(&serialized).should_block);

	let limited = limits::apply_limits(&candidate.to_value(), &esgate_config::Limits::default());

	assert_eq!(limited["size"], json!(100));
	assert!(intent::is_count_question("how many electronics products are there?"));
}
