use serde_json::{Value, json};

const INTERNAL_HIT_KEYS: &[&str] = &["_version", "_seq_no", "_primary_term"];

/// Strips concurrency-control metadata from hits and truncates oversized `_source` documents.
pub fn sanitize_response(response: &Value, max_source_bytes: usize) -> Value {
	let mut out = response.clone();
	let Some(hits) = out.pointer_mut("/hits/hits").and_then(Value::as_array_mut) else {
		return out;
	};

	for hit in hits.iter_mut().filter_map(Value::as_object_mut) {
		for key in INTERNAL_HIT_KEYS {
			hit.remove(*key);
		}

		if let Some(source) = hit.get_mut("_source") {
			let original_size = source.to_string().len();

			if original_size > max_source_bytes {
				*source = json!({ "_truncated": true, "_original_size": original_size });
			}
		}
	}

	out
}

/// `hits.total.value`, a bare integer `hits.total`, or a `_count` response's `count`.
pub fn result_count(response: &Value) -> Option<u64> {
	response
		.pointer("/hits/total/value")
		.and_then(Value::as_u64)
		.or_else(|| response.pointer("/hits/total").and_then(Value::as_u64))
		.or_else(|| response.get("count").and_then(Value::as_u64))
}

pub fn hit_sources(response: &Value, limit: usize) -> Vec<Value> {
	response
		.pointer("/hits/hits")
		.and_then(Value::as_array)
		.map(|hits| hits.iter().filter_map(|hit| hit.get("_source")).take(limit).cloned().collect())
		.unwrap_or_default()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
	match text.char_indices().nth(max_chars) {
		Some((cut, _)) => format!("{}...", &text[..cut]),
		None => text.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use crate::executor::sanitize::{hit_sources, result_count, sanitize_response, truncate_chars};

	#[test]
	fn strips_internal_hit_metadata() {
		let response = json!({
			"hits": {
				"total": { "value": 1, "relation": "eq" },
				"hits": [{
					"_id": "1",
					"_version": 3,
					"_seq_no": 10,
					"_primary_term": 1,
					"_source": { "name": "lamp" }
				}]
			}
		});
		let sanitized = sanitize_response(&response, 10_000);

		assert_eq!(sanitized["hits"]["hits"][0], json!({ "_id": "1", "_source": { "name": "lamp" } }));
		assert_eq!(sanitized["hits"]["total"], response["hits"]["total"]);
	}

	#[test]
	fn oversized_sources_are_replaced() {
		let big = "x".repeat(64);
		let response = json!({ "hits": { "hits": [{ "_source": { "body": big } }] } });
		let sanitized = sanitize_response(&response, 32);
		let original_size = json!({ "body": "x".repeat(64) }).to_string().len();

		assert_eq!(
			sanitized["hits"]["hits"][0]["_source"],
			json!({ "_truncated": true, "_original_size": original_size })
		);
	}

	#[test]
	fn counts_from_every_response_shape() {
		assert_eq!(result_count(&json!({ "hits": { "total": { "value": 7 } } })), Some(7));
		assert_eq!(result_count(&json!({ "hits": { "total": 9 } })), Some(9));
		assert_eq!(result_count(&json!({ "count": 150 })), Some(150));
		assert_eq!(result_count(&json!({ "hits": {} })), None);
	}

	#[test]
	fn takes_a_bounded_number_of_sources() {
		let response = json!({
			"hits": { "hits": (0..8).map(|n| json!({ "_source": { "n": n } })).collect::<Vec<_>>() }
		});

		assert_eq!(hit_sources(&response, 5).len(), 5);
		assert_eq!(hit_sources(&json!({}), 5), Vec::<serde_json::Value>::new());
	}

	#[test]
	fn truncates_on_char_boundaries() {
		assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
		assert_eq!(truncate_chars("short", 10), "short");
	}
}
