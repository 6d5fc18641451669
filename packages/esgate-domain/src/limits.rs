use serde_json::{Map, Value};

/// Elasticsearch's default `index.max_result_window`.
pub const MAX_RESULT_WINDOW: u64 = 10_000;

/// Clamps `size` and `from`, and injects a `timeout`, on a search body.
///
/// Idempotent: applying it to its own output returns the same body.
pub fn apply_limits(body: &Value, limits: &esgate_config::Limits) -> Value {
	let Some(map) = body.as_object() else {
		return body.clone();
	};
	let mut limited: Map<String, Value> = map.clone();
	let size = match map.get("size").and_then(non_negative_integer) {
		Some(size) => size.min(limits.max_size),
		None => limits.default_size,
	};

	limited.insert("size".to_string(), Value::from(size));

	if map.contains_key("from") {
		let from = map.get("from").and_then(non_negative_integer).unwrap_or(0);

		limited.insert(
			"from".to_string(),
			Value::from(from.min(MAX_RESULT_WINDOW.saturating_sub(size))),
		);
	}
	if !map.get("timeout").map(Value::is_string).unwrap_or(false) {
		limited.insert("timeout".to_string(), Value::String(limits.default_timeout.clone()));
	}

	Value::Object(limited)
}

/// Index expressions a query may target: lowercase letters, digits and `-_.*,`, without a leading
/// `_` (system endpoints) or `..` segments.
pub fn is_allowed_index(index: &str) -> bool {
	let allowed = |ch: char| {
		ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '-' | '_' | '.' | '*' | ',')
	};

	!index.is_empty() && !index.starts_with('_') && !index.contains("..") && index.chars().all(allowed)
}

fn non_negative_integer(value: &Value) -> Option<u64> {
	if let Some(value) = value.as_u64() {
		return Some(value);
	}

	value.as_f64().filter(|value| value.is_finite() && *value >= 0.0).map(|value| value as u64)
}
