use std::sync::OnceLock;

use regex::Regex;

const BLOCKED_OPERATIONS: &[(&str, &str)] = &[
	("delete_by_query", r"(?i)delete[_-]by[_-]query"),
	("update_by_query", r"(?i)update[_-]by[_-]query"),
	("reindex", r"(?i)(?:^|[^a-z0-9_])_reindex\b"),
	("split", r"(?i)(?:^|[^a-z0-9_])_split\b"),
	("shrink", r"(?i)(?:^|[^a-z0-9_])_shrink\b"),
	("clone", r"(?i)(?:^|[^a-z0-9_])_clone\b"),
	("close", r"(?i)(?:^|[^a-z0-9_])_close\b"),
	("forcemerge", r"(?i)(?:^|[^a-z0-9_])_forcemerge\b"),
	("bulk", r"(?i)(?:^|[^a-z0-9_])_bulk\b"),
	("raw_http_verb", r"(?i)\b(?:DELETE|PUT|POST|PATCH)\s+/"),
	("script_mutation", r"ctx\.(?:_source|op)\b"),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockedOperation {
	pub operation: &'static str,
}

/// Rejects text that names a destructive or write operation.
pub fn check(text: &str) -> Result<(), BlockedOperation> {
	for &(operation, ref regex) in compiled() {
		if regex.is_match(text) {
			return Err(BlockedOperation { operation });
		}
	}

	Ok(())
}

fn compiled() -> &'static [(&'static str, Regex)] {
	static COMPILED: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();

	COMPILED.get_or_init(|| {
		BLOCKED_OPERATIONS
			.iter()
			.filter_map(|(operation, pattern)| match Regex::new(pattern) {
				Ok(regex) => Some((*operation, regex)),
				Err(err) => {
					tracing::warn!(
						operation = *operation,
						error = %err,
						"Skipping blocklist pattern that does not compile."
					);

					None
				},
			})
			.collect()
	})
}
