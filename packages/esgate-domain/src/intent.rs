//! Keyword heuristic for questions that only need a hit count.

const COUNT_WORDS: &[&str] =
	&["count", "counts", "total", "totals", "exist", "exists", "existing", "present"];
const COUNT_PHRASES: &[&str] = &["how many", "number of", "are there", "is there", "any matching"];

pub fn is_count_question(question: &str) -> bool {
	let lowered = question.to_lowercase();
	let words: Vec<&str> =
		lowered.split(|ch: char| !ch.is_alphanumeric()).filter(|word| !word.is_empty()).collect();

	if words.iter().any(|word| COUNT_WORDS.contains(word)) {
		return true;
	}

	let normalized = format!(" {} ", words.join(" "));

	COUNT_PHRASES.iter().any(|phrase| normalized.contains(&format!(" {phrase} ")))
}

#[cfg(test)]
mod tests {
	use crate::intent::is_count_question;

	#[test]
	fn detects_count_questions() {
		for question in [
			"How many products are in electronics?",
			"Count the failed logins",
			"What is the total number of orders?",
			"Do any invoices exist for ACME?",
			"Is there a user named bob",
		] {
			assert!(is_count_question(question), "{question}");
		}
	}

	#[test]
	fn ignores_lookalike_words() {
		for question in ["Show my account settings", "List the latest orders", "presentation slides"]
		{
			assert!(!is_count_question(question), "{question}");
		}
	}
}
