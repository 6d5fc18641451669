use serde::Serialize;
use serde_json::{Value, json};

use crate::{
	ChatProvider, Result,
	executor::{BatchResult, SafeExecutor},
};

#[derive(Clone, Debug, Serialize)]
pub struct IterativeOutcome {
	pub attempts: Vec<BatchResult>,
	/// 1-based attempt whose batch had at least one successful query.
	pub successful_attempt: Option<u32>,
	/// Set when a security violation ended the loop.
	pub stopped_by_security: bool,
}
impl IterativeOutcome {
	pub fn last(&self) -> Option<&BatchResult> {
		self.attempts.last()
	}
}

/// Re-prompts the model for corrected queries after retryable failures.
///
/// Each attempt is one single-pass [`SafeExecutor`] batch. A batch with any success ends the loop,
/// as does any security violation.
pub struct IterativeExecutor<'a> {
	executor: &'a SafeExecutor,
	chat: &'a dyn ChatProvider,
	max_attempts: u32,
	call_token: &'a str,
}
impl<'a> IterativeExecutor<'a> {
	pub fn new(
		executor: &'a SafeExecutor,
		chat: &'a dyn ChatProvider,
		cfg: &'a esgate_config::Executor,
	) -> Self {
		Self {
			executor,
			chat,
			max_attempts: cfg.max_attempts.max(1),
			call_token: cfg.call_token.as_str(),
		}
	}

	pub async fn run(
		&self,
		mut messages: Vec<Value>,
		conversation_id: &str,
		question: Option<&str>,
	) -> Result<IterativeOutcome> {
		let mut outcome = IterativeOutcome {
			attempts: Vec::new(),
			successful_attempt: None,
			stopped_by_security: false,
		};

		for attempt in 1..=self.max_attempts {
			let text = self.chat.complete(&messages).await?;
			let batch = self.executor.execute_text(&text, conversation_id, question).await;
			let succeeded = batch.succeeded() > 0;
			let blocked = batch.has_unretryable_failure();
			let correction = correction_request(&batch, self.call_token);

			tracing::info!(
				conversation_id,
				attempt,
				query_count = batch.query_count,
				succeeded = batch.succeeded(),
				"Query attempt finished."
			);

			outcome.attempts.push(batch);

			if succeeded {
				outcome.successful_attempt = Some(attempt);

				break;
			}
			if blocked {
				tracing::warn!(conversation_id, attempt, "Security violation; not retrying.");

				outcome.stopped_by_security = true;

				break;
			}

			messages.push(json!({ "role": "assistant", "content": text }));
			messages.push(correction);
		}

		Ok(outcome)
	}
}

fn correction_request(batch: &BatchResult, call_token: &str) -> Value {
	let content = if batch.executed {
		let errors: Vec<String> = batch
			.results
			.iter()
			.filter_map(|outcome| {
				let error = outcome.error.as_deref()?;
				let error_type = outcome.error_type.as_deref().unwrap_or("error");

				Some(format!("- {error_type}: {error}"))
			})
			.collect();

		format!(
			"None of the queries could be executed:\n{}\nReply with a corrected {call_token} call.",
			errors.join("\n")
		)
	} else {
		format!(
			"No query call was found. Reply with a {call_token} call whose argument is a JSON \
			 object with index and query."
		)
	};

	json!({ "role": "user", "content": content })
}
