use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

pub async fn complete(cfg: &esgate_config::LlmProviderConfig, messages: &[Value]) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
	});
	let authorization = format!("Bearer {}", cfg.api_key);
	let res = client
		.post(&url)
		.headers(crate::auth_headers(Some(authorization.as_str()), &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = crate::check_status(res).await?.json().await?;

	parse_completion(json)
}

fn parse_completion(json: Value) -> Result<String> {
	json.get("choices")
		.and_then(Value::as_array)
		.and_then(|choices| choices.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|message| message.get("content"))
		.and_then(Value::as_str)
		.map(str::to_string)
		.ok_or_else(|| Error::InvalidResponse {
			message: "Chat response is missing choices[0].message.content.".to_string(),
		})
}

#[cfg(test)]
mod tests {
	use crate::chat::parse_completion;

	#[test]
	fn parses_choice_content() {
		let json = serde_json::json!({
			"choices": [
				{ "message": { "role": "assistant", "content": "execute_elasticsearch_query({})" } }
			]
		});

		assert_eq!(parse_completion(json).expect("parse failed"), "execute_elasticsearch_query({})");
	}

	#[test]
	fn rejects_missing_content() {
		assert!(parse_completion(serde_json::json!({ "choices": [] })).is_err());
	}
}
