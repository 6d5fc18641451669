use std::time::Duration;

use reqwest::{Client, header::HeaderMap};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Minimal Elasticsearch REST client: read-only `_search`, `_count` and `_mapping`.
#[derive(Clone, Debug)]
pub struct ElasticsearchClient {
	client: Client,
	base_url: String,
	headers: HeaderMap,
}
impl ElasticsearchClient {
	pub fn new(cfg: &esgate_config::SearchBackend) -> Result<Self> {
		if cfg.url.trim().is_empty() {
			return Err(Error::InvalidConfig {
				message: "search_backend.url must be non-empty.".to_string(),
			});
		}

		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
		let authorization = cfg.api_key.as_ref().map(|key| format!("ApiKey {key}"));
		let headers = crate::auth_headers(authorization.as_deref(), &Map::new())?;

		Ok(Self { client, base_url: cfg.url.trim_end_matches('/').to_string(), headers })
	}

	pub async fn search(&self, index: &str, body: &Value, timeout: Duration) -> Result<Value> {
		let url = self.endpoint(index, "_search")?;

		tracing::debug!(index, timeout_ms = timeout.as_millis() as u64, "Sending search request.");

		let res = self
			.client
			.post(url)
			.headers(self.headers.clone())
			.timeout(timeout)
			.json(body)
			.send()
			.await?;

		Ok(crate::check_status(res).await?.json().await?)
	}

	pub async fn count(&self, index: &str, body: &Value, timeout: Duration) -> Result<u64> {
		let url = self.endpoint(index, "_count")?;
		let res = self
			.client
			.post(url)
			.headers(self.headers.clone())
			.timeout(timeout)
			.json(body)
			.send()
			.await?;
		let json: Value = crate::check_status(res).await?.json().await?;

		parse_count(&json)
	}

	/// Returns the `mappings` object of the first index in the `_mapping` response.
	pub async fn mapping(&self, index: &str) -> Result<Value> {
		let url = self.endpoint(index, "_mapping")?;
		let res = self.client.get(url).headers(self.headers.clone()).send().await?;
		let json: Value = crate::check_status(res).await?.json().await?;

		parse_mapping(json)
	}

	fn endpoint(&self, index: &str, action: &str) -> Result<String> {
		validate_index_path(index)?;

		Ok(format!("{}/{}/{}", self.base_url, index, action))
	}
}

fn validate_index_path(index: &str) -> Result<()> {
	let allowed = |ch: char| {
		ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '-' | '_' | '.' | '*' | ',')
	};

	if index.is_empty() || index.starts_with('_') || index.contains("..") || !index.chars().all(allowed)
	{
		tracing::warn!(
			index_chars = index.chars().count(),
			"Refusing request to a disallowed index path."
		);

		return Err(Error::InvalidRequest { message: format!("Index name '{index}' is not allowed.") });
	}

	Ok(())
}

fn parse_count(json: &Value) -> Result<u64> {
	json.get("count").and_then(Value::as_u64).ok_or_else(|| Error::InvalidResponse {
		message: "Count response is missing count.".to_string(),
	})
}

fn parse_mapping(json: Value) -> Result<Value> {
	let Value::Object(indices) = json else {
		return Err(Error::InvalidResponse {
			message: "Mapping response must be an object.".to_string(),
		});
	};

	indices
		.into_iter()
		.next()
		.and_then(|(_, index)| index.get("mappings").cloned())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Mapping response is missing mappings.".to_string(),
		})
}
