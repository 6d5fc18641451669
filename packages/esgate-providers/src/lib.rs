pub mod chat;
pub mod elasticsearch;

mod error;

pub use error::{Error, Result};

use reqwest::{
	Response,
	header::{AUTHORIZATION, HeaderMap, HeaderName},
};
use serde_json::{Map, Value};

const MAX_ERROR_BODY_CHARS: usize = 512;

pub fn auth_headers(
	authorization: Option<&str>,
	default_headers: &Map<String, Value>,
) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	if let Some(authorization) = authorization {
		headers.insert(AUTHORIZATION, authorization.parse()?);
	}

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: "Default header values must be strings.".to_string(),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

/// Turns a non-success response into [`Error::Status`] carrying a bounded slice of the body.
pub(crate) async fn check_status(res: Response) -> Result<Response> {
	let status = res.status();

	if status.is_success() {
		return Ok(res);
	}

	let body = res.text().await.unwrap_or_default();
	let message: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();

	tracing::warn!(status = status.as_u16(), "Backend returned a non-success status.");

	Err(Error::Status { status: status.as_u16(), message })
}
