mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Analysis, Config, Executor, Limits, LlmProviderConfig, SearchBackend, Security, Service,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	parse(&raw).map_err(|err| match err {
		Error::ParseConfig { source, .. } => Error::ParseConfig { path: path.to_path_buf(), source },
		other => other,
	})
}

pub fn parse(raw: &str) -> Result<Config> {
	let mut cfg: Config = toml::from_str(raw)
		.map_err(|err| Error::ParseConfig { path: Default::default(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if !cfg.search_backend.url.starts_with("http://")
		&& !cfg.search_backend.url.starts_with("https://")
	{
		return Err(Error::Validation {
			message: "search_backend.url must start with http:// or https://.".to_string(),
		});
	}
	if cfg.search_backend.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "search_backend.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.search_backend.count_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "search_backend.count_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if !cfg.llm.temperature.is_finite() {
		return Err(Error::Validation {
			message: "llm.temperature must be a finite number.".to_string(),
		});
	}
	if cfg.llm.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "llm.timeout_ms must be greater than zero.".to_string(),
		});
	}

	for (key, value) in &cfg.llm.default_headers {
		if !value.is_string() {
			return Err(Error::Validation {
				message: format!("llm.default_headers.{key} must be a string."),
			});
		}
	}

	if cfg.limits.max_size == 0 {
		return Err(Error::Validation {
			message: "limits.max_size must be greater than zero.".to_string(),
		});
	}
	if cfg.limits.default_size > cfg.limits.max_size {
		return Err(Error::Validation {
			message: "limits.default_size must not exceed limits.max_size.".to_string(),
		});
	}
	if !is_duration(&cfg.limits.default_timeout) {
		return Err(Error::Validation {
			message: "limits.default_timeout must be a duration such as 30s or 500ms.".to_string(),
		});
	}

	for (label, value) in [
		("limits.max_source_bytes", cfg.limits.max_source_bytes),
		("limits.max_error_chars", cfg.limits.max_error_chars),
		("limits.max_query_depth", cfg.limits.max_query_depth),
		("security.max_scan_bytes", cfg.security.max_scan_bytes),
		("security.detection_history_cap", cfg.security.detection_history_cap),
		("executor.history_cap", cfg.executor.history_cap),
	] {
		if value == 0 {
			return Err(Error::Validation { message: format!("{label} must be greater than zero.") });
		}
	}

	if !matches!(cfg.security.fail_mode.as_str(), "open" | "closed") {
		return Err(Error::Validation {
			message: "security.fail_mode must be one of open or closed.".to_string(),
		});
	}
	if cfg.executor.call_token.trim().is_empty() {
		return Err(Error::Validation {
			message: "executor.call_token must be non-empty.".to_string(),
		});
	}
	if cfg.executor.max_attempts == 0 {
		return Err(Error::Validation {
			message: "executor.max_attempts must be greater than zero.".to_string(),
		});
	}
	if cfg.analysis.cache_enabled && cfg.analysis.cache_capacity == 0 {
		return Err(Error::Validation {
			message: "analysis.cache_capacity must be greater than zero when the cache is enabled."
				.to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.search_backend.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
		cfg.search_backend.api_key = None;
	}

	cfg.security.fail_mode = cfg.security.fail_mode.trim().to_ascii_lowercase();
	cfg.executor.call_token = cfg.executor.call_token.trim().to_string();
	cfg.search_backend.url = cfg.search_backend.url.trim_end_matches('/').to_string();
}

fn is_duration(raw: &str) -> bool {
	let digits = raw.trim_end_matches(|ch: char| ch.is_ascii_alphabetic());
	let unit = &raw[digits.len()..];

	!digits.is_empty()
		&& digits.chars().all(|ch| ch.is_ascii_digit())
		&& matches!(unit, "ms" | "s" | "m")
}
