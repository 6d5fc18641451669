pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Security violation: {message}")]
	SecurityViolation { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Timed out: {message}")]
	Timeout { message: String },
}
impl From<color_eyre::Report> for Error {
	fn from(err: color_eyre::Report) -> Self {
		if is_timeout(&err) {
			return Self::Timeout { message: err.to_string() };
		}

		Self::Provider { message: err.to_string() }
	}
}

impl From<esgate_providers::Error> for Error {
	fn from(err: esgate_providers::Error) -> Self {
		match err {
			esgate_providers::Error::InvalidConfig { message }
			| esgate_providers::Error::InvalidRequest { message } => Self::InvalidRequest { message },
			esgate_providers::Error::Timeout => {
				Self::Timeout { message: "Backend request timed out.".to_string() }
			},
			other => Self::Provider { message: other.to_string() },
		}
	}
}

/// Whether a collaborator failure is an HTTP-level timeout from the provider adapters.
pub(crate) fn is_timeout(err: &color_eyre::Report) -> bool {
	err.downcast_ref::<esgate_providers::Error>()
		.map(esgate_providers::Error::is_timeout)
		.unwrap_or(false)
}
