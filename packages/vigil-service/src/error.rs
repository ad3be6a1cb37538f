pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Rate limit exceeded for client {client_id}.")]
	RateLimited { client_id: String },
	#[error("Backend error: {message}")]
	Backend { message: String },
	#[error("Cache error: {message}")]
	Cache { message: String },
}
impl From<vigil_domain::Error> for Error {
	fn from(err: vigil_domain::Error) -> Self {
		match err {
			vigil_domain::Error::InvalidOptions { message } => Self::InvalidRequest { message },
		}
	}
}

impl From<vigil_providers::Error> for Error {
	fn from(err: vigil_providers::Error) -> Self {
		match err {
			vigil_providers::Error::DimensionMismatch { .. } =>
				Self::InvalidRequest { message: err.to_string() },
			other => Self::Backend { message: other.to_string() },
		}
	}
}
