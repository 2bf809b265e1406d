use kb_domain::sql_guard::SqlRejection;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("No knowledge bases specified and no search targets configured.")]
	NoSearchTargets,
	#[error("SQL rejected: {0}")]
	SqlRejected(#[from] SqlRejection),
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Request cancelled before any search completed.")]
	Cancelled,
}
impl From<kb_storage::Error> for Error {
	fn from(err: kb_storage::Error) -> Self {
		match err {
			kb_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			kb_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
		}
	}
}

impl From<kb_providers::Error> for Error {
	fn from(err: kb_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
