use s3::error::S3Error;
use serde::Serialize;
use thiserror::Error;
use warp::{Rejection, Reply, hyper::StatusCode, reject::Reject};

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid video id: '{0}'")]
    InvalidIdError(String),
    #[error("No auth header provided")]
    MissingAuthHeaderError,
    #[error("The JWT is not or no longer valid")]
    InvalidJwtError,
    #[error("No video found for id {0}")]
    VideoNotFoundError(uuid::Uuid),
    #[error("Video {0} does not belong to the current user")]
    NotOwnerError(uuid::Uuid),
    #[error("Invalid multipart request: {0}")]
    BadMultipartError(String),
    #[error("Unsupported media type: '{0}'")]
    UnsupportedMediaError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Failed to probe media: {0}")]
    ProbeError(String),
    #[error("Failed to remux video: {0}")]
    RemuxError(String),
    #[error("Object storage error: {0}")]
    StorageError(String),
    #[error("Object storage responded with status {0}")]
    S3ResponseError(u16),
    #[error("Could not establish database connection")]
    DatabaseConnectionError,
    #[error("There has been an error executing a query: '{0}'")]
    QueryError(String),
    #[error("Failed to write video record: {0}")]
    CatalogWriteError(String),
    #[error("Malformed stored video url: '{0}'")]
    MalformedStoredUrlError(String),
    #[error("The task has been cancelled")]
    CancellationError,
}

impl Reject for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl From<S3Error> for Error {
    fn from(e: S3Error) -> Self {
        Self::StorageError(e.to_string())
    }
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Self::QueryError(e.to_string())
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidIdError(_)
            | Error::VideoNotFoundError(_)
            | Error::BadMultipartError(_)
            | Error::UnsupportedMediaError(_) => StatusCode::BAD_REQUEST,
            Error::MissingAuthHeaderError | Error::InvalidJwtError | Error::NotOwnerError(_) => {
                StatusCode::UNAUTHORIZED
            }
            Error::IoError(_)
            | Error::ProbeError(_)
            | Error::RemuxError(_)
            | Error::StorageError(_)
            | Error::S3ResponseError(_)
            | Error::DatabaseConnectionError
            | Error::QueryError(_)
            | Error::CatalogWriteError(_)
            | Error::MalformedStoredUrlError(_)
            | Error::CancellationError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
}

/// Creates a Rejection response for the given error and logs internal server errors.
///
/// The cause of internal errors is only written to the log, clients receive a generic message.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(e) = err.find::<Error>() {
        let code = e.status_code();
        let message = if code == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Encountered internal server error: {}", e);
            String::from("Internal server error")
        } else {
            log::debug!("Rejecting request with status {}: {}", code, e);
            e.to_string()
        };

        let json = warp::reply::json(&ErrorResponse { error: message });

        Ok(warp::reply::with_status(json, code))
    } else {
        Err(err)
    }
}
