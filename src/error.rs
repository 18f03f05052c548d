use std::{fmt, io};

#[cfg(feature = "service")]
use std::{borrow::Cow, error::Error as StdError};

use http::status::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "service")]
use sqlx::{
    error::{DatabaseError, ErrorKind as DatabaseErrorKind},
    Error as SqlxError,
};

use serde_json::Error as JsonError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum SyncError {
    #[error("Unauthorized: no caller identity")]
    Authentication,
    #[error("Test not found or access denied: {0}")]
    Ownership(String),
    #[error("Invalid payload: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("File System error: {0}")]
    Io(String),
}

impl SyncError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::Authentication => StatusCode::UNAUTHORIZED,
            SyncError::Ownership(_) => StatusCode::NOT_FOUND,
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SyncError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SyncError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to a client. Storage and startup failures stay opaque; their
    /// detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            SyncError::Authentication => "Unauthorized".to_string(),
            SyncError::Ownership(_) => "Test not found or access denied".to_string(),
            SyncError::Validation(msg) => msg.clone(),
            SyncError::Storage(_) | SyncError::Config(_) | SyncError::Io(_) => {
                "Internal server error".to_string()
            }
        }
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        SyncError::Validation(msg.into())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(src: toml::de::Error) -> SyncError {
        SyncError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(src: toml::ser::Error) -> SyncError {
        SyncError::Config(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for SyncError {
    fn from(src: JsonError) -> SyncError {
        SyncError::Validation(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<uuid::Error> for SyncError {
    fn from(src: uuid::Error) -> SyncError {
        SyncError::Storage(format!("UUID conversion failed: {src}"))
    }
}

impl From<io::Error> for SyncError {
    fn from(x: io::Error) -> Self {
        SyncError::Io(format!("IOError: {} ({x})", x.kind()))
    }
}

impl From<fmt::Error> for SyncError {
    fn from(x: fmt::Error) -> Self {
        SyncError::Io(format!("{x}"))
    }
}

#[cfg(feature = "service")]
impl From<SqlxError> for SyncError {
    fn from(db_error: SqlxError) -> Self {
        SyncError::Storage(format!("database error: {db_error:?}"))
    }
}

#[cfg(feature = "service")]
impl From<sqlx::migrate::MigrateError> for SyncError {
    fn from(migrate_error: sqlx::migrate::MigrateError) -> Self {
        SyncError::Storage(format!("migration failed: {migrate_error}"))
    }
}

#[cfg(feature = "service")]
impl DatabaseError for SyncError {
    fn message(&self) -> &str {
        "examsync FromRow parsing failure"
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        DatabaseErrorKind::Other
    }

    /// The extended result code.
    #[inline]
    fn code(&self) -> Option<Cow<'_, str>> {
        None
    }

    #[doc(hidden)]
    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    #[doc(hidden)]
    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    #[doc(hidden)]
    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }
}
