use std::time::Duration;

use mongodb::error::{ErrorKind, WriteFailure};

/// Server error code for a unique index violation (E11000).
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Server error code returned when a collection or database does not exist.
pub const NAMESPACE_NOT_FOUND_CODE: i32 = 26;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(#[source] mongodb::error::Error),

    #[error("Index creation failed: {reason}")]
    IndexCreation {
        reason: String,
        #[source]
        source: Option<mongodb::error::Error>,
    },

    #[error("Duplicate key: a user named '{name}' already exists")]
    DuplicateKey { name: String },

    #[error("Not found: no user named '{name}'")]
    NotFound { name: String },

    #[error("Decode error: {0}")]
    Decode(#[source] mongodb::error::Error),

    #[error("Cursor error: {0}")]
    Cursor(#[source] mongodb::error::Error),

    #[error("Store is not connected")]
    NotConnected,

    #[error("Database error: {0}")]
    Database(#[source] mongodb::error::Error),

    #[error("Operation '{operation}' timed out after {after:?}")]
    TimedOut {
        operation: &'static str,
        after: Duration,
    },

    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: &'static str },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// True for the one expected, non-fatal failure: inserting a name that already exists.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }

    /// Classifies a driver error that has no operation-specific meaning.
    pub fn from_driver(err: mongodb::error::Error) -> Self {
        if is_transport_error(&err) {
            StoreError::Connection(err)
        } else if is_decode_error(&err) {
            StoreError::Decode(err)
        } else {
            StoreError::Database(err)
        }
    }

    /// Classifies an insert failure; a unique index violation becomes `DuplicateKey`.
    pub fn from_insert(err: mongodb::error::Error, name: &str) -> Self {
        if is_duplicate_key_error(&err) {
            StoreError::DuplicateKey {
                name: name.to_string(),
            }
        } else {
            StoreError::from_driver(err)
        }
    }

    /// Result of a drop: a namespace that is already gone counts as dropped.
    pub fn tolerate_missing(result: Result<(), mongodb::error::Error>) -> Result<(), Self> {
        match result {
            Err(e) if !is_namespace_not_found(&e) => Err(StoreError::from_driver(e)),
            _ => Ok(()),
        }
    }

    /// Classifies an error raised while advancing a cursor.
    pub fn from_cursor(err: mongodb::error::Error) -> Self {
        if is_decode_error(&err) {
            StoreError::Decode(err)
        } else {
            StoreError::Cursor(err)
        }
    }

    pub fn index_creation(err: mongodb::error::Error) -> Self {
        StoreError::IndexCreation {
            reason: err.to_string(),
            source: Some(err),
        }
    }
}

/// Server-side error code carried by a command or write error, if any.
pub fn server_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => Some(concern.code),
        _ => None,
    }
}

pub fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    server_code(err) == Some(DUPLICATE_KEY_CODE)
}

pub fn is_namespace_not_found(err: &mongodb::error::Error) -> bool {
    server_code(err) == Some(NAMESPACE_NOT_FOUND_CODE)
}

pub fn is_transport_error(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. }
    )
}

pub fn is_decode_error(err: &mongodb::error::Error) -> bool {
    matches!(err.kind.as_ref(), ErrorKind::BsonDeserialization(_))
}
