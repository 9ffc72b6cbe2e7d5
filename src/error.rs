//! Defines the error taxonomy of a pipeline invocation. Every variant
//! is terminal for the invocation that produced it.

use thiserror::Error;

/// Boxed error coming from a storage backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Event does not contain a valid type (e.g. ObjectCreated); invoked by event name {0:?}")]
    InvalidEventType(String),

    #[error("Event does not contain a valid object key")]
    MissingObjectKey,

    #[error("Object {key:?} was not found")]
    NotFound { key: String },

    #[error("Storage operation {operation} on {key:?} failed")]
    Storage {
        operation: &'static str,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Invalid source dimensions: {width}x{height}")]
    InvalidSourceDimensions { width: u32, height: u32 },

    #[error("Invalid image input: {0}")]
    InvalidImageInput(String),

    #[error("Codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("Unsupported rendered format {0:?}")]
    UnsupportedFormat(String),
}

impl Error {
    /// Build a storage error for `operation` on `key`.
    pub fn storage(
        operation: &'static str,
        key: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::Storage {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
