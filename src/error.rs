//! Error taxonomy for the import and pack pipeline.
//!
//! Every failure carries a human-readable message (via `Display`) and a stable
//! machine-readable kind (via `kind()`), so callers never need to parse strings.

use thiserror::Error;

/// Failures raised while normalizing a single entry path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Empty path is not allowed")]
    Empty,

    #[error("Absolute path is not allowed: {0}")]
    Absolute(String),

    #[error("Unsafe path detected: {0}")]
    UnsafeSegment(String),
}

impl PathError {
    pub fn kind(&self) -> &'static str {
        match self {
            PathError::Empty => "path.empty",
            PathError::Absolute(_) => "path.absolute",
            PathError::UnsafeSegment(_) => "path.unsafe_segment",
        }
    }
}

/// Failures raised while decoding and validating a whole payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Payload prefix must be LANMAP1:")]
    BadPrefix,

    #[error("Bad payload format: {0}")]
    BadFormat(String),

    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(String),

    #[error("Could not decode payload: {0}")]
    DecodeFailure(String),

    #[error("Decoded payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    SchemaViolation { field: String, reason: String },

    #[error("Invalid entry path {raw:?}: {source}")]
    InvalidPath {
        raw: String,
        #[source]
        source: PathError,
    },

    #[error("Duplicate path in payload: {0}")]
    DuplicatePath(String),

    #[error("Directory entry cannot contain content: {0}")]
    DirectoryHasContent(String),
}

impl PayloadError {
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PayloadError::BadPrefix => "payload.bad_prefix",
            PayloadError::BadFormat(_) => "payload.bad_format",
            PayloadError::UnsupportedCompression(_) => "payload.unsupported_compression",
            PayloadError::DecodeFailure(_) => "payload.decode_failure",
            PayloadError::InvalidJson(_) => "payload.invalid_json",
            PayloadError::SchemaViolation { .. } => "payload.schema_violation",
            PayloadError::InvalidPath { .. } => "payload.invalid_path",
            PayloadError::DuplicatePath(_) => "payload.duplicate_path",
            PayloadError::DirectoryHasContent(_) => "payload.directory_has_content",
        }
    }
}

/// Failures raised by read-side requests (tree, pack, file lookup).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Invalid {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{0} not found")]
    NotFound(String),
}

impl RequestError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::InvalidParameter { .. } => "request.invalid_parameter",
            RequestError::NotFound(_) => "request.not_found",
        }
    }
}

/// Failures raised by a `NodeStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Host address already exists: {0}")]
    Conflict(String),

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store snapshot is not valid JSON: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Conflict(_) => "store.conflict",
            StoreError::UnknownHost(_) => "store.unknown_host",
            StoreError::Io(_) => "store.io",
            StoreError::Serialize(_) => "store.serialize",
        }
    }
}

/// Umbrella error returned by the service-level entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Payload(e) => e.kind(),
            Error::Request(e) => e.kind(),
            Error::Store(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_across_wrapping() {
        let err: Error = PayloadError::DuplicatePath("a/b".into()).into();
        assert_eq!(err.kind(), "payload.duplicate_path");
        assert_eq!(err.to_string(), "Duplicate path in payload: a/b");

        let err: Error = RequestError::NotFound("Host".into()).into();
        assert_eq!(err.kind(), "request.not_found");
        assert_eq!(err.to_string(), "Host not found");
    }

    #[test]
    fn invalid_path_keeps_its_source() {
        let err = PayloadError::InvalidPath {
            raw: "../etc".into(),
            source: PathError::UnsafeSegment("../etc".into()),
        };
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "Unsafe path detected: ../etc");
    }
}
