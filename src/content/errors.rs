//! Content Service Error Types
//!
//! Every failure that leaves the binary subsystem is a `ContentError`.
//! HTTP status codes are mapped to variants so callers can tell a missing
//! item (404) apart from everything else.

use std::path::PathBuf;

/// Content provider error types
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Bad request ({status}): {context}")]
    BadRequest { status: u16, context: String },

    #[error("Internal server error ({status}): {context}")]
    InternalServerError { status: u16, context: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response from content service: {0}")]
    InvalidResponse(String),

    #[error("Unsupported namespace: '{0}'")]
    UnsupportedNamespace(String),

    #[error("Invalid binary path: '{0}'")]
    InvalidPath(String),

    #[error("Cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ContentError {
    /// Whether the remote service reported the item as absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContentError::NotFound(_))
    }

    /// Create a ContentError from an HTTP status code and request context
    pub fn from_status(status: u16, context: &str) -> Self {
        match status {
            404 => ContentError::NotFound(context.to_string()),
            400..=499 => ContentError::BadRequest {
                status,
                context: context.to_string(),
            },
            500..=599 => ContentError::InternalServerError {
                status,
                context: context.to_string(),
            },
            _ => ContentError::InvalidResponse(format!("HTTP {}: {}", status, context)),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ContentError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for ContentError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let context = err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| err.to_string());
            return ContentError::from_status(status.as_u16(), &context);
        }
        if err.is_decode() {
            return ContentError::InvalidResponse(err.to_string());
        }
        ContentError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_mapping() {
        assert!(ContentError::from_status(404, "binary 1").is_not_found());
        assert!(matches!(
            ContentError::from_status(401, "x"),
            ContentError::BadRequest { status: 401, .. }
        ));
        assert!(matches!(
            ContentError::from_status(400, "x"),
            ContentError::BadRequest { status: 400, .. }
        ));
        assert!(matches!(
            ContentError::from_status(503, "x"),
            ContentError::InternalServerError { status: 503, .. }
        ));
    }

    #[test]
    fn test_error_carries_request_context() {
        let err = ContentError::from_status(502, "binaryComponent pub=5 id=7");
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("pub=5 id=7"));
        assert!(!err.is_not_found());
    }
}
