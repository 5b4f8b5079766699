//! Error types for the proposal pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File parsing error
    #[error("Failed to parse file '{filename}': {message}")]
    FileParse { filename: String, message: String },

    /// Malformed client request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unsupported file type
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// OCR engine error
    #[error("OCR failed: {0}")]
    Ocr(String),

    /// Ollama/LLM error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Vector index error
    #[error("Vector database error: {0}")]
    VectorDb(String),

    /// Document persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Unknown processing job
    #[error("Processing job not found: {0}")]
    JobNotFound(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Operation exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a file parse error
    pub fn file_parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileParse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create a vector db error
    pub fn vector_db(message: impl Into<String>) -> Self {
        Self::VectorDb(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable label used in error records and API responses
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::FileParse { .. } => "parse_error",
            Error::BadRequest(_) => "bad_request",
            Error::UnsupportedFileType(_) => "unsupported_type",
            Error::Ocr(_) => "ocr_error",
            Error::Llm(_) => "llm_error",
            Error::Embedding(_) => "embedding_error",
            Error::VectorDb(_) => "vector_db_error",
            Error::Storage(_) => "storage_error",
            Error::JobNotFound(_) | Error::DocumentNotFound(_) => "not_found",
            Error::Timeout(_) => "timeout",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Http(_) => "http_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether an outer retry has a reasonable chance of succeeding
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Llm(_) | Error::Embedding(_) | Error::Http(_) | Error::Timeout(_) | Error::Io(_)
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::JobNotFound(_) | Error::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            Error::Config(_)
            | Error::BadRequest(_)
            | Error::FileParse { .. }
            | Error::UnsupportedFileType(_)
            | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Llm(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::llm("rate limited").is_transient());
        assert!(Error::Timeout("page 3".into()).is_transient());
        assert!(!Error::file_parse("a.pdf", "broken xref").is_transient());
        assert!(!Error::JobNotFound("x".into()).is_transient());
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let response = Error::JobNotFound("abc".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = Error::UnsupportedFileType("docx".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = Error::BadRequest("truncated multipart body".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!Error::BadRequest("x".into()).is_transient());
    }
}
