use serde::Serialize;
use thiserror::Error;

/// A single validation failure, addressed to one input field.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP server error: {0}")]
    Http(#[from] hyper::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl TemplateError {
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        TemplateError::NotFound(format!("{kind} {id}"))
    }
}

pub type Result<T> = std::result::Result<T, TemplateError>;
