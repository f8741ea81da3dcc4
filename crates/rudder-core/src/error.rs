//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid YAML: {message}")]
    InvalidYaml { message: String },

    #[error("Invalid YAML: manifests with multiple documents are not supported")]
    MultipleDocuments,

    #[error("invalid field path '{path}': {message}")]
    InvalidFieldPath { path: String, message: String },

    #[error("Server-managed fields not allowed in yaml_body: {path}")]
    ServerManagedField { path: String },

    #[error("Provider internal annotations not allowed in yaml_body: {annotation}")]
    InternalAnnotation { annotation: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid cluster_connection: {message}")]
    InvalidConnection { message: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
