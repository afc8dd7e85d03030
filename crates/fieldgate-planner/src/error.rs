use thiserror::Error;

use crate::datasource::DataSourceKind;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that reject a configuration at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no factory resolver accepted data source '{id}' of kind {kind}")]
    UnresolvedKind { id: String, kind: DataSourceKind },

    #[error("field {type_name}.{field_name} is claimed by both '{first}' and '{second}'")]
    DuplicateRootField {
        type_name: String,
        field_name: String,
        first: String,
        second: String,
    },

    #[error("no string found for key '{key}' (data source '{id}')")]
    MissingInternedString { id: String, key: String },

    #[error("fetch URL '{url}' of data source '{id}' contains a placeholder; placeholders are only allowed as {{{{ .arguments.x }}}} templates")]
    InvalidFetchUrl { id: String, url: String },

    #[error("invalid custom configuration for data source '{id}': {reason}")]
    BadCustomConfig { id: String, reason: String },

    #[error("failed to parse configuration document: {0}")]
    Parse(String),

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Errors that fail the compilation of a single root field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("no data source owns field {type_name}.{field_name}")]
    UnownedField {
        type_name: String,
        field_name: String,
    },

    #[error("variable ${name} is not defined by the operation")]
    UnknownVariable { name: String },

    #[error("argument '{argument}' of {type_name}.{field_name} has no usable type: {reason}")]
    MalformedArgumentType {
        type_name: String,
        field_name: String,
        argument: String,
        reason: String,
    },

    #[error("schema has no definition for field {type_name}.{field_name}")]
    UnknownField {
        type_name: String,
        field_name: String,
    },

    #[error("operation kind {kind} has no root type in the schema")]
    MissingRootType { kind: String },

    #[error("internal compiler state error: {0}")]
    Internal(String),
}

pub type CompileResult<T> = std::result::Result<T, CompileError>;
