//! Error types for the openbridge crate.

use thiserror::Error;

/// Errors raised while reading an OpenAPI document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpecError {
    #[error("failed to read spec file: {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON spec")]
    Json(#[source] serde_json::Error),

    #[error("invalid YAML spec")]
    Yaml(#[source] serde_yaml_ng::Error),

    #[error("unsupported spec version {version} (convert Swagger 2.0 to OpenAPI 3 first)")]
    UnsupportedVersion { version: String },
}

/// Fatal errors of a command tree build.
///
/// Problems with single operations never surface here; they are reported as
/// [`crate::command_tree::BuildWarning`]s and the operation is skipped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("spec has no paths")]
    EmptySpec,

    #[error("spec has no usable operations ({skipped} skipped)")]
    NoUsableOperations { skipped: usize },

    #[error("command tree build was cancelled")]
    Cancelled,
}

/// Errors binding flag or tool argument values to an HTTP request.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum BindError {
    #[error("missing required argument --{flag}")]
    MissingRequired { flag: String },

    #[error("missing required body field '{field}'")]
    MissingBodyField { field: String },

    #[error("request body is required (use --body or body flags)")]
    BodyRequired,

    #[error("invalid value for --{flag}: expected {expected}, got '{value}'")]
    InvalidValue {
        flag: String,
        expected: &'static str,
        value: String,
    },

    #[error("--{flag} must be one of [{allowed}], got '{value}'")]
    NotInEnum {
        flag: String,
        allowed: String,
        value: String,
    },

    #[error("unknown argument '{name}'")]
    UnknownArgument { name: String },

    #[error("invalid JSON body: {message}")]
    InvalidBody { message: String },

    #[error("failed to read body from {source_name}: {message}")]
    BodyRead {
        source_name: String,
        message: String,
    },
}

/// Errors from the app configuration file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file: {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("failed to serialize config")]
    Serialize(#[source] serde_yaml_ng::Error),

    #[error("app '{name}' is not installed")]
    AppNotFound { name: String },

    #[error("profile '{profile}' not found for app '{app}'")]
    ProfileNotFound { app: String, profile: String },
}

/// Errors executing a bound request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecError {
    #[error("failed to build http client")]
    Client(#[source] reqwest::Error),

    #[error("invalid base url: {url}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid header {name}")]
    InvalidHeader { name: String },

    #[error("HTTP request failed")]
    RequestFailed(#[source] reqwest::Error),

    #[error("failed to read response body")]
    ResponseRead(#[source] reqwest::Error),
}

/// Errors invoking an MCP tool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    #[error("tool not found: {name}")]
    NotFound { name: String },

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}
