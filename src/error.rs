use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HvError {
    #[error("cannot find {program} in PATH")]
    #[diagnostic(
        code(hvremote::interpreter_not_found),
        help("install PowerShell or point [interpreter] program at its full path")
    )]
    InterpreterNotFound { program: String },

    #[error("failed to write script {path}: {source}")]
    #[diagnostic(code(hvremote::materialize))]
    Materialize {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    #[diagnostic(code(hvremote::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The interpreter exited non-zero or wrote anything to stderr.
    /// `message` is the trimmed stderr text when there was any.
    #[error("{message}")]
    #[diagnostic(code(hvremote::script_failed))]
    ScriptFailed {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("{operation} returned unexpected output '{output}': {reason}")]
    #[diagnostic(code(hvremote::unexpected_output))]
    UnexpectedOutput {
        operation: String,
        output: String,
        reason: String,
    },

    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    #[diagnostic(code(hvremote::hash_mismatch))]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("invalid parameter name '{name}'")]
    #[diagnostic(
        code(hvremote::invalid_parameter),
        help("parameter names must match [A-Za-z_][A-Za-z0-9_]*")
    )]
    InvalidParameterName { name: String },

    #[error("parameter name '{name}' is reserved")]
    #[diagnostic(
        code(hvremote::reserved_parameter),
        help(
            "names starting with 'hvParam', the envelope's hvCredential, hvSecurePassword and \
             hvSession, and PowerShell's constant or automatic variables cannot be assigned"
        )
    )]
    ReservedParameterName { name: String },

    #[error("unrecognized integration service '{name}'")]
    #[diagnostic(
        code(hvremote::unknown_integration_service),
        help(
            "expected one of: Time Synchronization, Heartbeat, Key-Value Pair Exchange, \
             Shutdown, VSS, Guest Service Interface"
        )
    )]
    UnknownIntegrationService { name: String },

    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl HvError {
    pub(crate) fn unexpected_output(
        operation: &str,
        output: &str,
        reason: impl std::fmt::Display,
    ) -> Self {
        HvError::UnexpectedOutput {
            operation: operation.into(),
            output: output.into(),
            reason: reason.to_string(),
        }
    }
}
