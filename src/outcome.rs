//! Turning a finished interpreter process into a result.
//!
//! Any stderr output counts as failure, even with exit code 0. PowerShell
//! writes non-terminating errors there, and warnings too, so a benign
//! warning also fails the call.

use crate::error::HvError;

/// Everything captured from one interpreter run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl InvocationResult {
    pub fn from_output(output: &std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trimmed stdout on success; otherwise a `ScriptFailed` error.
pub fn classify(result: &InvocationResult) -> Result<String, HvError> {
    let stderr = result.stderr.trim();
    if !stderr.is_empty() {
        return Err(HvError::ScriptFailed {
            message: stderr.to_string(),
            exit_code: result.exit_code,
        });
    }

    if !result.success() {
        let message = match result.exit_code {
            Some(code) => format!("PowerShell process failed with exit code {code}"),
            None => "PowerShell process was terminated by a signal".to_string(),
        };
        return Err(HvError::ScriptFailed {
            message,
            exit_code: result.exit_code,
        });
    }

    Ok(result.stdout.trim().to_string())
}
