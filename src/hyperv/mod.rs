//! Hyper-V operations as thin callers of the script transport.
//!
//! Every operation builds a [`Script`] whose body reads its inputs from
//! plain variables and hands it to an [`Executor`]. The transport delivers
//! those variables locally through the parameter preamble and, for remote
//! sessions, rebinds them through `$using:` inside the remote script block.

pub mod drives;
pub mod files;
pub mod host;
pub mod integration;
pub mod network;
pub mod vm;

use crate::error::HvError;
use crate::executor::Executor;
use crate::params::ParameterSet;
use crate::script::Script;
use crate::session::Session;

pub use integration::IntegrationService;
pub use vm::Generation;

/// Hyper-V operations against one host.
pub struct HyperV<E> {
    executor: E,
    session: Session,
}

impl<E: Executor> HyperV<E> {
    pub fn new(executor: E, session: Session) -> Self {
        Self { executor, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run an empty script. Fails the same way any operation would if the
    /// host is unreachable or the credentials are rejected.
    pub async fn test_connectivity(&self) -> Result<(), HvError> {
        self.run(Script::new("")).await
    }

    async fn output(&self, script: Script) -> Result<String, HvError> {
        self.executor.output_in(&script, &self.session).await
    }

    async fn run(&self, script: Script) -> Result<(), HvError> {
        self.executor.run_in(&script, &self.session).await
    }
}

// ── helpers ───────────────────────────────────────────────

fn script<K, V, I>(body: &str, params: I) -> Result<Script, HvError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    Ok(Script::new(body).with_params(ParameterSet::from_pairs(params)?))
}

/// PowerShell's rendering of a boolean.
fn ps_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

fn parse_bool(operation: &str, output: &str) -> Result<bool, HvError> {
    match output.trim() {
        "True" => Ok(true),
        "False" => Ok(false),
        other => Err(HvError::unexpected_output(
            operation,
            other,
            "expected True or False",
        )),
    }
}

fn parse_number<T>(operation: &str, output: &str) -> Result<T, HvError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let trimmed = output.trim();
    trimmed
        .parse()
        .map_err(|e| HvError::unexpected_output(operation, trimmed, e))
}

fn non_empty(output: String) -> Option<String> {
    let trimmed = output.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
