//! Launching the PowerShell interpreter on a materialized script.
//!
//! Each call resolves the interpreter, writes a fresh script file, runs the
//! interpreter to completion with stdout and stderr captured separately,
//! removes the file and classifies the outcome. There is no timeout and no
//! retry. Dropping the returned future kills the child, so callers that
//! need a bound can wrap calls in `tokio::time::timeout`.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use crate::config::RunnerConfig;
use crate::error::HvError;
use crate::outcome::{self, InvocationResult};
use crate::script::{self, Script};
use crate::session::{self, Session};

/// Receives a copy of captured output after each run.
pub type Sink = Arc<Mutex<dyn Write + Send>>;

pub struct Runner {
    config: RunnerConfig,
    stdout_sink: Option<Sink>,
    stderr_sink: Option<Sink>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            stdout_sink: None,
            stderr_sink: None,
        }
    }

    /// Default settings plus `HVREMOTE_DEBUG` / `HVREMOTE_VERBOSE` /
    /// `HVREMOTE_SCRIPT_DIR`.
    pub fn from_env() -> Self {
        Self::new(RunnerConfig::from_env())
    }

    pub fn with_stdout_sink(mut self, sink: Sink) -> Self {
        self.stdout_sink = Some(sink);
        self
    }

    pub fn with_stderr_sink(mut self, sink: Sink) -> Self {
        self.stderr_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run locally and return trimmed stdout.
    pub async fn output(&self, script: &Script) -> Result<String, HvError> {
        let result = self.execute(script).await?;
        outcome::classify(&result)
    }

    /// Run locally, discarding stdout.
    pub async fn run(&self, script: &Script) -> Result<(), HvError> {
        self.output(script).await.map(|_| ())
    }

    /// Run inside `session` and return trimmed stdout.
    pub async fn output_remote(&self, script: &Script, session: &Session) -> Result<String, HvError> {
        if self.config.verbose {
            tracing::info!(target_host = session.target(), "running script");
        }
        let wrapped = session::wrap(script, session);
        self.output(&wrapped).await
    }

    /// Run inside `session`, discarding stdout.
    pub async fn run_remote(&self, script: &Script, session: &Session) -> Result<(), HvError> {
        self.output_remote(script, session).await.map(|_| ())
    }

    /// Run the interpreter and return raw captured output, unclassified.
    pub async fn execute(&self, script: &Script) -> Result<InvocationResult, HvError> {
        let program = resolve_interpreter(&self.config.program)?;
        let materialized =
            script::materialize(&self.config.script_dir, script, self.config.retain_scripts)?;
        let args = interpreter_args(materialized.path(), &script.params.to_blob());

        if self.config.verbose {
            tracing::info!(program = %program.display(), ?args, "run");
        } else {
            tracing::debug!(program = %program.display(), script = %materialized.path().display(), "run");
        }

        let output = tokio::process::Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| HvError::Io {
                context: format!("running {}", program.display()),
                source,
            })?;

        drop(materialized);

        mirror(self.stdout_sink.as_ref(), &output.stdout, "stdout");
        mirror(self.stderr_sink.as_ref(), &output.stderr, "stderr");

        let result = InvocationResult::from_output(&output);
        if self.config.verbose {
            let stdout = result.stdout.trim();
            let stderr = result.stderr.trim();
            if !stdout.is_empty() {
                tracing::info!(stdout, "stdout");
            }
            if !stderr.is_empty() {
                tracing::info!(stderr, "stderr");
            }
        }
        tracing::debug!(exit_code = ?result.exit_code, "interpreter exited");
        Ok(result)
    }
}

/// `-ExecutionPolicy Bypass -NoProfile -File <script> <blob>`
pub fn interpreter_args(script_path: &Path, blob: &str) -> Vec<OsString> {
    vec![
        "-ExecutionPolicy".into(),
        "Bypass".into(),
        "-NoProfile".into(),
        "-File".into(),
        script_path.as_os_str().to_os_string(),
        blob.into(),
    ]
}

/// Find the interpreter. A bare name is looked up in `PATH`; anything with
/// a directory component is used as given if it is a file.
pub fn resolve_interpreter(program: &str) -> Result<PathBuf, HvError> {
    let candidate = Path::new(program);
    let found = if candidate.components().count() > 1 {
        candidate.is_file().then(|| candidate.to_path_buf())
    } else {
        find_in_path(program)
    };
    found.ok_or_else(|| HvError::InterpreterNotFound {
        program: program.to_string(),
    })
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let suffix = std::env::consts::EXE_SUFFIX;
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let plain = dir.join(name);
            if plain.is_file() {
                return Some(plain);
            }
            if !suffix.is_empty() {
                let with_suffix = dir.join(format!("{name}{suffix}"));
                if with_suffix.is_file() {
                    return Some(with_suffix);
                }
            }
            None
        })
    })
}

fn mirror(sink: Option<&Sink>, bytes: &[u8], stream: &str) {
    let Some(sink) = sink else { return };
    let mut writer = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Err(e) = writer.write_all(bytes).and_then(|()| writer.flush()) {
        tracing::warn!(stream, error = %e, "failed to mirror output");
    }
}
