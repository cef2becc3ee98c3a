//! Script payloads and their on-disk materialization.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::HvError;
use crate::params::ParameterSet;

/// Prepended to every script. Takes the parameter blob as its only
/// argument and turns each `key=value` entry into a script-scope variable.
pub const PARAM_PREAMBLE: &str = r#"param([string]$hvParamBlob)
foreach ($hvParamLine in ($hvParamBlob -split "`n")) {
    if ($hvParamLine -eq '') { continue }
    $hvParamName, $hvParamValue = $hvParamLine -split '=', 2
    $hvParamValue = [Regex]::Replace($hvParamValue, '\\(.)', {
        param($m)
        switch -CaseSensitive ($m.Groups[1].Value) {
            'n' { "`n" }
            'r' { "`r" }
            default { $m.Groups[1].Value }
        }
    })
    Set-Variable -Name $hvParamName -Value $hvParamValue
}"#;

/// A script body plus the parameters it expects to find in scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub body: String,
    pub params: ParameterSet,
}

impl Script {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            params: ParameterSet::new(),
        }
    }

    pub fn with_params(mut self, params: ParameterSet) -> Self {
        self.params = params;
        self
    }

    /// Full file contents: preamble, newline, then the body untouched.
    pub fn render(&self) -> String {
        format!("{PARAM_PREAMBLE}\n{}", self.body)
    }
}

/// A rendered script on disk. Removed on drop unless `retain` was set.
#[derive(Debug)]
pub struct MaterializedScript {
    path: PathBuf,
    retain: bool,
}

impl MaterializedScript {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MaterializedScript {
    fn drop(&mut self) {
        if self.retain {
            tracing::info!(path = %self.path.display(), "retaining generated script");
            return;
        }
        // Cleanup failures are logged and otherwise ignored.
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove generated script");
        }
    }
}

/// Write `script` to a new, randomly named `.ps1` file in `dir`.
pub fn materialize(
    dir: &Path,
    script: &Script,
    retain: bool,
) -> Result<MaterializedScript, HvError> {
    let mut file = tempfile::Builder::new()
        .prefix("hvremote-")
        .suffix(".ps1")
        .rand_bytes(12)
        .tempfile_in(dir)
        .map_err(|source| HvError::Materialize {
            path: dir.display().to_string(),
            source,
        })?;

    file.write_all(script.render().as_bytes())
        .and_then(|()| file.flush())
        .map_err(|source| HvError::Materialize {
            path: file.path().display().to_string(),
            source,
        })?;

    let (_, path) = file.keep().map_err(|e| HvError::Materialize {
        path: e.file.path().display().to_string(),
        source: e.error,
    })?;

    tracing::debug!(path = %path.display(), "materialized script");
    Ok(MaterializedScript { path, retain })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_ends_with_closing_brace_line() {
        assert_eq!(PARAM_PREAMBLE.lines().last(), Some("}"));
        // the only unindented closing brace, so tools can find where the body starts
        assert_eq!(PARAM_PREAMBLE.lines().filter(|l| *l == "}").count(), 1);
        assert!(PARAM_PREAMBLE.starts_with("param("));
    }

    #[test]
    fn render_appends_body_unmodified() {
        let body = "Get-VM -Name $vmName\n  $x = 1\n";
        let rendered = Script::new(body).render();
        assert!(rendered.starts_with(PARAM_PREAMBLE));
        assert!(rendered.ends_with(body));
        assert_eq!(rendered.len(), PARAM_PREAMBLE.len() + 1 + body.len());
    }

    #[test]
    fn materialize_writes_ps1_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new("Write-Output 'hi'");
        let m = materialize(dir.path(), &script, false).unwrap();

        let path = m.path().to_path_buf();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("ps1"));
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), script.render());

        drop(m);
        assert!(!path.exists());
    }

    #[test]
    fn retained_script_survives_drop() {
        let dir = tempfile::tempdir().unwrap();
        let m = materialize(dir.path(), &Script::new("exit 0"), true).unwrap();
        let path = m.path().to_path_buf();
        drop(m);
        assert!(path.exists());
    }

    #[test]
    fn names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new("");
        let a = materialize(dir.path(), &script, false).unwrap();
        let b = materialize(dir.path(), &script, false).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn missing_dir_is_materialize_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = materialize(&missing, &Script::new(""), false).unwrap_err();
        assert!(matches!(err, HvError::Materialize { .. }));
    }
}
