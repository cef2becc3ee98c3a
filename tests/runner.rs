//! End-to-end runs against a stand-in interpreter.
//!
//! The stand-in (`tests/fixtures/fake-pwsh`) checks the fixed argument
//! prefix, skips the parameter preamble and feeds the rest of the script
//! file to `sh`, with the blob as `$1` and the script path as `$2`. Script
//! bodies below are shell, not PowerShell.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use futures_util::future::join_all;
use hvremote::runner::Sink;
use hvremote::script::PARAM_PREAMBLE;
use hvremote::session::RemoteHost;
use hvremote::{Executor, HvError, ParameterSet, Runner, RunnerConfig, Script, Session};

/// Checked in rather than generated, so no test ever holds the executable
/// open for writing while another thread forks (ETXTBSY).
static FAKE_INTERPRETER: LazyLock<PathBuf> = LazyLock::new(|| {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/fake-pwsh");
    // Checkouts do not always keep the mode bit; chmod never opens the file.
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    if mode & 0o111 != 0o111 {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
});

fn runner_in(script_dir: &Path, retain_scripts: bool) -> Runner {
    Runner::new(RunnerConfig {
        program: FAKE_INTERPRETER.to_string_lossy().into_owned(),
        script_dir: script_dir.to_path_buf(),
        retain_scripts,
        verbose: false,
    })
}

fn params(pairs: &[(&str, &str)]) -> ParameterSet {
    ParameterSet::from_pairs(pairs.iter().copied()).unwrap()
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

#[tokio::test]
async fn clean_exit_yields_trimmed_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let out = runner_in(dir.path(), false)
        .output(&Script::new("printf '  hello world\\n'\n"))
        .await
        .unwrap();
    assert_eq!(out, "hello world");
}

#[tokio::test]
async fn stderr_on_clean_exit_is_failure() {
    let dir = tempfile::tempdir().unwrap();
    let err = runner_in(dir.path(), false)
        .output(&Script::new("echo ok\necho 'Warning: deprecated' >&2\nexit 0\n"))
        .await
        .unwrap_err();
    assert!(matches!(err, HvError::ScriptFailed { exit_code: Some(0), .. }));
    assert_eq!(err.to_string(), "Warning: deprecated");
}

#[tokio::test]
async fn nonzero_exit_without_stderr_has_generic_message() {
    let dir = tempfile::tempdir().unwrap();
    let err = runner_in(dir.path(), false)
        .run(&Script::new("exit 3\n"))
        .await
        .unwrap_err();
    match err {
        HvError::ScriptFailed { message, exit_code } => {
            assert_eq!(exit_code, Some(3));
            assert!(!message.is_empty());
        }
        other => panic!("expected ScriptFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn parameter_blob_reaches_the_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let sent = params(&[
        ("vmName", "web01"),
        ("path", r"C:\VMs\web 01"),
        ("notes", "line one\nline two"),
    ]);
    let out = runner_in(dir.path(), false)
        .output(&Script::new("printf '%s' \"$1\"\n").with_params(sent.clone()))
        .await
        .unwrap();
    assert_eq!(ParameterSet::from_blob(&out).unwrap(), sent);
}

#[tokio::test]
async fn script_file_removed_after_success() {
    let dir = tempfile::tempdir().unwrap();
    let result = runner_in(dir.path(), false)
        .execute(&Script::new("echo \"$2\"\n"))
        .await
        .unwrap();
    let path = PathBuf::from(result.stdout.trim());
    assert!(path.starts_with(dir.path()));
    assert!(path.extension().is_some_and(|ext| ext == "ps1"));
    assert!(!path.exists());
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn script_file_removed_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let result = runner_in(dir.path(), false)
        .execute(&Script::new("echo \"$2\"\necho boom >&2\nexit 1\n"))
        .await
        .unwrap();
    assert!(!result.success());
    assert!(!Path::new(result.stdout.trim()).exists());
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn script_file_retained_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let out = runner_in(dir.path(), true)
        .output(&Script::new("echo \"$2\"\n"))
        .await
        .unwrap();
    let path = PathBuf::from(out);
    assert!(path.exists());
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with(PARAM_PREAMBLE));
    assert!(contents.ends_with("echo \"$2\"\n"));
}

#[tokio::test]
async fn concurrent_invocations_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner_in(dir.path(), true);
    let scripts: Vec<Script> = (0..50)
        .map(|i| {
            let value = i.to_string();
            Script::new("echo \"$2\"\nprintf '%s' \"$1\"\n")
                .with_params(params(&[("index", value.as_str())]))
        })
        .collect();

    let results = join_all(scripts.iter().map(|s| runner.output(s))).await;

    let mut paths = Vec::new();
    for (i, result) in results.into_iter().enumerate() {
        let out = result.unwrap();
        let (path, blob) = out.split_once('\n').unwrap();
        assert_eq!(blob, format!("index={i}"));
        paths.push(path.to_string());
    }
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 50);
    assert_eq!(files_in(dir.path()).len(), 50);
}

#[tokio::test]
async fn captured_output_is_mirrored_to_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let stdout = Arc::new(Mutex::new(Vec::<u8>::new()));
    let stderr = Arc::new(Mutex::new(Vec::<u8>::new()));
    let stdout_sink: Sink = stdout.clone();
    let stderr_sink: Sink = stderr.clone();
    let runner = runner_in(dir.path(), false)
        .with_stdout_sink(stdout_sink)
        .with_stderr_sink(stderr_sink);

    let err = runner
        .output(&Script::new("echo out\necho err >&2\n"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "err");
    assert_eq!(stdout.lock().unwrap().as_slice(), b"out\n");
    assert_eq!(stderr.lock().unwrap().as_slice(), b"err\n");
}

#[tokio::test]
async fn local_session_runs_script_unwrapped() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner_in(dir.path(), false);
    let out = runner
        .output_in(&Script::new("echo local\n"), &Session::Local)
        .await
        .unwrap();
    assert_eq!(out, "local");
}

#[tokio::test]
async fn remote_session_writes_invoke_command_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner_in(dir.path(), true);
    let session = Session::remote(RemoteHost::new("hv01"));
    let script = Script::new("Get-VM -Name $vmName\n").with_params(params(&[("vmName", "web01")]));

    // The envelope is PowerShell, so the stand-in's `sh` rejects it.
    let err = runner.run_remote(&script, &session).await.unwrap_err();
    assert!(matches!(err, HvError::ScriptFailed { .. }));

    let files = files_in(dir.path());
    assert_eq!(files.len(), 1);
    let contents = std::fs::read_to_string(&files[0]).unwrap();
    assert!(contents.contains("Invoke-Command -ComputerName 'hv01' -ScriptBlock {"));
    assert!(contents.contains("$vmName = $using:vmName"));
    assert!(!contents.contains("PSCredential"));
}
