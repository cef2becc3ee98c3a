//! Moving files onto the Hyper-V host and checking them once there.

use super::{HyperV, script};
use crate::error::HvError;
use crate::executor::Executor;
use crate::session::{self, Session};

impl<E: Executor> HyperV<E> {
    /// Hash a file on the host with `Get-FileHash`.
    pub async fn file_hash(&self, path: &str, algorithm: &str) -> Result<String, HvError> {
        let script = script(
            r#"
if (!(Test-Path $path)) { Write-Error "Cannot find file: $path" }
(Get-FileHash -Path $path -Algorithm $algorithm).Hash
"#,
            [("path", path), ("algorithm", algorithm)],
        )?;
        self.output(script).await
    }

    /// Copy a file from this machine to `dest` on the host. For a remote
    /// session the copy runs locally through `Copy-Item -ToSession`.
    pub async fn put_file(&self, source: &str, dest: &str) -> Result<(), HvError> {
        let body = match self.session() {
            Session::Local => "Copy-Item -Path $source -Destination $dest -Force\n".to_string(),
            Session::Remote(host) => format!(
                "{open}try {{\n    Copy-Item -Path $source -Destination $dest -ToSession {var} -Force\n}} finally {{\n    Remove-PSSession {var}\n}}\n",
                open = session::open_pssession(host),
                var = session::SESSION_VAR,
            ),
        };
        let script = script(&body, [("source", source), ("dest", dest)])?;
        tracing::debug!(source, dest, target_host = self.session().target(), "copying file to host");
        self.executor().run_in(&script, &Session::Local).await
    }

    /// Have the host fetch `source` (a URL) into `dest`.
    pub async fn download(&self, source: &str, dest: &str) -> Result<(), HvError> {
        let script = script(
            "(New-Object System.Net.WebClient).DownloadFile($source, $dest)\n",
            [("source", source), ("dest", dest)],
        )?;
        self.run(script).await
    }

    /// [`download`](Self::download), then compare the file's hash with
    /// `expected_hash` (case-insensitive, as `Get-FileHash` prints upper case).
    pub async fn download_verified(
        &self,
        source: &str,
        dest: &str,
        expected_hash: &str,
        algorithm: &str,
    ) -> Result<(), HvError> {
        self.download(source, dest).await?;
        let actual = self.file_hash(dest, algorithm).await?;
        if !actual.eq_ignore_ascii_case(expected_hash.trim()) {
            return Err(HvError::HashMismatch {
                path: dest.to_string(),
                expected: expected_hash.to_string(),
                actual,
            });
        }
        Ok(())
    }
}
