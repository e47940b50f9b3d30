use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::Credentials;
use crate::error::BotError;

/// Handle on the `spotdl` executable, shared by the resolver and the fetcher.
#[derive(Clone)]
pub struct SpotdlTool {
    program: PathBuf,
    client_id: String,
    client_secret: String,
}

impl SpotdlTool {
    pub fn new(bin: &str, credentials: &Credentials) -> Result<Self, BotError> {
        let program = if bin.contains(std::path::MAIN_SEPARATOR) {
            PathBuf::from(bin)
        } else {
            find_in_path(bin).ok_or_else(|| BotError::MissingTool(bin.to_string()))?
        };
        Ok(Self {
            program,
            client_id: credentials.spotify_client_id.clone(),
            client_secret: credentials.spotify_client_secret.clone(),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `spotdl <operation> <query> <extra..>` with the client credentials
    /// appended. A non-zero exit maps through `on_error`.
    pub async fn run<E>(
        &self,
        operation: &str,
        query: &str,
        extra: &[String],
        cwd: Option<&Path>,
        on_error: E,
    ) -> Result<(), BotError>
    where
        E: Fn(String) -> BotError,
    {
        let mut cmd = Command::new(&self.program);
        cmd.arg(operation)
            .arg(query)
            .args(extra)
            .arg("--client-id")
            .arg(&self.client_id)
            .arg("--client-secret")
            .arg(&self.client_secret)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!(operation, query, "running spotdl");
        let output = cmd.output().await.map_err(|err| on_error(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("spotdl {operation} exited with {}", output.status)
        } else {
            stderr
        };
        Err(on_error(message))
    }
}

/// Resolves a bare program name against `PATH`, the way a shell would.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| program_candidates(&dir, name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(windows)]
fn program_candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(format!("{name}.exe")), dir.join(name)]
}

#[cfg(not(windows))]
fn program_candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn only_executables_count() {
        let temp = tempfile::tempdir().unwrap();
        let plain = temp.path().join("spotdl");
        std::fs::write(&plain, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!is_executable(&plain));

        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable(&plain));
        assert!(!is_executable(temp.path()));
    }
}
