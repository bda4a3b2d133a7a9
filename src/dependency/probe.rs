//! Executable probes: "does this binary run, and which version is it".

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Upper bound for one version probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs a binary's version command.
#[async_trait]
pub trait BinaryProbe: Send + Sync {
    /// Returns the first line of the version output, or a reason it failed.
    async fn probe(&self, path: &Path, version_arg: &str) -> Result<String, String>;
}

/// [`BinaryProbe`] that executes the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandProbe;

#[async_trait]
impl BinaryProbe for CommandProbe {
    async fn probe(&self, path: &Path, version_arg: &str) -> Result<String, String> {
        let mut command = Command::new(path);
        command
            .arg(version_arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(PROBE_TIMEOUT, command.output())
            .await
            .map_err(|_| format!("no answer within {}s", PROBE_TIMEOUT.as_secs()))?
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(format!("exited with {}", output.status));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

/// Finds an executable by name on `PATH`.
#[must_use]
pub fn find_on_path(executable: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(executable))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_find_on_path_misses_unknown_binary() {
        assert!(find_on_path("unidl-definitely-not-installed").is_none());
    }

    #[tokio::test]
    async fn test_probe_missing_binary_fails() {
        let result = CommandProbe
            .probe(Path::new("/nonexistent/ffmpeg"), "-version")
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_reads_first_line() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("tool");
        std::fs::write(&script, "#!/bin/sh\necho \"tool version 1.2\"\necho second\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let version = CommandProbe.probe(&script, "--version").await.unwrap();
        assert_eq!(version, "tool version 1.2");
    }
}
