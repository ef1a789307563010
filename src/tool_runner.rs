//! Scoped external-process primitive for screenshot CLI tools.
//!
//! Every tool invocation follows the same contract: a uniquely named temp
//! output file, redirected output streams, a bounded wait, forced termination
//! on timeout, and unconditional temp-file deletion on every exit path. Tools
//! that are not installed surface as [`CaptureError::Unavailable`] so the
//! waterfall advances silently.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::process::Command;

use crate::pixels::decode_image_file;
use crate::types::{Bitmap, CaptureError};

/// Builds a unique path under the system temp directory. The random
/// component keeps concurrent capture calls from colliding.
pub(crate) fn unique_temp_path(prefix: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "shotfall_{prefix}_{}.{extension}",
        uuid::Uuid::new_v4().simple()
    ))
}

/// Deletes its path when dropped. Ensures temp files never outlive a capture
/// call regardless of which exit path is taken.
pub(crate) struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove temp file {}: {}", self.path.display(), e);
            } else {
                trace!("Removed temp file {}", self.path.display());
            }
        }
    }
}

/// Spawns `program args...`, waits up to `timeout`, and reports the exit
/// status. The process is killed if the timeout elapses; output streams are
/// never inherited.
pub(crate) async fn run_process(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<std::process::ExitStatus, CaptureError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => Ok(status?),
        Err(_) => {
            warn!("{program} exceeded {}ms, killing it", timeout.as_millis());
            if let Err(e) = child.kill().await {
                warn!("Failed to kill timed-out {program}: {e}");
            }
            Err(CaptureError::Timeout(format!("{program} to exit")))
        }
    }
}

/// Spawns `program args...` with stdout captured, waits up to `timeout`, and
/// returns the trimmed stdout on a zero exit. Used for selection helpers that
/// print geometry instead of writing a file.
pub(crate) async fn run_process_capture_stdout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, CaptureError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            // wait_with_output consumed the child; dropping the future on
            // timeout leaves the kill-on-drop child to be reaped.
            warn!("{program} exceeded {}ms", timeout.as_millis());
            return Err(CaptureError::Timeout(format!("{program} to exit")));
        }
    };

    if !output.status.success() {
        return Err(CaptureError::Tool(format!(
            "{program} exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Runs a screenshot tool that writes its output to a file path we supply,
/// then decodes the file. The temp file is deleted on every exit path,
/// including decode failure.
pub(crate) async fn run_capture_tool(
    program: &str,
    args_prefix: &[&str],
    timeout: Duration,
) -> Result<Bitmap, CaptureError> {
    let artifact = TempArtifact::new(unique_temp_path(program, "png"));
    let output_path = artifact.path().to_string_lossy().into_owned();
    let mut args: Vec<&str> = args_prefix.to_vec();
    args.push(&output_path);

    let status = run_process(program, &args, timeout).await?;
    if !status.success() {
        return Err(CaptureError::Tool(format!(
            "{program} exited with {status}"
        )));
    }
    if !artifact.path().exists() {
        return Err(CaptureError::Tool(format!(
            "{program} exited cleanly but wrote no output file"
        )));
    }

    debug!("Screenshot captured with {program}");
    let path = artifact.path().to_path_buf();
    let decoded = tokio::task::spawn_blocking(move || decode_image_file(&path))
        .await
        .map_err(|e| CaptureError::Tool(format!("decode task for {program} failed: {e}")))?;
    decoded
}

fn spawn_error(program: &str, error: std::io::Error) -> CaptureError {
    if error.kind() == std::io::ErrorKind::NotFound {
        CaptureError::Unavailable(format!("{program} is not installed"))
    } else {
        CaptureError::Io(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn temp_paths_never_collide() {
        let a = unique_temp_path("test", "png");
        let b = unique_temp_path("test", "png");
        assert_ne!(a, b);
    }

    #[test]
    fn temp_artifact_removes_file_on_drop() {
        let path = unique_temp_path("artifact", "png");
        std::fs::write(&path, b"data").unwrap();
        {
            let _artifact = TempArtifact::new(path.clone());
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        init_logging();
        let err = run_capture_tool(
            "shotfall-no-such-tool",
            &[],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable(_)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_tool_failure() {
        let err = run_process("false", &[], Duration::from_secs(5)).await;
        assert!(err.is_ok_and(|status| !status.success()));
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        init_logging();
        let started = std::time::Instant::now();
        let err = run_process("sleep", &["30"], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stdout_capture_trims_output() {
        let out = run_process_capture_stdout("echo", &["  10 20 30 40  "], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "10 20 30 40");
    }
}
