//! External tool invocation with deadlines.

use crate::error::{EngineError, EngineResult};
use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Timeout for ffprobe calls.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for ImageMagick convert/identify.
pub const IMAGE_CONVERT_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for single-frame extraction.
pub const FRAME_EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for preview chunk extraction and audio transcodes.
pub const CHUNK_EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for lossless chunk concatenation.
pub const CONCAT_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for LibreOffice document conversion.
pub const OFFICE_CONVERT_TIMEOUT: Duration = Duration::from_secs(120);

/// Cap on captured tool stderr, to keep logs bounded.
const MAX_STDERR: usize = 500;

/// Truncate tool output for logging and error messages.
pub fn truncate_output(output: &[u8]) -> String {
    let s = String::from_utf8_lossy(output);
    if s.len() > MAX_STDERR {
        let mut end = MAX_STDERR;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &s[..end])
    } else {
        s.into_owned()
    }
}

/// Run `tool` with `args` under `timeout`, returning its stdout.
///
/// The child is spawned with kill-on-drop, so both deadline expiry and
/// caller cancellation (client disconnect) terminate the process.
pub async fn run_tool<S: AsRef<OsStr>>(
    tool: &'static str,
    args: &[S],
    timeout: Duration,
) -> EngineResult<Vec<u8>> {
    debug!(tool, timeout_secs = timeout.as_secs(), "running external tool");

    let child = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::Tool {
                    tool,
                    stderr: format!("{tool} not found in PATH"),
                }
            } else {
                EngineError::Io(e)
            }
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(EngineError::Timeout {
                tool,
                seconds: timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        return Err(EngineError::Tool {
            tool,
            stderr: truncate_output(&output.stderr),
        });
    }

    Ok(output.stdout)
}

/// Remove a partial output file, ignoring errors for files that never
/// materialized.
pub async fn remove_partial(path: &std::path::Path) {
    let _ = tokio::fs::remove_file(path).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_output() {
        let long = vec![b'x'; 2000];
        let s = truncate_output(&long);
        assert!(s.ends_with("... (truncated)"));
        assert!(s.len() < 600);
    }

    #[test]
    fn keeps_short_output() {
        assert_eq!(truncate_output(b"fine"), "fine");
    }

    #[tokio::test]
    async fn missing_tool_is_a_tool_error() {
        let err = run_tool::<&str>("refract-no-such-tool", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Tool { .. }));
    }

    #[tokio::test]
    async fn deadline_expiry_is_timeout() {
        let err = run_tool("sleep", &["5"], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
    }
}
