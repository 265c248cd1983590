use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::AgentError;

/// Stderr kept for error reports; older output is dropped.
const STDERR_CAP: usize = 16 * 1024;

// ─── AgentProcess ─────────────────────────────────────────────────────────

/// What a finished agent process left behind.
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub status: ExitStatus,
    /// Every stdout line, in order, without trailing newlines.
    pub lines: Vec<String>,
    pub stderr: String,
}

/// Run `cmd` to completion, feeding `stdin` and streaming stdout.
///
/// Each stdout line is appended (and flushed) to `raw_path` as it arrives, so
/// a killed process still leaves its partial transcript on disk. Stderr is
/// drained by a background task. On timeout the child is killed and
/// [`AgentError::Timeout`] is returned.
pub(crate) async fn run_streaming(
    mut cmd: Command,
    stdin: Vec<u8>,
    raw_path: &Path,
    timeout: Duration,
) -> Result<ProcessOutput, AgentError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AgentError::Unavailable(e.to_string())
        } else {
            AgentError::Io(e)
        }
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AgentError::Io(std::io::Error::other("stdout not captured")))?;

    // Writing stdin from its own task keeps a chatty child from deadlocking
    // against a full stdout pipe.
    if let Some(mut pipe) = child.stdin.take() {
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&stdin).await {
                tracing::debug!(error = %e, "agent closed stdin early");
            }
            // dropping the pipe closes stdin
        });
    }

    let stderr_buf = Arc::new(Mutex::new(String::new()));
    let stderr_task = child.stderr.take().map(|stderr| {
        let buf = Arc::clone(&stderr_buf);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Ok(mut b) = buf.lock() {
                    if !b.is_empty() {
                        b.push('\n');
                    }
                    b.push_str(&line);
                    if b.len() > STDERR_CAP {
                        let cut = b.len() - STDERR_CAP;
                        let cut = (cut..b.len()).find(|i| b.is_char_boundary(*i)).unwrap_or(0);
                        b.drain(..cut);
                    }
                }
            }
        })
    });

    let mut raw = tokio::fs::File::create(raw_path).await?;
    let mut lines = Vec::new();

    let streamed = tokio::time::timeout(timeout, async {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            raw.write_all(&buf).await?;
            if buf.last() != Some(&b'\n') {
                raw.write_all(b"\n").await?;
            }
            raw.flush().await?;
            let line = String::from_utf8_lossy(&buf);
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        child.wait().await
    })
    .await;

    let status = match streamed {
        Ok(status) => status?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to kill timed-out agent");
            }
            raw.flush().await?;
            tracing::warn!(
                seconds = timeout.as_secs(),
                lines = lines.len(),
                raw_path = %raw_path.display(),
                "agent timed out"
            );
            return Err(AgentError::Timeout {
                seconds: timeout.as_secs(),
                raw_path: raw_path.to_path_buf(),
            });
        }
    };

    // Grandchildren may hold stderr open; don't wait on them forever.
    if let Some(task) = stderr_task {
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    }
    let stderr = stderr_buf.lock().map(|b| b.clone()).unwrap_or_default();

    Ok(ProcessOutput {
        status,
        lines,
        stderr,
    })
}
