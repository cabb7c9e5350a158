//! Subprocess execution for the media tools.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Lines of stderr kept for error reporting.
const STDERR_TAIL: usize = 20;

/// Run a media tool to completion.
///
/// Both output pipes are drained concurrently with the wait so the child can
/// never stall on a full pipe buffer. Non-zero exit becomes [`Error::EncodeFailed`]
/// carrying the exit code and the stderr tail.
pub async fn run_tool(tool: &'static str, command: &mut Command) -> Result<()> {
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| Error::other(format!("failed to spawn {tool}: {e}")))?;

    let stdout_task = child.stdout.take().map(|stdout| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(tool, "stdout: {line}");
            }
        })
    });

    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut tail = std::collections::VecDeque::with_capacity(STDERR_TAIL);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(tool, "stderr: {line}");
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        })
    });

    let status = child
        .wait()
        .await
        .map_err(|e| Error::other(format!("failed to wait for {tool}: {e}")))?;

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    let stderr = match stderr_task {
        Some(task) => task
            .await
            .map(|tail| tail.into_iter().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() {
        return Err(Error::EncodeFailed {
            tool,
            code: status.code().unwrap_or(-1),
            stderr,
        });
    }
    Ok(())
}
