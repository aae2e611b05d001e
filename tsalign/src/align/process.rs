//! Child process execution with output forwarded to tracing.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Lines of stderr kept for error reporting.
const STDERR_TAIL_LINES: usize = 20;

/// Output from a command execution.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub duration_secs: f64,
    /// Last lines the process wrote to stderr.
    pub stderr_tail: Vec<String>,
}

/// Run `command` to completion, logging its stdout and stderr lines against `item_id`.
pub async fn run_command_with_logs(
    command: &mut Command,
    item_id: &str,
) -> std::io::Result<CommandOutput> {
    let start = std::time::Instant::now();

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;

    let stdout_handle = child.stdout.take().map(|stdout| {
        let item_id = item_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(item_id = %item_id, "stdout: {}", line);
            }
        })
    });

    let stderr_handle = child.stderr.take().map(|stderr| {
        let item_id = item_id.to_string();
        tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.to_lowercase().contains("error") {
                    warn!(item_id = %item_id, "stderr: {}", line);
                } else {
                    debug!(item_id = %item_id, "stderr: {}", line);
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        })
    });

    let status = child.wait().await?;

    if let Some(handle) = stdout_handle {
        let _ = handle.await;
    }
    let stderr_tail = match stderr_handle {
        Some(handle) => handle.await.map(Vec::from).unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(CommandOutput {
        status,
        duration_secs: start.elapsed().as_secs_f64(),
        stderr_tail,
    })
}
