// src/exec/command.rs

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::stream::record::ProcessEvent;

/// Spawn `command` through the platform shell and stream its output as
/// [`ProcessEvent`]s.
///
/// The returned receiver yields one event per output line, followed by
/// exactly one terminal event: `Exited` once the process has been waited on
/// (with both output streams fully drained first), or `SpawnFailed` if the
/// process never started. The receiver is what gets bound to a
/// [`CorrelationRegistry`](crate::stream::CorrelationRegistry) channel.
pub fn spawn_shell(command: &str) -> mpsc::Receiver<ProcessEvent> {
    let (tx, rx) = mpsc::channel::<ProcessEvent>(64);

    info!(cmd = %command, "starting shell process");

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            tokio::spawn(async move {
                let _ = tx.send(ProcessEvent::SpawnFailed(err.to_string())).await;
            });
            return rx;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    tokio::spawn(async move {
        let stdout_pump = pump_lines(stdout, tx.clone(), ProcessEvent::Stdout);
        let stderr_pump = pump_lines(stderr, tx.clone(), ProcessEvent::Stderr);

        let (status, _, _) = tokio::join!(child.wait(), stdout_pump, stderr_pump);

        let code = match status {
            Ok(status) => status.code(),
            Err(err) => {
                debug!(error = %err, "waiting on shell process failed");
                None
            }
        };
        let _ = tx.send(ProcessEvent::Exited(code)).await;
    });

    rx
}

/// Forward each line of `stream` as an event built by `make_event`, until the
/// stream closes. Consuming both pipes keeps the child from blocking on a
/// full buffer.
async fn pump_lines<R>(
    stream: Option<R>,
    tx: mpsc::Sender<ProcessEvent>,
    make_event: fn(String) -> ProcessEvent,
) where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return;
    };
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(make_event(line)).await.is_err() {
            return;
        }
    }
}
