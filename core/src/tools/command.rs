//! Shell execution with a timeout; on timeout the command is promoted to a
//! tracked background process rather than killed (see DESIGN.md for why
//! this diverges from killing the child outright).

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Command;

use crate::tools::background::BackgroundRegistry;
use crate::tools::background::IdAllocator;

pub struct CommandOutcome {
    pub result: String,
}

fn shell_invocation(command: &str) -> (&'static str, Vec<String>) {
    if cfg!(windows) {
        ("cmd.exe", vec!["/c".to_string(), command.to_string()])
    } else {
        ("/bin/sh", vec!["-c".to_string(), command.to_string()])
    }
}

/// Run `command` in `cwd` through the platform shell. If it has not
/// finished after `timeout` it is promoted into `registry` and a
/// `"Backgrounded as: proc_..."` result is returned immediately; output
/// keeps accumulating in the registry entry.
pub async fn run_command(
    command: &str,
    cwd: &Path,
    timeout: Duration,
    registry: &BackgroundRegistry,
    id_allocator: &IdAllocator,
) -> CommandOutcome {
    let (shell, args) = shell_invocation(command);

    let mut cmd = Command::new(shell);
    cmd.args(&args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return CommandOutcome {
                result: format!("Error: {e}"),
            };
        }
    };

    let output: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
    spawn_stream_reader(child.stdout.take(), output.clone());
    spawn_stream_reader(child.stderr.take(), output.clone());

    tokio::select! {
        status = child.wait() => {
            let result = match status {
                Ok(status) => {
                    let captured = output.lock().unwrap_or_else(|e| e.into_inner()).clone();
                    match status.code() {
                        Some(0) => {
                            if captured.is_empty() {
                                "(no output)".to_string()
                            } else {
                                captured
                            }
                        }
                        Some(code) => format!("Exit code {code}\n{captured}"),
                        None => format!("Exit code -1\n{captured}"),
                    }
                }
                Err(e) => format!("Error: {e}"),
            };
            CommandOutcome { result }
        }
        _ = tokio::time::sleep(timeout) => {
            let unix_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            let id = id_allocator.next(unix_ms);
            tracing::debug!(command, id = %id, "command timed out, promoting to background");
            registry.insert(id.clone(), command.to_string(), output, child);
            CommandOutcome {
                result: format!("Command timed out after {}s. Backgrounded as: {id}", timeout.as_secs()),
            }
        }
    }
}

fn spawn_stream_reader<R>(stream: Option<R>, output: Arc<Mutex<String>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut buf = output.lock().unwrap_or_else(|e| e.into_inner());
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(&line);
        }
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_exit_zero_output() {
        let registry = BackgroundRegistry::new();
        let alloc = IdAllocator::default();
        let cwd = std::env::current_dir().expect("cwd");
        let outcome = run_command(
            "echo hello",
            &cwd,
            Duration::from_secs(5),
            &registry,
            &alloc,
        )
        .await;
        assert_eq!(outcome.result, "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_exit_code() {
        let registry = BackgroundRegistry::new();
        let alloc = IdAllocator::default();
        let cwd = std::env::current_dir().expect("cwd");
        let outcome = run_command("exit 1", &cwd, Duration::from_secs(5), &registry, &alloc).await;
        assert!(outcome.result.contains("Exit code"));
    }

    #[tokio::test]
    async fn timeout_promotes_to_background() {
        let registry = BackgroundRegistry::new();
        let alloc = IdAllocator::default();
        let cwd = std::env::current_dir().expect("cwd");
        let outcome = run_command(
            "sleep 2",
            &cwd,
            Duration::from_millis(50),
            &registry,
            &alloc,
        )
        .await;
        assert!(outcome.result.contains("Backgrounded as: proc_"));
        assert!(registry.list().contains("proc_"));
    }
}
