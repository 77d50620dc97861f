//! In-memory table of promoted (timed-out) commands. Process-local only --
//! nothing here is persisted across invocations. Shared state is threaded
//! through the loop as an injected service rather than kept behind a
//! `static`, so the registry can be constructed fresh per run (and per
//! test) instead of leaking process-wide mutable state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use tokio::process::Child;

struct BackgroundEntry {
    command: String,
    output: Arc<Mutex<String>>,
    exit_code: Arc<Mutex<Option<i32>>>,
    started_at: Instant,
    child: Arc<tokio::sync::Mutex<Child>>,
}

#[derive(Clone, Default)]
pub struct BackgroundRegistry {
    entries: Arc<Mutex<HashMap<String, BackgroundEntry>>>,
}

/// Monotonic counter used to build `proc_<base36 counter><last 4 base36
/// unix-ms chars>` ids.
#[derive(Default)]
pub struct IdAllocator {
    counter: std::sync::atomic::AtomicU64,
}

impl IdAllocator {
    pub fn next(&self, unix_ms: u128) -> String {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let counter_b36 = to_base36(n as u128);
        let ms_b36 = to_base36(unix_ms);
        let ms_suffix: String = ms_b36.chars().rev().take(4).collect::<String>().chars().rev().collect();
        format!("proc_{counter_b36}{ms_suffix}")
    }
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_else(|_| "0".to_string())
}

impl BackgroundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly promoted command and spawn the watcher task that
    /// records its exit code once it finally exits. Output accumulation
    /// into `output` is the caller's responsibility (two reader tasks
    /// already spawned against the child's piped stdout/stderr).
    pub fn insert(
        &self,
        id: String,
        command: String,
        output: Arc<Mutex<String>>,
        child: Child,
    ) {
        let exit_code = Arc::new(Mutex::new(None));
        let child = Arc::new(tokio::sync::Mutex::new(child));

        let entry = BackgroundEntry {
            command,
            output,
            exit_code: exit_code.clone(),
            started_at: Instant::now(),
            child: child.clone(),
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, entry);

        tokio::spawn(async move {
            loop {
                let status = {
                    let mut guard = child.lock().await;
                    guard.try_wait()
                };
                match status {
                    Ok(Some(status)) => {
                        let code = status.code().unwrap_or(-1);
                        *exit_code.lock().unwrap_or_else(|e| e.into_inner()) = Some(code);
                        break;
                    }
                    Ok(None) => {
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    }
                    Err(_) => break,
                }
            }
        });
    }

    pub fn read(&self, id: &str) -> String {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = entries.get(id) else {
            return format!("Process not found: {id}");
        };
        let status = match *entry.exit_code.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(code) => format!("Exited ({code})"),
            None => "Running".to_string(),
        };
        let output = entry.output.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let output = if output.is_empty() {
            "(no output yet)".to_string()
        } else {
            output
        };
        format!("[{id}] {status}\nCommand: {}\n\n{output}", entry.command)
    }

    pub fn list(&self) -> String {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.is_empty() {
            return "No background processes".to_string();
        }
        let mut lines: Vec<(String, String)> = Vec::new();
        for (id, entry) in entries.iter() {
            let status = match *entry.exit_code.lock().unwrap_or_else(|e| e.into_inner()) {
                Some(code) => format!("Exited ({code})"),
                None => "Running".to_string(),
            };
            let age = entry.started_at.elapsed().as_secs();
            let truncated = truncate_with_ellipsis(&entry.command, 50);
            lines.push((
                id.clone(),
                format!("{id}: {status} ({age}s) - {truncated}"),
            ));
        }
        lines.sort_by(|a, b| a.0.cmp(&b.0));
        lines
            .into_iter()
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn kill(&self, id: &str) -> String {
        let (already_exited, child) = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = entries.get(id) else {
                return format!("Process not found: {id}");
            };
            let already_exited = *entry.exit_code.lock().unwrap_or_else(|e| e.into_inner());
            (already_exited, entry.child.clone())
        };
        if let Some(code) = already_exited {
            return format!("Process already exited with code {code}");
        }
        let mut guard = child.lock().await;
        match guard.start_kill() {
            Ok(()) => format!("Process {id} killed"),
            Err(e) => {
                tracing::warn!(id, error = %e, "failed to kill background process");
                format!("Failed to kill process: {e}")
            }
        }
    }
}

fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_adds_ellipsis_past_limit() {
        assert_eq!(truncate_with_ellipsis("short", 50), "short");
        let long = "x".repeat(60);
        let truncated = truncate_with_ellipsis(&long, 50);
        assert_eq!(truncated.len(), 53);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn id_allocator_produces_distinct_ids() {
        let alloc = IdAllocator::default();
        let a = alloc.next(1_700_000_000_123);
        let b = alloc.next(1_700_000_000_124);
        assert_ne!(a, b);
        assert!(a.starts_with("proc_"));
    }

    #[test]
    fn missing_entry_reports_not_found() {
        let registry = BackgroundRegistry::new();
        assert_eq!(registry.read("proc_x"), "Process not found: proc_x");
        assert_eq!(registry.list(), "No background processes");
    }
}
