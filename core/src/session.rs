use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::config;
use crate::error::DevError;
use crate::error::Result;

const DIRECTORY_MAP_FILE: &str = "directory-map.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub status: TaskStatus,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionRecord {
    pub timestamp: String,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub working_directory: PathBuf,
    pub original_prompt: String,
    pub task_list: Vec<TaskItem>,
    pub history: Vec<Message>,
    pub total_tokens: u64,
    pub compressions: Vec<CompressionRecord>,
}

impl Session {
    pub fn new(working_directory: PathBuf, original_prompt: String) -> Self {
        let now = now_iso8601();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now.clone(),
            updated_at: now,
            working_directory,
            original_prompt,
            task_list: Vec::new(),
            history: Vec::new(),
            total_tokens: 0,
            compressions: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_iso8601();
    }

    /// Ensure `history[0]` is a system message, prepending one if absent or
    /// if history is empty (spec invariant: "If the history is nonempty,
    /// its first element has role `system`; the loop prepends one if
    /// missing.").
    pub fn ensure_system_prompt(&mut self, system_prompt: impl Into<String>) {
        match self.history.first() {
            Some(m) if m.role == Role::System => {}
            _ => self.history.insert(0, Message::system(system_prompt)),
        }
    }

    pub fn recompute_total_tokens(&mut self) {
        let total: usize = self
            .history
            .iter()
            .map(|m| crate::util::estimate_tokens(&m.content))
            .sum();
        self.total_tokens = total as u64;
    }
}

fn now_iso8601() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Parse a task-list line of the form `[<c>] <text>`. Unknown status
/// characters cause the caller to ignore the line.
pub fn parse_task_line(line: &str) -> Option<TaskItem> {
    let line = line.trim_start();
    let rest = line.strip_prefix('[')?;
    let mut chars = rest.chars();
    let status_char = chars.next()?;
    let rest = chars.as_str();
    let rest = rest.strip_prefix(']')?;
    let text = rest.trim_start().to_string();
    let status = match status_char {
        'x' | 'X' => TaskStatus::Complete,
        '~' => TaskStatus::InProgress,
        ' ' => TaskStatus::Pending,
        _ => return None,
    };
    Some(TaskItem { status, text })
}

/// File-per-session JSON store under the config directory, plus the
/// directory-to-session map used by `--resume`.
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    pub fn new(sessions_dir: PathBuf) -> Self {
        Self { sessions_dir }
    }

    pub fn from_config_dir() -> Result<Self> {
        Ok(Self::new(config::sessions_dir()?))
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.json"))
    }

    fn directory_map_path(&self) -> PathBuf {
        self.sessions_dir.join(DIRECTORY_MAP_FILE)
    }

    /// Full-file overwrite, pretty-printed. The session file is the single
    /// source of truth between runs.
    pub fn save(&self, session: &Session) -> Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)?;
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(self.session_path(&session.id), json)?;
        self.record_directory(&session.working_directory, &session.id)?;
        tracing::debug!(session_id = %session.id, total_tokens = session.total_tokens, "saved session");
        Ok(())
    }

    /// Tolerates malformed files by returning `None` rather than erroring;
    /// a single corrupt session file must never crash the process.
    pub fn load(&self, id: &str) -> Option<Session> {
        let raw = std::fs::read_to_string(self.session_path(id)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn require(&self, id: &str) -> Result<Session> {
        self.load(id)
            .ok_or_else(|| DevError::SessionNotFound(id.to_string()))
    }

    /// Enumerates `*.json` (excluding the directory map), sorted descending
    /// by `updatedAt`.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.sessions_dir) else {
            return sessions;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some(DIRECTORY_MAP_FILE) {
                continue;
            }
            if let Ok(raw) = std::fs::read_to_string(&path)
                && let Ok(session) = serde_json::from_str::<Session>(&raw)
            {
                sessions.push(session);
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    fn load_directory_map(&self) -> HashMap<String, String> {
        std::fs::read_to_string(self.directory_map_path())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn record_directory(&self, working_directory: &Path, session_id: &str) -> Result<()> {
        let mut map = self.load_directory_map();
        map.insert(
            working_directory.to_string_lossy().to_string(),
            session_id.to_string(),
        );
        std::fs::create_dir_all(&self.sessions_dir)?;
        std::fs::write(self.directory_map_path(), serde_json::to_string_pretty(&map)?)?;
        Ok(())
    }

    pub fn last_session_for(&self, working_directory: &Path) -> Option<String> {
        let map = self.load_directory_map();
        map.get(&working_directory.to_string_lossy().to_string())
            .cloned()
    }

    /// Deletes session files whose `updatedAt` is older than
    /// `retention_days * 86400` seconds. Run once at CLI startup.
    pub fn sweep_expired(&self, retention_days: u64) {
        let cutoff = OffsetDateTime::now_utc() - time::Duration::days(retention_days as i64);
        let Ok(entries) = std::fs::read_dir(&self.sessions_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some(DIRECTORY_MAP_FILE) {
                continue;
            }
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(session) = serde_json::from_str::<Session>(&raw) else {
                continue;
            };
            let Ok(updated_at) = OffsetDateTime::parse(&session.updated_at, &Rfc3339) else {
                continue;
            };
            if updated_at < cutoff {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;

    #[test]
    fn task_line_parsing_normalizes_status() {
        assert_eq!(
            parse_task_line("[x] done thing").map(|t| t.status),
            Some(TaskStatus::Complete)
        );
        assert_eq!(
            parse_task_line("[X] done thing").map(|t| t.status),
            Some(TaskStatus::Complete)
        );
        assert_eq!(
            parse_task_line("[~] in progress").map(|t| t.status),
            Some(TaskStatus::InProgress)
        );
        assert_eq!(
            parse_task_line("[ ] todo").map(|t| t.status),
            Some(TaskStatus::Pending)
        );
        assert_eq!(parse_task_line("[?] unknown"), None);
        assert_eq!(parse_task_line("not a task line"), None);
    }

    #[test]
    fn ensure_system_prompt_prepends_when_missing() {
        let mut session = Session::new(PathBuf::from("/tmp"), "do it".into());
        session.history.push(Message::user("hi"));
        session.ensure_system_prompt("sys");
        assert_eq!(session.history[0].role, Role::System);
        assert_eq!(session.history[0].content, "sys");
        assert_eq!(session.history.len(), 2);

        // Second call is a no-op: system message already present.
        session.ensure_system_prompt("sys2");
        assert_eq!(session.history[0].content, "sys");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().to_path_buf());
        let mut session = Session::new(dir.path().to_path_buf(), "build a thing".into());
        session.history.push(Message::user("hello"));
        store.save(&session).expect("save");

        let loaded = store.require(&session.id).expect("load");
        assert_eq!(loaded, session);
        assert_eq!(
            store.last_session_for(&session.working_directory),
            Some(session.id.clone())
        );
    }

    #[test]
    fn corrupt_session_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().to_path_buf());
        std::fs::write(dir.path().join("garbage.json"), b"{not json").expect("write");
        assert!(store.load("garbage").is_none());
        assert!(store.list().is_empty());
    }

    #[test]
    fn list_sorts_descending_by_updated_at() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().to_path_buf());
        let mut older = Session::new(dir.path().to_path_buf(), "first".into());
        older.updated_at = "2020-01-01T00:00:00Z".into();
        let mut newer = Session::new(dir.path().to_path_buf(), "second".into());
        newer.updated_at = "2024-01-01T00:00:00Z".into();
        store.save(&older).expect("save older");
        store.save(&newer).expect("save newer");

        let sessions = store.list();
        assert_eq!(sessions[0].id, newer.id);
        assert_eq!(sessions[1].id, older.id);
    }
}
