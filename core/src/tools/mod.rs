pub mod background;
pub mod command;
pub mod fs;

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;

use crate::parser::ToolCall;
use crate::parser::extract_code_block;
use crate::parser::extract_find_replace;
use crate::parser::extract_path;
use background::BackgroundRegistry;
use background::IdAllocator;

pub struct ToolContext<'a> {
    pub cwd: &'a Path,
    pub automated: bool,
    pub command_timeout: Duration,
    pub background: &'a BackgroundRegistry,
    pub id_allocator: &'a IdAllocator,
}

/// A pure switch over the parsed tool name. All eleven recognized names
/// are handled; `DONE` is defined here for completeness even though the
/// agent loop intercepts it before it reaches this dispatcher in the
/// normal path.
pub async fn dispatch(call: &ToolCall, ctx: &ToolContext<'_>) -> String {
    match call.name.as_str() {
        "LIST_DIRECTORY" => fs::list_directory(ctx.cwd, &call.input),
        "READ_FILE" => {
            let path = extract_path(&call.input);
            fs::read_file(ctx.cwd, &path)
        }
        "WRITE_FILE" => {
            let path = extract_path(&call.input);
            match extract_code_block(&call.input) {
                Some(content) => fs::write_file(ctx.cwd, &path, &content),
                None => "ERROR: No code block found for WRITE_FILE".to_string(),
            }
        }
        "FIND_AND_REPLACE_IN_FILE" => {
            let path = extract_path(&call.input);
            match extract_find_replace(&call.input) {
                Some((find, replace)) => fs::find_and_replace(ctx.cwd, &path, &find, &replace),
                None => "ERROR: No find/replace blocks found for FIND_AND_REPLACE_IN_FILE".to_string(),
            }
        }
        "COMMAND" => {
            let command_input = crate::parser::extract_command_input(&call.input);
            let outcome = command::run_command(
                &command_input,
                ctx.cwd,
                ctx.command_timeout,
                ctx.background,
                ctx.id_allocator,
            )
            .await;
            outcome.result
        }
        "UPDATE_TASK_LIST" => "Task list updated".to_string(),
        "ASK_USER" => ask_user(&call.input, ctx.automated).await,
        "DONE" => {
            let summary = call.input.trim();
            if summary.is_empty() {
                "No summary provided".to_string()
            } else {
                summary.to_string()
            }
        }
        "READ_BACKGROUND_PROCESS" => {
            let id = extract_path(&call.input);
            ctx.background.read(&id)
        }
        "LIST_BACKGROUND_PROCESSES" => ctx.background.list(),
        "KILL_BACKGROUND_PROCESS" => {
            let id = extract_path(&call.input);
            ctx.background.kill(&id).await
        }
        other => format!("ERROR: Unknown tool: {other}"),
    }
}

async fn ask_user(prompt: &str, automated: bool) -> String {
    if automated {
        return "ERROR: ASK_USER is disabled in automated mode (-p)".to_string();
    }
    let mut stdout = tokio::io::stdout();
    let _ = stdout.write_all(prompt.as_bytes()).await;
    let _ = stdout.write_all(b"\n> ").await;
    let _ = stdout.flush().await;

    let mut line = String::new();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    match stdin.read_line(&mut line).await {
        Ok(0) | Err(_) => "(no response)".to_string(),
        Ok(_) => {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                "(no response)".to_string()
            } else {
                trimmed.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;

    fn ctx<'a>(cwd: &'a Path, registry: &'a BackgroundRegistry, alloc: &'a IdAllocator) -> ToolContext<'a> {
        ToolContext {
            cwd,
            automated: true,
            command_timeout: Duration::from_secs(5),
            background: registry,
            id_allocator: alloc,
        }
    }

    #[tokio::test]
    async fn write_file_requires_code_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = BackgroundRegistry::new();
        let alloc = IdAllocator::default();
        let call = ToolCall {
            name: "WRITE_FILE".to_string(),
            input: "\"a.txt\"\nno code block here".to_string(),
        };
        let result = dispatch(&call, &ctx(dir.path(), &registry, &alloc)).await;
        assert_eq!(result, "ERROR: No code block found for WRITE_FILE");
    }

    #[tokio::test]
    async fn ask_user_disabled_in_automated_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = BackgroundRegistry::new();
        let alloc = IdAllocator::default();
        let call = ToolCall {
            name: "ASK_USER".to_string(),
            input: "question?".to_string(),
        };
        let result = dispatch(&call, &ctx(dir.path(), &registry, &alloc)).await;
        assert_eq!(result, "ERROR: ASK_USER is disabled in automated mode (-p)");
    }

    #[tokio::test]
    async fn update_task_list_returns_fixed_string() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = BackgroundRegistry::new();
        let alloc = IdAllocator::default();
        let call = ToolCall {
            name: "UPDATE_TASK_LIST".to_string(),
            input: String::new(),
        };
        let result = dispatch(&call, &ctx(dir.path(), &registry, &alloc)).await;
        assert_eq!(result, "Task list updated");
    }

    #[tokio::test]
    async fn done_returns_summary_or_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = BackgroundRegistry::new();
        let alloc = IdAllocator::default();
        let call = ToolCall {
            name: "DONE".to_string(),
            input: "   ".to_string(),
        };
        let result = dispatch(&call, &ctx(dir.path(), &registry, &alloc)).await;
        assert_eq!(result, "No summary provided");
    }
}
