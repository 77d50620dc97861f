//! Independent, read-only verification pass triggered by `DONE`. Runs a
//! second agent configured with a restricted tool set against a read-only
//! system prompt; never mutates the session's own history.

use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::llm::LlmClient;
use crate::parser;
use crate::session::Session;
use crate::session::TaskItem;
use crate::session::TaskStatus;
use crate::tools::background::BackgroundRegistry;
use crate::tools::background::IdAllocator;
use crate::tools::fs;

const MAX_AUDIT_ITERATIONS: u32 = 20;

const AUDIT_SYSTEM_PROMPT: &str = "\
You are an independent auditor reviewing the work of another coding \
agent. You may only inspect the filesystem and run a small set of \
read-only, diagnostic shell commands -- you must never write files or \
run commands that mutate state. Use the same Agent Response envelope \
the primary agent uses. When you are confident in your verdict, call \
DONE with a summary beginning with the line `Overall: PASS` or \
`Overall: FAIL`, followed by any feedback the agent should address.";

const ALLOWED_COMMAND_PREFIXES: &[&str] = &["cat ", "head ", "tail ", "ls", "dir", "tree", "type "];

fn is_command_allowed(command: &str) -> bool {
    let trimmed = command.trim();
    if ALLOWED_COMMAND_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
    {
        return true;
    }
    if let Some(rest) = trimmed.strip_prefix("git ") {
        let rest = rest.trim_start();
        return rest.starts_with("status") || rest.starts_with("diff") || rest.starts_with("log");
    }
    if let Some(rest) = trimmed.strip_prefix("npm ") {
        let rest = rest.trim_start();
        return rest.starts_with("test") || rest.starts_with("run build");
    }
    false
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditVerdict {
    pub pass: bool,
    pub feedback: String,
}

fn render_task_list(tasks: &[TaskItem]) -> String {
    tasks
        .iter()
        .map(|t| {
            let marker = match t.status {
                TaskStatus::Complete => "x",
                TaskStatus::InProgress => "~",
                TaskStatus::Pending => " ",
            };
            format!("[{marker}] {}", t.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn infer_verdict_from_unparseable(text: &str) -> Option<AuditVerdict> {
    let lower = text.to_lowercase();
    if lower.contains("overall: pass") {
        Some(AuditVerdict {
            pass: true,
            feedback: String::new(),
        })
    } else if lower.contains("overall: fail") {
        Some(AuditVerdict {
            pass: false,
            feedback: text.trim().to_string(),
        })
    } else {
        None
    }
}

fn verdict_from_done_input(input: &str) -> AuditVerdict {
    let pass = !input.to_lowercase().contains("fail");
    AuditVerdict {
        pass,
        feedback: input.trim().to_string(),
    }
}

pub async fn run_audit(
    llm: &LlmClient,
    session: &Session,
    done_summary: &str,
    command_timeout: Duration,
) -> Result<AuditVerdict> {
    let cwd: &Path = &session.working_directory;
    let registry = BackgroundRegistry::new();
    let id_allocator = IdAllocator::default();

    let initial_user_message = format!(
        "Original request:\n{}\n\nFinal task list:\n{}\n\nAgent's completion summary:\n{}",
        session.original_prompt,
        render_task_list(&session.task_list),
        done_summary,
    );

    let mut messages: Vec<(String, String)> = vec![
        ("system".to_string(), AUDIT_SYSTEM_PROMPT.to_string()),
        ("user".to_string(), initial_user_message),
    ];

    for _ in 0..MAX_AUDIT_ITERATIONS {
        let response = llm.stream_completion(&messages, true).await?;

        let Some(parsed) = parser::parse(&response) else {
            if let Some(verdict) = infer_verdict_from_unparseable(&response) {
                return Ok(verdict);
            }
            // Conservatively PASS when neither phrase is present, per the
            // spec's explicit fallback for a malformed auditor response.
            return Ok(AuditVerdict {
                pass: true,
                feedback: String::new(),
            });
        };

        messages.push(("assistant".to_string(), parsed.raw.clone()));

        let mut results = Vec::new();
        for tool in &parsed.tools {
            if tool.name == "DONE" {
                return Ok(verdict_from_done_input(&tool.input));
            }
            let result = execute_audit_tool(tool, cwd, command_timeout, &registry, &id_allocator).await;
            let is_error = result.starts_with("ERROR");
            results.push(format!("[{}]: {result}", tool.name));
            if is_error {
                break;
            }
        }
        if !results.is_empty() {
            messages.push((
                "user".to_string(),
                format!("Tool results:\n{}", results.join("\n")),
            ));
        }
    }

    // Redesign decision (documented in DESIGN.md): FAIL on exhaustion
    // rather than the source's PASS-on-exhaustion default.
    Ok(AuditVerdict {
        pass: false,
        feedback: "Audit exhausted its iteration budget without reaching a verdict.".to_string(),
    })
}

async fn execute_audit_tool(
    tool: &parser::ToolCall,
    cwd: &Path,
    command_timeout: Duration,
    registry: &BackgroundRegistry,
    id_allocator: &IdAllocator,
) -> String {
    match tool.name.as_str() {
        "LIST_DIRECTORY" => fs::list_directory(cwd, &tool.input),
        "READ_FILE" => {
            let path = parser::extract_path(&tool.input);
            fs::read_file(cwd, &path)
        }
        "COMMAND" => {
            let command_input = parser::extract_command_input(&tool.input);
            if !is_command_allowed(&command_input) {
                return format!("ERROR: Command not allowed in audit mode: {command_input}");
            }
            crate::tools::command::run_command(&command_input, cwd, command_timeout, registry, id_allocator)
                .await
                .result
        }
        other => format!("ERROR: Tool not permitted in audit mode: {other}"),
    }
}
