//! When the estimated token count of the history crosses the configured
//! ceiling, summarize it with the model and reset history to a single
//! summary + original-prompt message. Destructive by design: the
//! pre-compression history is not retained (see SPEC_FULL.md).

use crate::error::Result;
use crate::llm::LlmClient;
use crate::session::Message;
use crate::session::Role;
use crate::session::Session;
use crate::util::estimate_tokens;

const COMPRESSION_SYSTEM_PROMPT: &str = "\
You are a compression assistant. You will be given the full message \
history of an in-progress coding agent session. Produce a concise but \
complete summary of what has happened so far: what was asked, what has \
been done, what remains, and any facts the agent will need to continue \
the work. Do not include meta-commentary about this instruction.";

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "SYSTEM",
        Role::User => "USER",
        Role::Assistant => "ASSISTANT",
    }
}

fn serialize_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| format!("[{}]\n{}", role_label(m.role), m.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn build_post_compression_message(summary: &str, original_prompt: &str) -> String {
    format!(
        "[CONTEXT SUMMARY]\n\n{summary}\n\n[ORIGINAL REQUEST]\n\n{original_prompt}"
    )
}

/// Summarize `session.history` via the model, then replace it with exactly
/// two messages: the caller-supplied (up-to-date) `system_prompt` and a
/// single user message combining the summary with the preserved original
/// prompt. Appends a compression record to the session.
pub async fn compress(llm: &LlmClient, session: &mut Session, system_prompt: &str) -> Result<()> {
    let tokens_before: usize = session
        .history
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .sum();

    let serialized = serialize_history(&session.history);
    let messages = vec![
        ("system".to_string(), COMPRESSION_SYSTEM_PROMPT.to_string()),
        ("user".to_string(), serialized),
    ];
    let summary = llm.stream_completion(&messages, true).await?;

    let combined = build_post_compression_message(&summary, &session.original_prompt);
    session.history = vec![Message::system(system_prompt), Message::user(combined)];

    let tokens_after: usize = session
        .history
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .sum();

    session.compressions.push(crate::session::CompressionRecord {
        timestamp: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        tokens_before,
        tokens_after,
    });
    session.recompute_total_tokens();

    Ok(())
}
