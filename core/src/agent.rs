//! The primary agent loop: stream a completion, parse it into tool calls,
//! execute them in order, and repeat until the model calls `DONE` and the
//! auditor agrees, or a retry/loop budget is exhausted.

use std::time::Duration;

use crate::audit;
use crate::compress;
use crate::config::Config;
use crate::error::DevError;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::parser;
use crate::prompts;
use crate::prompts::MALFORMED_RESPONSE_MESSAGE;
use crate::session::Message;
use crate::session::Session;
use crate::session::SessionStore;
use crate::tools;
use crate::tools::ToolContext;
use crate::tools::background::BackgroundRegistry;
use crate::tools::background::IdAllocator;
use crate::util::backoff;
use crate::util::estimate_tokens;

/// Drive `session` to completion against `llm`, persisting after every turn
/// that mutates history, and return the `DONE` completion summary once the
/// auditor passes. `automated` disables `ASK_USER` and widens the retry
/// budget, per the `-p` contract. Retry/loop-cap exhaustion surfaces as the
/// matching typed [`DevError`] variant rather than an ad hoc string -- the
/// CLI boundary (`cli::run_main`) turns that into the `fatal: ...` line.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    session: &mut Session,
    store: &SessionStore,
    llm: &LlmClient,
    config: &Config,
    background: &BackgroundRegistry,
    id_allocator: &IdAllocator,
    automated: bool,
) -> Result<String> {
    let system_prompt = prompts::system_prompt(automated, &session.working_directory);
    session.ensure_system_prompt(system_prompt.clone());

    let max_retries = config.max_retries_for(automated);
    let command_timeout = Duration::from_secs(config.command_timeout);
    let mut retries: u32 = 0;
    let mut loops: u32 = 0;

    loop {
        let total_tokens: usize = session
            .history
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();
        if total_tokens >= config.max_context_tokens as usize {
            compress::compress(llm, session, &system_prompt).await?;
            store.save(session)?;
        }

        let messages: Vec<(String, String)> = session
            .history
            .iter()
            .map(|m| (m.role.as_wire_str().to_string(), m.content.clone()))
            .collect();

        let response = match llm.stream_completion(&messages, false).await {
            Ok(r) => r,
            Err(_e) => {
                retries += 1;
                tracing::warn!(retries, max_retries, "transport failure talking to model");
                if retries >= max_retries {
                    return Err(DevError::RetryLimit(max_retries));
                }
                tokio::time::sleep(backoff(retries as u64)).await;
                continue;
            }
        };

        let parsed = match parser::parse(&response) {
            Some(p) => p,
            None => {
                session.history.push(Message::assistant(response.clone()));
                session
                    .history
                    .push(Message::user(MALFORMED_RESPONSE_MESSAGE.to_string()));
                session.touch();
                session.recompute_total_tokens();
                store.save(session)?;
                retries += 1;
                if retries >= max_retries {
                    return Err(DevError::MalformedResponse(format!(
                        "exceeded retry limit ({max_retries} attempts)"
                    )));
                }
                continue;
            }
        };

        retries = 0;
        session.task_list = parsed.task_list.clone();
        session.history.push(Message::assistant(parsed.raw.clone()));
        session.touch();
        session.recompute_total_tokens();
        store.save(session)?;

        let mut results: Vec<String> = Vec::new();
        let mut done_summary: Option<String> = None;
        for tool in &parsed.tools {
            if tool.name == "DONE" {
                let summary = tool.input.trim();
                done_summary = Some(if summary.is_empty() {
                    "No summary provided".to_string()
                } else {
                    summary.to_string()
                });
                break;
            }
            let ctx = ToolContext {
                cwd: &session.working_directory,
                automated,
                command_timeout,
                background,
                id_allocator,
            };
            let result = tools::dispatch(tool, &ctx).await;
            let is_error = result.starts_with("ERROR");
            results.push(format!("[{}]: {result}", tool.name));
            if is_error {
                break;
            }
        }

        if !results.is_empty() {
            session
                .history
                .push(Message::user(format!("Tool results:\n{}", results.join("\n"))));
            session.touch();
            session.recompute_total_tokens();
            store.save(session)?;
        }

        if let Some(summary) = done_summary {
            let verdict = audit::run_audit(llm, session, &summary, command_timeout).await?;
            if verdict.pass {
                return Ok(summary);
            }
            session.history.push(Message::user(format!(
                "AUDIT FAILED. Please address the following issues:\n\n{}",
                verdict.feedback
            )));
            session.touch();
            session.recompute_total_tokens();
            store.save(session)?;
        }

        loops += 1;
        tracing::debug!(loops, max_loops = config.max_loops, "completed agent loop iteration");
        if loops >= config.max_loops {
            return Err(DevError::LoopCapReached(config.max_loops));
        }
    }
}
