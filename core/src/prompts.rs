//! System prompt construction. No project-type heuristics here -- this
//! emits the wire contract every mode shares, plus a one-line mode note.

use std::path::Path;

/// Sent back to the model in place of tool results when its response could
/// not be parsed into the Agent Response envelope.
pub const MALFORMED_RESPONSE_MESSAGE: &str = "\
Your previous response could not be parsed. It must contain a line \
`# Agent Response` followed by at least one `## Tool Choice` / `## Tool \
Input` pair naming a recognized tool. Please try again.";

const ENVELOPE_CONTRACT: &str = "\
For every turn, respond with exactly one Markdown block starting with the \
line `# Agent Response`. Any text before that marker is ignored -- use it \
for scratch thinking if you need to. Inside the block, use these \
subsections as needed:

## Thoughts
Brief reasoning about what to do next.

## Task List
One `[<c>] <text>` line per task, where `<c>` is `x` (complete), `~` \
(in progress), or a space (pending).

## Tool Choice
The name of exactly one tool to invoke, in full upper case, on its own \
line: LIST_DIRECTORY, READ_FILE, WRITE_FILE, FIND_AND_REPLACE_IN_FILE, \
COMMAND, UPDATE_TASK_LIST, ASK_USER, DONE, READ_BACKGROUND_PROCESS, \
LIST_BACKGROUND_PROCESSES, or KILL_BACKGROUND_PROCESS.

## Tool Input
The input for that tool. Repeat the `## Tool Choice` / `## Tool Input` \
pair to invoke more than one tool in the same response; they run in the \
order you list them. Call DONE when you believe the task is complete --\
no tool listed after DONE in the same response will run, and a separate \
auditor will independently verify your work before the run is accepted.";

pub fn system_prompt(automated: bool, working_directory: &Path) -> String {
    let mode_note = if automated {
        "You are running in automated mode: ASK_USER is disabled and will \
always return an error -- make reasonable assumptions instead of asking."
    } else {
        "You are running in interactive mode: you may use ASK_USER to ask \
the user a clarifying question when genuinely blocked."
    };

    format!(
        "You are a software development agent working in the directory \
{}. You accomplish tasks by invoking tools against the local filesystem \
and shell. {mode_note}\n\n{ENVELOPE_CONTRACT}",
        working_directory.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn automated_mode_disables_ask_user_in_prompt() {
        let prompt = system_prompt(true, &PathBuf::from("/tmp/work"));
        assert!(prompt.contains("ASK_USER is disabled"));
        assert!(prompt.contains("/tmp/work"));
    }

    #[test]
    fn interactive_mode_allows_ask_user_in_prompt() {
        let prompt = system_prompt(false, &PathBuf::from("/tmp/work"));
        assert!(prompt.contains("you may use ASK_USER"));
    }
}
