//! Fence-aware state machine that turns a streamed assistant response into a
//! [`ParsedResponse`]: thoughts, a task list, and an ordered sequence of tool
//! calls. Markdown-inside-Markdown (a model emitting a fenced example that
//! itself contains further fences) must not fool the section/fence tracking.

use crate::session::TaskItem;
use crate::session::parse_task_line;

pub const RESPONSE_MARKER: &str = "# Agent Response";

pub const TOOL_NAMES: &[&str] = &[
    "LIST_DIRECTORY",
    "READ_FILE",
    "WRITE_FILE",
    "FIND_AND_REPLACE_IN_FILE",
    "COMMAND",
    "UPDATE_TASK_LIST",
    "ASK_USER",
    "DONE",
    "READ_BACKGROUND_PROCESS",
    "LIST_BACKGROUND_PROCESSES",
    "KILL_BACKGROUND_PROCESS",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub thoughts: String,
    pub task_list: Vec<TaskItem>,
    pub tools: Vec<ToolCall>,
    /// The canonical Markdown slice (from the final `# Agent Response`
    /// marker onward) that gets stored in history, verbatim.
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Thoughts,
    TaskList,
    ToolChoice,
    ToolInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FenceState {
    ch: char,
    len: usize,
}

fn fence_info(line: &str) -> Option<(char, usize, &str)> {
    let trimmed = line.trim_start();
    let ch = trimmed.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let run_len = trimmed.chars().take_while(|&c| c == ch).count();
    if run_len < 3 {
        return None;
    }
    let info = trimmed[run_len..].trim();
    Some((ch, run_len, info))
}

fn is_bare_closing_fence(line: &str, open: &FenceState) -> bool {
    match fence_info(line) {
        Some((ch, len, info)) => ch == open.ch && len >= open.len && info.is_empty(),
        None => false,
    }
}

/// Parse a raw streamed response. Returns `None` if no `# Agent Response`
/// marker is found, or if zero tool calls were accumulated.
pub fn parse(full_response: &str) -> Option<ParsedResponse> {
    let marker_start = last_marker_index(full_response)?;
    let raw = full_response[marker_start..].to_string();

    let mut thoughts = String::new();
    let mut task_list: Vec<TaskItem> = Vec::new();
    let mut tools: Vec<ToolCall> = Vec::new();

    let mut section = Section::None;
    let mut fence: Option<FenceState> = None;

    let mut pending_name: Option<String> = None;
    let mut pending_input_lines: Vec<String> = Vec::new();
    let mut tool_name_locked = false;

    let finalize_tool =
        |pending_name: &mut Option<String>, pending_input_lines: &mut Vec<String>, tools: &mut Vec<ToolCall>| {
            if let Some(name) = pending_name.take() {
                tools.push(ToolCall {
                    name,
                    input: pending_input_lines.join("\n").trim().to_string(),
                });
            }
            pending_input_lines.clear();
        };

    for line in raw.lines() {
        let header = detect_header(line);

        // Pragma: a `## Tool Choice` / `## Tool Input` line is honored as a
        // section boundary even inside an unclosed outer fence, as long as
        // the current section is `toolInput`. This recovers from models
        // that forget to close a fence across sequential tool emissions.
        let pragma_override = fence.is_some()
            && section == Section::ToolInput
            && matches!(header, Some(Header::ToolChoice) | Some(Header::ToolInput));

        if fence.is_some() && !pragma_override {
            if let Some(open) = fence
                && is_bare_closing_fence(line, &open)
            {
                fence = None;
            } else if let Some((ch, len, info)) = fence_info(line)
                && info.is_empty()
                && fence.map(|f| f.ch) != Some(ch)
            {
                // A same-or-different-character nested opener inside an
                // outer fence never closes it; only the exact rules in
                // `is_bare_closing_fence` do. Nothing to do here, but keep
                // this branch to document the intent.
                let _ = len;
            }
            if section == Section::ToolInput {
                pending_input_lines.push(line.to_string());
            } else if section == Section::Thoughts {
                thoughts.push_str(line);
                thoughts.push('\n');
            }
            continue;
        }

        if pragma_override {
            fence = None;
        }

        if let Some(header) = header {
            match header {
                Header::Thoughts => {
                    finalize_tool(&mut pending_name, &mut pending_input_lines, &mut tools);
                    section = Section::Thoughts;
                    tool_name_locked = false;
                }
                Header::TaskList => {
                    finalize_tool(&mut pending_name, &mut pending_input_lines, &mut tools);
                    section = Section::TaskList;
                    tool_name_locked = false;
                }
                Header::ToolChoice => {
                    finalize_tool(&mut pending_name, &mut pending_input_lines, &mut tools);
                    section = Section::ToolChoice;
                    tool_name_locked = false;
                }
                Header::ToolInput => {
                    section = Section::ToolInput;
                }
                Header::Other => {
                    finalize_tool(&mut pending_name, &mut pending_input_lines, &mut tools);
                    section = Section::None;
                    tool_name_locked = false;
                }
            }
            continue;
        }

        // Track fence open only once we know this line isn't itself a
        // recognized header (headers never open fences).
        if fence.is_none()
            && let Some((ch, len, info)) = fence_info(line)
        {
            let _ = info;
            fence = Some(FenceState { ch, len });
        }

        match section {
            Section::Thoughts => {
                thoughts.push_str(line);
                thoughts.push('\n');
            }
            Section::TaskList => {
                if let Some(item) = parse_task_line(line) {
                    task_list.push(item);
                }
            }
            Section::ToolChoice => {
                if !tool_name_locked {
                    let candidate = line.trim().to_uppercase();
                    if let Some(&matched) = TOOL_NAMES.iter().find(|&&n| n == candidate) {
                        pending_name = Some(matched.to_string());
                        tool_name_locked = true;
                    }
                }
            }
            Section::ToolInput => {
                pending_input_lines.push(line.to_string());
            }
            Section::None => {}
        }
    }

    finalize_tool(&mut pending_name, &mut pending_input_lines, &mut tools);

    if tools.is_empty() {
        return None;
    }

    Some(ParsedResponse {
        thoughts: thoughts.trim().to_string(),
        task_list,
        tools,
        raw,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    Thoughts,
    TaskList,
    ToolChoice,
    ToolInput,
    Other,
}

fn detect_header(line: &str) -> Option<Header> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with("## ") {
        return None;
    }
    let rest = trimmed.trim_end();
    Some(match rest {
        _ if rest == "## Thoughts" => Header::Thoughts,
        _ if rest == "## Task List" => Header::TaskList,
        _ if rest == "## Tool Choice" => Header::ToolChoice,
        _ if rest == "## Tool Input" => Header::ToolInput,
        _ => Header::Other,
    })
}

fn last_marker_index(text: &str) -> Option<usize> {
    let mut found = None;
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find(RESPONSE_MARKER) {
        let abs = search_from + rel;
        let at_line_start = abs == 0 || text.as_bytes()[abs - 1] == b'\n';
        if at_line_start {
            found = Some(abs);
        }
        search_from = abs + RESPONSE_MARKER.len();
        if search_from > text.len() {
            break;
        }
    }
    found
}

/// The first `"quoted"` span on the first line of the tool input, else the
/// first line trimmed.
pub fn extract_path(input: &str) -> String {
    let first_line = input.lines().next().unwrap_or("");
    if let Some(start) = first_line.find('"')
        && let Some(end_rel) = first_line[start + 1..].find('"')
    {
        return first_line[start + 1..start + 1 + end_rel].to_string();
    }
    first_line.trim().to_string()
}

/// Finds the first fence (3+ backticks/tildes, optional info string), then
/// scans to the *last* bare-fence line of the same character with run
/// length >= the opener's. "Last" is essential for nested-block
/// correctness: an outer 4-backtick block containing inner 3-backtick
/// blocks must return its full contents, inner fences included.
pub fn extract_code_block(input: &str) -> Option<String> {
    let lines: Vec<&str> = input.lines().collect();
    let mut open_idx = None;
    let mut open: Option<FenceState> = None;
    for (i, line) in lines.iter().enumerate() {
        if let Some((ch, len, _info)) = fence_info(line) {
            open_idx = Some(i);
            open = Some(FenceState { ch, len });
            break;
        }
    }
    let open_idx = open_idx?;
    let open = open?;

    let mut close_idx = None;
    for (i, line) in lines.iter().enumerate().skip(open_idx + 1) {
        if is_bare_closing_fence(line, &open) {
            close_idx = Some(i);
        }
    }
    let close_idx = close_idx?;

    if close_idx <= open_idx + 1 {
        return Some(String::new());
    }
    Some(lines[open_idx + 1..close_idx].join("\n").trim_end().to_string())
}

/// Two literal fenced blocks with info strings `find` and `replace`. Both
/// required.
pub fn extract_find_replace(input: &str) -> Option<(String, String)> {
    let find = extract_labeled_block(input, "find")?;
    let replace = extract_labeled_block(input, "replace")?;
    Some((find, replace))
}

fn extract_labeled_block(input: &str, label: &str) -> Option<String> {
    let lines: Vec<&str> = input.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        if let Some((ch, len, info)) = fence_info(lines[i])
            && info.eq_ignore_ascii_case(label)
        {
            let open = FenceState { ch, len };
            for (j, line) in lines.iter().enumerate().skip(i + 1) {
                if is_bare_closing_fence(line, &open) {
                    return Some(lines[i + 1..j].join("\n").trim_end().to_string());
                }
            }
            return None;
        }
        i += 1;
    }
    None
}

/// The extracted code block if any, else the raw input.
pub fn extract_command_input(input: &str) -> String {
    extract_code_block(input).unwrap_or_else(|| input.trim().to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;

    fn wrap(body: &str) -> String {
        format!("{RESPONSE_MARKER}\n{body}")
    }

    #[test]
    fn missing_marker_fails() {
        assert!(parse("just some prose, no marker here").is_none());
    }

    #[test]
    fn arbitrary_prefix_does_not_change_result() {
        let body = "## Tool Choice\nDONE\n## Tool Input\nall good\n";
        let a = parse(&wrap(body)).expect("parse a");
        let prefixed = format!("some draft thinking text\n\n{}", wrap(body));
        let b = parse(&prefixed).expect("parse b");
        assert_eq!(a.tools, b.tools);
        assert_eq!(a.raw, b.raw);
    }

    #[test]
    fn counts_tool_choice_sections_in_order() {
        let body = "\
## Tool Choice
LIST_DIRECTORY
## Tool Input
.
## Tool Choice
READ_FILE
## Tool Input
\"a.txt\"
## Tool Choice
DONE
## Tool Input
finished
";
        let parsed = parse(&wrap(body)).expect("parse");
        assert_eq!(parsed.tools.len(), 3);
        assert_eq!(parsed.tools[0].name, "LIST_DIRECTORY");
        assert_eq!(parsed.tools[1].name, "READ_FILE");
        assert_eq!(parsed.tools[2].name, "DONE");
    }

    #[test]
    fn nested_fences_inside_outer_block_are_preserved_verbatim() {
        let body = "\
## Tool Choice
WRITE_FILE
## Tool Input
\"README.md\"
````markdown
# Title

```bash
echo hi
```
````
";
        let parsed = parse(&wrap(body)).expect("parse");
        assert_eq!(parsed.tools.len(), 1);
        let code = extract_code_block(&parsed.tools[0].input).expect("code block");
        assert!(code.contains("```bash"));
        assert!(code.contains("echo hi"));
        assert!(code.contains("# Title"));
    }

    #[test]
    fn tool_choice_header_inside_unclosed_fence_still_closes_tool_input() {
        let body = "\
## Tool Choice
WRITE_FILE
## Tool Input
```text
some content that forgets to close its fence
## Tool Choice
READ_FILE
## Tool Input
\"b.txt\"
";
        let parsed = parse(&wrap(body)).expect("parse");
        assert_eq!(parsed.tools.len(), 2);
        assert_eq!(parsed.tools[0].name, "WRITE_FILE");
        assert_eq!(parsed.tools[1].name, "READ_FILE");
        assert_eq!(extract_path(&parsed.tools[1].input), "b.txt");
    }

    #[test]
    fn zero_tools_is_malformed() {
        let body = "## Thoughts\nno tools here\n";
        assert!(parse(&wrap(body)).is_none());
    }

    #[test]
    fn task_list_parses_and_ignores_unknown_status() {
        let body = "\
## Task List
[x] done one
[~] doing two
[ ] todo three
[?] bogus
## Tool Choice
DONE
## Tool Input
ok
";
        let parsed = parse(&wrap(body)).expect("parse");
        assert_eq!(parsed.task_list.len(), 3);
    }

    #[test]
    fn find_and_replace_extraction() {
        let input = "\
\"f.txt\"
```find
old text
```
```replace
new text
```
";
        let (find, replace) = extract_find_replace(input).expect("blocks");
        assert_eq!(find, "old text");
        assert_eq!(replace, "new text");
    }

    #[test]
    fn extract_path_prefers_quoted_span() {
        assert_eq!(extract_path("\"src/a.txt\" trailing junk"), "src/a.txt");
        assert_eq!(extract_path("src/a.txt\nmore"), "src/a.txt");
    }

    #[test]
    fn other_header_terminates_section() {
        let body = "\
## Tool Choice
COMMAND
## Tool Input
```bash
ls
```
## Something Else
stray text
## Tool Choice
DONE
## Tool Input
done
";
        let parsed = parse(&wrap(body)).expect("parse");
        assert_eq!(parsed.tools.len(), 2);
        assert_eq!(parsed.tools[0].name, "COMMAND");
    }
}
