//! Directory listing (with recursive glob), read, write (creating
//! parents), and literal find/replace. All paths are resolved against the
//! session's working directory except absolute ones.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use wildmatch::WildMatch;

/// An input beginning with `/` or `<letter>:` is absolute; otherwise it is
/// joined against `cwd`.
pub fn resolve_path(cwd: &Path, input: &str) -> PathBuf {
    let trimmed = input.trim();
    let is_windows_drive = trimmed.len() >= 2
        && trimmed.as_bytes()[0].is_ascii_alphabetic()
        && trimmed.as_bytes()[1] == b':';
    if trimmed.starts_with('/') || is_windows_drive {
        PathBuf::from(trimmed)
    } else {
        cwd.join(trimmed)
    }
}

pub fn list_directory(cwd: &Path, arg: &str) -> String {
    let arg = arg.trim();
    if arg.contains('*') {
        return list_glob(cwd, arg);
    }
    let path = resolve_path(cwd, arg);
    if !path.exists() {
        return format!("Directory not found: {arg}");
    }
    if !path.is_dir() {
        return format!("Not a directory: {arg}");
    }
    let Ok(entries) = std::fs::read_dir(&path) else {
        return format!("Directory not found: {arg}");
    };
    let mut names: Vec<(String, bool)> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let is_dir = e.file_type().ok()?.is_dir();
            Some((name, is_dir))
        })
        .collect();
    names.sort();
    names
        .into_iter()
        .map(|(name, is_dir)| {
            if is_dir {
                format!("[DIR]  {name}/")
            } else {
                format!("[FILE] {name}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn list_glob(cwd: &Path, pattern: &str) -> String {
    let root = resolve_path(cwd, "");
    let mut matches: Vec<String> = Vec::new();
    for entry in walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        if glob_match(pattern, &relative) {
            matches.push(relative);
        }
    }
    if matches.is_empty() {
        return "No matches found".to_string();
    }
    matches.sort();
    render_tree(&matches)
}

/// Segment-aware glob matching: `**` matches zero or more whole path
/// segments; `*`/`?` within a segment are handled by `WildMatch`. A plain
/// `wildmatch` pass over the whole string cannot express "`**` matches
/// zero segments" -- needed so `src/**/*.ts` matches the direct child
/// `src/a.ts`, not just nested descendants.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let candidate_segments: Vec<&str> = candidate.split('/').collect();
    segments_match(&pattern_segments, &candidate_segments)
}

fn segments_match(pattern: &[&str], candidate: &[&str]) -> bool {
    match pattern.first() {
        None => candidate.is_empty(),
        Some(&"**") => {
            segments_match(&pattern[1..], candidate)
                || (!candidate.is_empty() && segments_match(pattern, &candidate[1..]))
        }
        Some(segment) => {
            if candidate.is_empty() {
                return false;
            }
            WildMatch::new(segment).matches(candidate[0]) && segments_match(&pattern[1..], &candidate[1..])
        }
    }
}

enum TreeNode {
    Dir(BTreeMap<String, TreeNode>),
    File,
}

fn render_tree(paths: &[String]) -> String {
    let mut root: BTreeMap<String, TreeNode> = BTreeMap::new();
    for path in paths {
        let mut cursor = &mut root;
        let parts: Vec<&str> = path.split('/').collect();
        for (i, part) in parts.iter().enumerate() {
            let is_last = i == parts.len() - 1;
            if is_last {
                cursor.entry(part.to_string()).or_insert(TreeNode::File);
            } else {
                let entry = cursor
                    .entry(part.to_string())
                    .or_insert_with(|| TreeNode::Dir(BTreeMap::new()));
                match entry {
                    TreeNode::Dir(children) => cursor = children,
                    TreeNode::File => break,
                }
            }
        }
    }
    let mut out = String::new();
    render_node(&root, "", &mut out);
    out.trim_end().to_string()
}

fn render_node(node: &BTreeMap<String, TreeNode>, prefix: &str, out: &mut String) {
    let entries: Vec<_> = node.iter().collect();
    for (i, (name, child)) in entries.iter().enumerate() {
        let is_last = i == entries.len() - 1;
        let connector = if is_last { "└── " } else { "├── " };
        out.push_str(prefix);
        out.push_str(connector);
        out.push_str(name);
        out.push('\n');
        if let TreeNode::Dir(children) = child {
            let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
            render_node(children, &child_prefix, out);
        }
    }
}

pub fn read_file(cwd: &Path, path_arg: &str) -> String {
    let path = resolve_path(cwd, path_arg);
    match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            format!("File not found: {path_arg}")
        }
        Err(e) => format!("Error reading file: {e}"),
    }
}

pub fn write_file(cwd: &Path, path_arg: &str, content: &str) -> String {
    let path = resolve_path(cwd, path_arg);
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        return format!("Error writing file: {e}");
    }
    match std::fs::write(&path, content) {
        Ok(()) => format!("File written: {path_arg}"),
        Err(e) => format!("Error writing file: {e}"),
    }
}

pub fn find_and_replace(cwd: &Path, path_arg: &str, find: &str, replace: &str) -> String {
    let path = resolve_path(cwd, path_arg);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return format!("File not found: {path_arg}");
        }
        Err(e) => return format!("Error reading file: {e}"),
    };
    let count = content.matches(find).count();
    if count == 0 {
        return format!("Pattern not found in file: {path_arg}");
    }
    let replaced = content.replace(find, replace);
    if let Err(e) = std::fs::write(&path, replaced) {
        return format!("Error writing file: {e}");
    }
    format!("Replaced {count} occurrence(s) in: {path_arg}")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = write_file(dir.path(), "nested/hello.txt", "hi");
        assert_eq!(result, "File written: nested/hello.txt");
        let content = read_file(dir.path(), "nested/hello.txt");
        assert_eq!(content, "hi");
    }

    #[test]
    fn read_missing_file_reports_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let content = read_file(dir.path(), "nope.txt");
        assert_eq!(content, "File not found: nope.txt");
    }

    #[test]
    fn find_and_replace_reports_count_and_is_literal() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "f.txt", "a.b.a.b.a");
        let result = find_and_replace(dir.path(), "f.txt", "a", "X");
        assert_eq!(result, "Replaced 3 occurrence(s) in: f.txt");
        assert_eq!(read_file(dir.path(), "f.txt"), "X.b.X.b.X");
    }

    #[test]
    fn find_and_replace_identity_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "f.txt", "same same");
        find_and_replace(dir.path(), "f.txt", "same", "same");
        assert_eq!(read_file(dir.path(), "f.txt"), "same same");
    }

    #[test]
    fn find_and_replace_missing_pattern() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "f.txt", "hello");
        let result = find_and_replace(dir.path(), "f.txt", "zzz", "yyy");
        assert_eq!(result, "Pattern not found in file: f.txt");
    }

    #[test]
    fn list_directory_reports_missing_and_non_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            list_directory(dir.path(), "missing"),
            "Directory not found: missing"
        );
        write_file(dir.path(), "a_file.txt", "x");
        assert_eq!(
            list_directory(dir.path(), "a_file.txt"),
            "Not a directory: a_file.txt"
        );
    }

    #[test]
    fn glob_matches_nested_and_direct_children_but_not_other_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "src/a.ts", "a");
        write_file(dir.path(), "src/b.ts", "b");
        write_file(dir.path(), "src/nested/c.ts", "c");
        write_file(dir.path(), "other/d.js", "d");

        let result = list_glob(dir.path(), "src/**/*.ts");
        assert!(result.contains("a.ts"));
        assert!(result.contains("b.ts"));
        assert!(result.contains("c.ts"));
        assert!(!result.contains("d.js"));
    }

    #[test]
    fn empty_glob_reports_no_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(list_glob(dir.path(), "*.nonexistent"), "No matches found");
    }
}
