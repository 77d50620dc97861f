//! `dev sessions list` rendering.

use dev_core::SessionStore;

const MAX_LISTED: usize = 20;
const PROMPT_TRUNCATE: usize = 50;

pub fn print_recent(store: &SessionStore) {
    let sessions = store.list();
    for session in sessions.into_iter().take(MAX_LISTED) {
        let short_id: String = session.id.chars().take(8).collect();
        let date = session.updated_at.split('T').next().unwrap_or(&session.updated_at);
        let prompt = truncate(&session.original_prompt, PROMPT_TRUNCATE);
        println!("{short_id} {date}\n    {prompt}");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundary_not_byte_length() {
        let long = "a".repeat(60);
        assert_eq!(truncate(&long, 50).chars().count(), 50);
        assert_eq!(truncate("short", 50), "short");
    }
}
