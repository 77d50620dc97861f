//! First-run configuration wizard and `dev config` editor launch. Thin
//! adaptations around the core config module -- out of scope for visual
//! design, but still needed for the CLI forms listed in SPEC_FULL.md.

use std::io::Write;

use dev_core::config;
use dev_core::config::Config;

pub fn run_wizard() -> anyhow::Result<Config> {
    println!("No config found -- let's set one up.");
    let api_url = prompt_line("API base URL", "http://localhost:11434/v1")?;
    let api_key = prompt_line("API key (blank if none)", "")?;
    let model = prompt_line("Model name", "gpt-4o-mini")?;

    let config = Config {
        api_url,
        api_key,
        model,
        ..Config::default()
    };
    config::save_config(&config)?;
    println!("Saved config to {}", config::config_file_path()?.display());
    Ok(config)
}

fn prompt_line(label: &str, default: &str) -> anyhow::Result<String> {
    if default.is_empty() {
        print!("{label}: ");
    } else {
        print!("{label} [{default}]: ");
    }
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let trimmed = line.trim();
    Ok(if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    })
}

/// Launches `$EDITOR` (or a sane per-OS fallback) on the config file,
/// creating it with defaults first if absent.
pub fn open_config_in_editor() -> anyhow::Result<()> {
    let path = config::config_file_path()?;
    if !path.exists() {
        config::save_config(&Config::default())?;
    }

    let editor = std::env::var("EDITOR").ok().unwrap_or_else(default_editor);
    let status = std::process::Command::new(&editor).arg(&path).status();
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(anyhow::anyhow!("{editor} exited with {status}")),
        Err(e) => Err(anyhow::anyhow!("failed to launch {editor}: {e}")),
    }
}

fn default_editor() -> String {
    if cfg!(target_os = "windows") {
        "notepad".to_string()
    } else if cfg!(target_os = "macos") {
        "open".to_string()
    } else {
        "xdg-open".to_string()
    }
}
