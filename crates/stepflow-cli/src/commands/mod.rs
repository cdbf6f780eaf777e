//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses
//! the stepflow-core domain logic through `AppState`.

pub mod server;
pub mod workflow;

use std::path::Path;

use stepflow_core::{AppState, EngineConfig};

/// Initialize a shared `AppState` from the given SQLite database path.
///
/// Model-service settings come from the `STEPFLOW_*` environment (after
/// `.env` files have been loaded).
pub async fn init_state(db_path: &str) -> Result<AppState, String> {
    stepflow_server::create_app_state(db_path, EngineConfig::from_env()).await
}

/// Load `.env.local` and `.env` from the current directory.
pub fn load_dotenv() {
    load_dotenv_from(Path::new("."));
}

/// Load `.env.local` then `.env` from `dir`. Variables already present in
/// the environment are never overwritten, so `.env.local` wins over `.env`.
pub fn load_dotenv_from(dir: &Path) {
    for filename in &[".env.local", ".env"] {
        let path = dir.join(filename);
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            if let Some(eq_idx) = line.find('=') {
                let key = line[..eq_idx].trim();
                let mut value = line[eq_idx + 1..].trim();
                if value.len() >= 2
                    && ((value.starts_with('"') && value.ends_with('"'))
                        || (value.starts_with('\'') && value.ends_with('\'')))
                {
                    value = &value[1..value.len() - 1];
                }
                if !key.is_empty() && std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
        tracing::info!("[Cli] Loaded environment from '{}'", path.display());
    }
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Shorten `s` to at most `max` characters, marking the cut with `…`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}
