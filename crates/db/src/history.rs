use std::env;
use std::path::PathBuf;

const STATE_DIR: &str = "blazedb";
const HISTORY_ENV: &str = "BLAZEDB_HISTORY";

/// Shell history location: explicit override, then XDG state dir, then a
/// dotfile in the working directory.
pub fn resolve_history_path() -> PathBuf {
    if let Ok(path) = env::var(HISTORY_ENV) {
        return PathBuf::from(path);
    }
    if let Ok(state_dir) = env::var("XDG_STATE_HOME") {
        return PathBuf::from(state_dir).join(STATE_DIR).join("history");
    }
    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join(STATE_DIR)
            .join("history");
    }
    PathBuf::from(".blazedb_history")
}
