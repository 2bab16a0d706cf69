//! Environment-derived settings.

use std::path::PathBuf;

/// Settings read from the environment at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Where the SQLite snapshot lives.
    pub state_path: PathBuf,
    /// Seeds the credential when the stored snapshot has none.
    pub api_key: Option<String>,
    /// Seeds the base URL when no snapshot exists yet.
    pub base_url: Option<String>,
    /// Sent as `HTTP-Referer`.
    pub referer: Option<String>,
    /// Sent as `X-Title`.
    pub app_title: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            state_path: var("THINKTANK_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_state_path(var("HOME"))),
            api_key: var("OPENROUTER_API_KEY"),
            base_url: var("OPENROUTER_BASE_URL"),
            referer: var("OPENROUTER_REFERER"),
            app_title: var("OPENROUTER_APP_TITLE"),
        }
    }
}

fn default_state_path(home: Option<String>) -> PathBuf {
    let root = home.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    root.join(".thinktank").join("state.sqlite3")
}
