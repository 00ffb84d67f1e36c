use std::path::PathBuf;

pub const ENV_DATA_DIR: &str = "FOCUS_TIMER_DATA_DIR";
pub const ENV_LOG_SPEC: &str = "FOCUS_TIMER_LOG";
pub const DEFAULT_DATA_DIR: &str = "focus-timer-data";

/// Process-level configuration of the headless binary. User settings live in
/// the store, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Holds `store.json` and the log files.
    pub data_dir: PathBuf,
    pub log_spec: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let data_dir = var(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        // Keep dependency logs at WARN by default; this crate is more verbose in debug builds.
        let log_spec = var(ENV_LOG_SPEC)
            .or_else(|| var("RUST_LOG"))
            .unwrap_or_else(|| default_log_spec().to_string());
        Self { data_dir, log_spec }
    }
}

pub fn default_log_spec() -> &'static str {
    if cfg!(debug_assertions) {
        "warn,focus_timer_lib=debug,focus_timer=debug"
    } else {
        "warn,focus_timer_lib=info,focus_timer=info"
    }
}
