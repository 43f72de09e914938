use std::path::PathBuf;

/// Environment variables read by stove or injected into workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVar {
    StoveConfig,
    StoveProfile,
    StoveLog,
    RustLog,
    StoveHost,
    StovePort,
}

impl EnvVar {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StoveConfig => "STOVE_CONFIG",
            Self::StoveProfile => "STOVE_PROFILE",
            Self::StoveLog => "STOVE_LOG",
            Self::RustLog => "RUST_LOG",
            Self::StoveHost => "STOVE_HOST",
            Self::StovePort => "STOVE_PORT",
        }
    }
}

const DEFAULT_CONFIG_FILE: &str = "stove.toml";
const DEFAULT_PROFILE: &str = "main";
const DEFAULT_LOG_FILTER: &str = "info";

/// Non-empty environment variable value.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Config file path ($STOVE_CONFIG or ./stove.toml)
pub fn config_path() -> PathBuf {
    let path = env_opt(EnvVar::StoveConfig.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    tracing::trace!(path = %path.display(), "Resolved config path");
    path
}

/// Profile name ($STOVE_PROFILE or "main")
pub fn profile() -> String {
    let name = env_opt(EnvVar::StoveProfile.as_str()).unwrap_or_else(|| DEFAULT_PROFILE.into());
    tracing::trace!(profile = %name, "Resolved profile");
    name
}

/// Log filter directive ($STOVE_LOG, then $RUST_LOG, then "info")
pub fn log_filter() -> String {
    env_opt(EnvVar::StoveLog.as_str())
        .or_else(|| env_opt(EnvVar::RustLog.as_str()))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.into())
}
