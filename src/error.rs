use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Profile '{name}' not found in {path}")]
    ProfileNotFound { name: String, path: String },

    #[error("No free port found on {host} after {attempts} attempts")]
    PortExhausted { host: String, attempts: u32 },

    #[error("No upstream configured")]
    NoUpstream,

    #[error("Failed to spawn worker '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build command failed: {0}")]
    Build(String),
}

impl StoveError {
    /// Errors that leave the rotation core unable to make progress on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ConfigParse(_)
                | Self::ProfileNotFound { .. }
                | Self::PortExhausted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoveError>;
