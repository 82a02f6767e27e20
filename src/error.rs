use thiserror::Error;

use crate::mm::config::Violation;

#[derive(Debug, Error)]
pub enum MakerError {
    #[error("invalid maker config: {}", join_violations(.0))]
    InvalidConfig(Vec<Violation>),

    #[error("unsupported config record version {0}")]
    UnsupportedVersion(u32),

    #[error("symbol {0} is not found on matcher")]
    SymbolNotFound(String),

    #[error("config stored for {requested} names symbol {stored}")]
    SymbolMismatch { requested: String, stored: String },

    #[error("maker for {0} is already running")]
    AlreadyRunning(String),

    #[error("maker for {0} is not running")]
    NotRunning(String),

    #[error("venue error: {0}")]
    Venue(#[from] venue::VenueError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MakerError {
    /// Whether the error means "no configuration stored" rather than a
    /// genuine failure.
    pub fn is_config_missing(&self) -> bool {
        matches!(self, MakerError::Venue(e) if e.is_not_found())
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, MakerError>;
