use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VenueError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("insufficient {asset} balance: need {need}, free {free}")]
    InsufficientBalance {
        asset: String,
        need: Decimal,
        free: Decimal,
    },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VenueError {
    /// Whether this error only signals that the requested record is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VenueError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, VenueError>;
