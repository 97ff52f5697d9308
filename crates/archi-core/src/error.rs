//! Error types shared by the core crate

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller asked for something that cannot be traded (e.g. with itself)
    #[error("invalid trade request: {0}")]
    InvalidTradeRequest(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The catalog file itself could not be read or parsed
    #[error("failed to load catalog {path:?}: {reason}")]
    CatalogLoad { path: PathBuf, reason: String },

    #[error("collection store I/O failed on {path:?}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("collection store document is malformed")]
    StoreFormat(#[from] serde_json::Error),
}

impl CoreError {
    /// Stable reason code surfaced with rejected requests
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidTradeRequest(_) => "invalid_trade_request",
            CoreError::InvalidConfiguration(_) => "invalid_configuration",
            CoreError::CatalogLoad { .. } => "catalog_load",
            CoreError::StoreIo { .. } => "store_io",
            CoreError::StoreFormat(_) => "store_format",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let err = CoreError::InvalidTradeRequest("self trade".into());
        assert_eq!(err.code(), "invalid_trade_request");
        assert!(err.to_string().contains("self trade"));

        let err = CoreError::InvalidConfiguration("max_size".into());
        assert_eq!(err.code(), "invalid_configuration");
    }
}
