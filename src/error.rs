use crate::config::ConfigError;
use crate::market::MarketDataError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid trading pair: {0}")]
    InvalidTradingPair(String),
    #[error("Market data error: {0}")]
    Market(#[from] MarketDataError),
}

impl ControllerError {
    /// Stable label for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Config(_) => "config",
            ControllerError::InvalidTradingPair(_) => "invalid_trading_pair",
            ControllerError::Market(_) => "market",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_kind() {
        let err = ControllerError::from(ConfigError::MissingEnv("X".to_string()));
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required environment variable: X"
        );
        assert_eq!(err.kind(), "config");

        let err = ControllerError::from(MarketDataError::UnknownPool("p".to_string()));
        assert_eq!(err.to_string(), "Market data error: Unknown pool: p");
        assert_eq!(err.kind(), "market");
    }
}
