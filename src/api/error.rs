use thiserror::Error;

/// Outcome classes of a failed exchange call
///
/// `NotFound` is a benign race (order purged, already settled) and callers are
/// expected to treat it as a success-path outcome. `Transient` failures are left
/// for the next scheduled cycle. `Fatal` covers everything the exchange
/// definitively refused.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Exchange error {code}: {message}")]
    Fatal { code: i32, message: String },
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

impl ExchangeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExchangeError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ExchangeError::Fatal {
            code: 0,
            message: message.into(),
        }
    }

    /// Map a Binance API error code to an outcome class
    pub fn from_api_code(code: i32, message: &str) -> Self {
        match code {
            // Unknown order sent / order does not exist
            -2011 | -2013 => ExchangeError::NotFound(message.to_string()),
            // Disconnected, too many requests, timestamp outside recvWindow
            -1001 | -1003 | -1007 | -1021 => ExchangeError::Transient(message.to_string()),
            _ => ExchangeError::Fatal {
                code,
                message: message.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExchangeError::fatal(format!("Failed to decode response: {}", e))
        } else {
            ExchangeError::Transient(e.to_string())
        }
    }
}
