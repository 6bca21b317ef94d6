//! Error for ZBD ln backend

use thiserror::Error;

use crate::api::error::Error as ZbdApiError;
use crate::payment::CurrencyUnit;

/// ZBD Error
#[derive(Debug, Error)]
pub enum Error {
    /// No API key configured
    #[error("ZBD API key is required")]
    MissingApiKey,
    /// Unit outside the backend's supported set
    #[error("Unsupported unit: {0}")]
    UnsupportedUnit(CurrencyUnit),
    /// Built without a pub/sub transport
    #[error("Paid invoice stream requires the `redis` feature")]
    StreamTransportUnavailable,
    /// Paid invoice stream requested without a broker endpoint
    #[error("Redis URL is required for the paid invoice stream")]
    MissingStreamEndpoint,
    /// No exchange rate recent enough to convert with
    #[error("Failed to fetch exchange rate from ZBD: {0}")]
    RateUnavailable(#[source] ZbdApiError),
    /// Exchange rate that is not a positive finite number
    #[error("Invalid exchange rate: {0}")]
    InvalidRate(f64),
    /// Amount does not fit in millisatoshis
    #[error("Amount overflow")]
    AmountOverflow,
    /// Operation this backend never performs
    #[error("{0}")]
    Unsupported(&'static str),
    /// ZBD API error
    #[error(transparent)]
    ZbdApi(#[from] ZbdApiError),
    /// Redis error
    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

impl Error {
    /// Whether the error comes from construction-time configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingApiKey
                | Error::UnsupportedUnit(_)
                | Error::StreamTransportUnavailable
                | Error::MissingStreamEndpoint
        )
    }
}
