//! ZBD API type definitions
//!
//! Request and response types for the subset of the ZBD API used by the
//! backend. All types use `camelCase` serialization to match the API's JSON.
//!
//! ## Amount Handling
//!
//! ZBD expresses every amount in millisatoshis. Depending on the endpoint the
//! value arrives either as a JSON number or as a decimal string, so amounts and
//! prices are read with [`parse_u64_from_string`] and [`parse_f64_from_string`].
//!
//! ## Charge States
//!
//! [`ChargeStatus`]: `pending`, `completed`, `expired`, `error`. Anything else
//! deserializes to [`ChargeStatus::Unknown`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::payment::PaymentResult;

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber<T> {
    String(String),
    Number(T),
}

/// Parse f64 from a string or a number
pub fn parse_f64_from_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrNumber::<f64>::deserialize(deserializer)? {
        StringOrNumber::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        StringOrNumber::Number(f) => Ok(f),
    }
}

/// Parse u64 from a string or a number
pub fn parse_u64_from_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrNumber::<u64>::deserialize(deserializer)? {
        StringOrNumber::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        StringOrNumber::Number(n) => Ok(n),
    }
}

/// Standard ZBD response envelope
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ZbdResponse<T> {
    /// Whether the request succeeded
    #[serde(default)]
    pub success: Option<bool>,
    /// Response payload
    pub data: T,
    /// Optional message
    #[serde(default)]
    pub message: Option<String>,
}

/// Wallet details (`GET /v1/wallet`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WalletData {
    /// Balance in millisatoshis
    #[serde(default, deserialize_with = "parse_u64_from_string")]
    pub balance: u64,
    /// Wallet unit, usually `msats`
    #[serde(default)]
    pub unit: Option<String>,
}

/// BTC/USD price (`GET /v1/btcusd`)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BtcUsdData {
    /// Price of one bitcoin in US dollars
    #[serde(deserialize_with = "parse_f64_from_string")]
    pub btc_usd_price: f64,
    /// Provider timestamp of the price
    #[serde(default)]
    pub btc_usd_timestamp: Option<serde_json::Value>,
}

/// Create charge request (`POST /v1/charges`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    /// Amount in millisatoshis, as a decimal string
    pub amount: String,
    /// Invoice description
    pub description: String,
    /// Seconds until the charge expires
    pub expires_in: u64,
    /// URL ZBD calls when the charge changes state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// Charge created or fetched from ZBD
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Charge {
    /// Opaque charge identifier
    pub id: String,
    /// Charge state; absent on some freshly created charges
    #[serde(default)]
    pub status: ChargeStatus,
    /// Lightning invoice backing the charge
    #[serde(default)]
    pub invoice: Option<ChargeInvoice>,
}

/// Lightning invoice attached to a charge
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeInvoice {
    /// BOLT11 payment request
    pub request: String,
    /// `lightning:` URI form of the request
    #[serde(default)]
    pub uri: Option<String>,
}

/// Charge state as reported by ZBD
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    /// Awaiting payment
    #[default]
    Pending,
    /// Paid
    Completed,
    /// Expired before being paid
    Expired,
    /// Provider-side failure
    Error,
    /// Any status this backend does not know about
    #[serde(other)]
    Unknown,
}

impl From<&str> for ChargeStatus {
    fn from(status: &str) -> Self {
        match status {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "expired" => Self::Expired,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Expired => write!(f, "expired"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<ChargeStatus> for PaymentResult {
    fn from(status: ChargeStatus) -> Self {
        match status {
            ChargeStatus::Pending => PaymentResult::Pending,
            ChargeStatus::Completed => PaymentResult::Settled,
            ChargeStatus::Expired | ChargeStatus::Error => PaymentResult::Failed,
            // Unrecognized vocabulary must be re-polled, never guessed
            ChargeStatus::Unknown => PaymentResult::Unknown,
        }
    }
}
