//! Lightning backend contract
//!
//! The interface a mint drives its lightning backends through. Receive-side
//! operations that are polled (`status`, `create_invoice`, `get_invoice_status`)
//! return typed responses and never fail; the caller branches on the result.
//! Melt-side operations return `Result` so that a backend can refuse them.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::stream::PaidInvoiceStream;

/// Currency units known to the mint
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyUnit {
    /// Satoshi
    Sat,
    /// Millisatoshi
    Msat,
    /// US dollar, counted in cents
    Usd,
    /// Euro, counted in cents
    Eur,
}

impl fmt::Display for CurrencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrencyUnit::Sat => write!(f, "sat"),
            CurrencyUnit::Msat => write!(f, "msat"),
            CurrencyUnit::Usd => write!(f, "usd"),
            CurrencyUnit::Eur => write!(f, "eur"),
        }
    }
}

impl FromStr for CurrencyUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sat" | "sats" => Ok(CurrencyUnit::Sat),
            "msat" | "msats" => Ok(CurrencyUnit::Msat),
            "usd" => Ok(CurrencyUnit::Usd),
            "eur" => Ok(CurrencyUnit::Eur),
            _ => Err(format!("Unknown currency unit: {}", s)),
        }
    }
}

/// Amount in a given unit
///
/// `value` is satoshis for [`CurrencyUnit::Sat`] and cents for fiat units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Amount {
    /// Unit of `value`
    pub unit: CurrencyUnit,
    /// Quantity in the smallest denomination of `unit`
    pub value: u64,
}

impl Amount {
    /// Create a new amount
    pub fn new(unit: CurrencyUnit, value: u64) -> Self {
        Self { unit, value }
    }

    /// Amount of satoshis
    pub fn sat(value: u64) -> Self {
        Self::new(CurrencyUnit::Sat, value)
    }

    /// Amount of US cents
    pub fn usd_cents(value: u64) -> Self {
        Self::new(CurrencyUnit::Usd, value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Canonical payment outcome
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentResult {
    /// Not yet settled
    Pending,
    /// Settled
    Settled,
    /// Failed or expired
    Failed,
    /// Could not be determined; poll again
    Unknown,
}

impl PaymentResult {
    /// Whether no further state change is expected
    pub fn is_final(&self) -> bool {
        matches!(self, PaymentResult::Settled | PaymentResult::Failed)
    }
}

/// Result of an invoice status check
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PaymentStatus {
    /// Outcome
    pub result: PaymentResult,
    /// Diagnostic when the status could not be fetched
    pub error_message: Option<String>,
}

impl PaymentStatus {
    /// Status without a diagnostic
    pub fn new(result: PaymentResult) -> Self {
        Self {
            result,
            error_message: None,
        }
    }

    /// Unknown status carrying the reason
    pub fn unknown(error_message: impl Into<String>) -> Self {
        Self {
            result: PaymentResult::Unknown,
            error_message: Some(error_message.into()),
        }
    }

    /// Whether the payment settled
    pub fn settled(&self) -> bool {
        self.result == PaymentResult::Settled
    }
}

/// Result of an invoice creation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvoiceResponse {
    /// Whether the invoice was created
    pub ok: bool,
    /// Provider identifier used for later status checks
    pub checking_id: Option<String>,
    /// BOLT11 payment request
    pub payment_request: Option<String>,
    /// Reason the invoice was not created
    pub error_message: Option<String>,
}

impl InvoiceResponse {
    /// Successful response
    pub fn created(checking_id: String, payment_request: String) -> Self {
        Self {
            ok: true,
            checking_id: Some(checking_id),
            payment_request: Some(payment_request),
            error_message: None,
        }
    }

    /// Failed response
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            ok: false,
            checking_id: None,
            payment_request: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// Backend status and balance
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StatusResponse {
    /// Balance held at the provider
    pub balance: Amount,
    /// Diagnostic when the balance could not be fetched
    pub error_message: Option<String>,
}

/// Bolt11 capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Bolt11Settings {
    /// Multi-part payments
    pub mpp: bool,
    /// Amountless invoices
    pub amountless: bool,
    /// Custom invoice descriptions
    pub invoice_description: bool,
}

/// Backend settings advertised to the mint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SettingsResponse {
    /// Unit this backend instance operates in
    pub unit: CurrencyUnit,
    /// Bolt11 capabilities
    pub bolt11: Bolt11Settings,
    /// Whether melt operations are available
    pub melt_enabled: bool,
    /// Whether [`LightningBackend::paid_invoices_stream`] is available
    pub incoming_payment_stream: bool,
}

/// Request for an outgoing payment quote
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MeltQuoteRequest {
    /// BOLT11 invoice to pay
    pub request: String,
    /// Unit the quote is denominated in
    pub unit: CurrencyUnit,
}

/// Accepted melt quote
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MeltQuote {
    /// Quote identifier
    pub quote_id: String,
    /// BOLT11 invoice to pay
    pub request: String,
    /// Amount to pay
    pub amount: Amount,
}

/// Outgoing payment quote
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PaymentQuoteResponse {
    /// Identifier to check the payment with
    pub checking_id: Option<String>,
    /// Amount to pay
    pub amount: Amount,
    /// Expected fee
    pub fee: Amount,
}

/// Outgoing payment result
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PaymentResponse {
    /// Outcome
    pub result: PaymentResult,
    /// Identifier to check the payment with
    pub checking_id: Option<String>,
    /// Fee paid
    pub fee: Option<Amount>,
    /// Payment preimage
    pub preimage: Option<String>,
    /// Failure reason
    pub error_message: Option<String>,
}

/// Lightning backend used by the mint
#[async_trait]
pub trait LightningBackend: Send + Sync {
    /// Units this backend can be constructed with
    fn supported_units(&self) -> &'static [CurrencyUnit];

    /// Whether the backend can pay invoices
    fn supports_melt(&self) -> bool;

    /// Advertised settings
    fn get_settings(&self) -> SettingsResponse;

    /// Provider balance
    async fn status(&self) -> StatusResponse;

    /// Create an invoice for `amount`
    async fn create_invoice(&self, amount: Amount, memo: Option<String>) -> InvoiceResponse;

    /// Status of an invoice created by [`Self::create_invoice`]
    async fn get_invoice_status(&self, checking_id: &str) -> PaymentStatus;

    /// Pay a BOLT11 invoice
    async fn pay_invoice(
        &self,
        quote: &MeltQuote,
        fee_limit_msat: u64,
    ) -> Result<PaymentResponse, Error>;

    /// Status of an outgoing payment
    async fn get_payment_status(&self, checking_id: &str) -> Result<PaymentStatus, Error>;

    /// Quote an outgoing payment
    async fn get_payment_quote(
        &self,
        request: &MeltQuoteRequest,
    ) -> Result<PaymentQuoteResponse, Error>;

    /// Stream of checking ids of settled invoices
    async fn paid_invoices_stream(&self) -> Result<PaidInvoiceStream, Error>;

    /// Whether a paid invoice stream is currently open
    fn is_wait_invoice_active(&self) -> bool;

    /// Cancel the open paid invoice stream, if any
    fn cancel_wait_invoice(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_unit_from_str() {
        assert_eq!("sat".parse::<CurrencyUnit>().unwrap(), CurrencyUnit::Sat);
        assert_eq!("USD".parse::<CurrencyUnit>().unwrap(), CurrencyUnit::Usd);
        assert_eq!(" msats ".parse::<CurrencyUnit>().unwrap(), CurrencyUnit::Msat);
        assert!("btc".parse::<CurrencyUnit>().is_err());
    }

    #[test]
    fn test_payment_result_is_final() {
        assert!(PaymentResult::Settled.is_final());
        assert!(PaymentResult::Failed.is_final());
        assert!(!PaymentResult::Pending.is_final());
        assert!(!PaymentResult::Unknown.is_final());
    }

    #[test]
    fn test_invoice_response_branches() {
        let ok = InvoiceResponse::created("charge_1".to_string(), "lnbc1".to_string());
        assert!(ok.ok);
        assert!(ok.error_message.is_none());

        let failed = InvoiceResponse::failed("boom");
        assert!(!failed.ok);
        assert!(failed.checking_id.is_none());
        assert!(failed.payment_request.is_none());
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
    }
}
