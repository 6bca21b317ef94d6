//! CDK lightning backend for ZBD
//!
//! Receive-only backend: invoices are created as ZBD charges and settlement is
//! learned by polling the charge or through the paid invoice stream. Paying
//! invoices (melt) is permanently disabled, tokens issued against this backend
//! cannot be redeemed over lightning.
//!
//! Supports `sat` and `usd` units. USD amounts are converted to millisatoshis
//! with ZBD's BTC/USD rate, see [`rate`].

#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::types::ChargeRequest;
use crate::payment::{
    Amount, Bolt11Settings, CurrencyUnit, InvoiceResponse, LightningBackend, MeltQuote,
    MeltQuoteRequest, PaymentQuoteResponse, PaymentResponse, PaymentResult, PaymentStatus,
    SettingsResponse, StatusResponse,
};
use crate::rate::{cents_to_msats, sats_to_msats, MSATS_PER_SAT};
use crate::stream::{MessageSource, PAID_INVOICES_CHANNEL};

pub mod api;
pub mod config;
pub mod error;
pub mod payment;
pub mod rate;
pub mod stream;

pub use api::ZbdApi;
pub use config::ZbdSettings;
pub use error::Error;
pub use rate::{ExchangeRate, RateCache};
pub use stream::PaidInvoiceStream;

/// Units a [`Zbd`] backend can be constructed with
pub const SUPPORTED_UNITS: &[CurrencyUnit] = &[CurrencyUnit::Sat, CurrencyUnit::Usd];

/// ZBD lightning backend implementation
#[derive(Clone)]
pub struct Zbd {
    zbd_api: ZbdApi,
    unit: CurrencyUnit,
    callback_url: Option<String>,
    #[cfg_attr(not(feature = "redis"), allow(dead_code))]
    redis_url: Option<String>,
    invoice_expiry_secs: u64,
    invoice_description: String,
    rate_cache: RateCache,
    wait_invoice_cancel_token: Arc<Mutex<CancellationToken>>,
    wait_invoice_streams: Arc<AtomicUsize>,
}

impl std::fmt::Debug for Zbd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zbd")
            .field("unit", &self.unit)
            .field("api", &self.zbd_api)
            .field("callback_url", &self.callback_url)
            .field(
                "wait_invoice_streams",
                &self.wait_invoice_streams.load(Ordering::SeqCst),
            )
            .finish()
    }
}

impl Zbd {
    /// Create new [`Zbd`] backend
    ///
    /// Fails without touching the network if `unit` is not in
    /// [`SUPPORTED_UNITS`] or no API key is configured. Backends that should
    /// price USD invoices off the same rate must be given clones of one
    /// [`RateCache`].
    pub fn new(
        settings: ZbdSettings,
        unit: CurrencyUnit,
        rate_cache: RateCache,
    ) -> Result<Self, Error> {
        if !SUPPORTED_UNITS.contains(&unit) {
            return Err(Error::UnsupportedUnit(unit));
        }

        if settings.api_key.trim().is_empty() {
            return Err(Error::MissingApiKey);
        }

        let zbd_api = ZbdApi::new(
            &settings.api_key,
            Some(&settings.api_url),
            settings.timeout_ms,
        )?;

        tracing::info!("Created ZBD backend for unit {}", unit);

        Ok(Self {
            zbd_api,
            unit,
            callback_url: settings.callback_url.filter(|url| !url.is_empty()),
            redis_url: settings.redis_url.filter(|url| !url.is_empty()),
            invoice_expiry_secs: settings.invoice_expiry_secs,
            invoice_description: settings.invoice_description,
            rate_cache,
            wait_invoice_cancel_token: Arc::new(Mutex::new(CancellationToken::new())),
            wait_invoice_streams: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Unit this backend operates in
    pub fn unit(&self) -> CurrencyUnit {
        self.unit
    }

    /// Exchange rate cache used for USD invoices
    pub fn rate_cache(&self) -> &RateCache {
        &self.rate_cache
    }

    /// BTC/USD rate recent enough to price an invoice with
    pub async fn get_exchange_rate(&self) -> Result<f64, Error> {
        self.rate_cache.get_exchange_rate(&self.zbd_api).await
    }

    /// Open a paid invoice stream over an already subscribed `source`
    ///
    /// The stream is bound to this backend's wait-invoice lifecycle:
    /// [`LightningBackend::cancel_wait_invoice`] ends it.
    pub fn paid_invoices_stream_from(&self, source: Box<dyn MessageSource>) -> PaidInvoiceStream {
        let cancel_token = self.wait_invoice_cancel_token.lock().child_token();

        PaidInvoiceStream::new(
            source,
            PAID_INVOICES_CHANNEL,
            cancel_token,
            Arc::clone(&self.wait_invoice_streams),
        )
    }

    /// Amount in millisatoshis as ZBD expects it
    async fn to_msats(&self, amount: &Amount) -> Result<u64, Error> {
        match amount.unit {
            CurrencyUnit::Sat => sats_to_msats(amount.value),
            CurrencyUnit::Usd => {
                let rate = self.get_exchange_rate().await?;
                let msats = cents_to_msats(amount.value, rate)?;
                tracing::debug!(
                    "Converted {} cents to {} msats at {} USD/BTC",
                    amount.value,
                    msats,
                    rate
                );
                Ok(msats)
            }
            unit => Err(Error::UnsupportedUnit(unit)),
        }
    }

    fn charge_request(&self, amount_msats: u64, memo: Option<String>) -> ChargeRequest {
        ChargeRequest {
            amount: amount_msats.to_string(),
            description: memo
                .filter(|memo| !memo.is_empty())
                .unwrap_or_else(|| self.invoice_description.clone()),
            expires_in: self.invoice_expiry_secs,
            callback_url: self.callback_url.clone(),
        }
    }
}

#[async_trait]
impl LightningBackend for Zbd {
    fn supported_units(&self) -> &'static [CurrencyUnit] {
        SUPPORTED_UNITS
    }

    fn supports_melt(&self) -> bool {
        false
    }

    fn get_settings(&self) -> SettingsResponse {
        SettingsResponse {
            unit: self.unit,
            bolt11: Bolt11Settings {
                mpp: false,
                amountless: false,
                invoice_description: true,
            },
            melt_enabled: false,
            incoming_payment_stream: true,
        }
    }

    async fn status(&self) -> StatusResponse {
        match self.zbd_api.get_wallet().await {
            Ok(wallet) => StatusResponse {
                balance: Amount::sat(wallet.balance / MSATS_PER_SAT),
                error_message: None,
            },
            Err(err) => {
                tracing::warn!("ZBD status check failed: {}", err);
                StatusResponse {
                    balance: Amount::sat(0),
                    error_message: Some(format!("ZBD status check failed: {}", err)),
                }
            }
        }
    }

    async fn create_invoice(&self, amount: Amount, memo: Option<String>) -> InvoiceResponse {
        if !SUPPORTED_UNITS.contains(&amount.unit) {
            return InvoiceResponse::failed(Error::UnsupportedUnit(amount.unit).to_string());
        }

        let amount_msats = match self.to_msats(&amount).await {
            Ok(msats) => msats,
            Err(err @ Error::RateUnavailable(_)) => {
                tracing::warn!("Cannot price {} invoice: {}", amount, err);
                return InvoiceResponse::failed(format!("Exchange rate error: {}", err));
            }
            Err(err) => return InvoiceResponse::failed(err.to_string()),
        };

        let request = self.charge_request(amount_msats, memo);

        match self.zbd_api.create_charge(&request).await {
            Ok(charge) => match charge.invoice {
                Some(invoice) => {
                    tracing::debug!("Created ZBD charge {} for {}", charge.id, amount);
                    InvoiceResponse::created(charge.id, invoice.request)
                }
                None => InvoiceResponse::failed(format!(
                    "ZBD create_invoice failed: charge {} has no invoice",
                    charge.id
                )),
            },
            Err(err) => {
                tracing::warn!("ZBD create_invoice failed: {}", err);
                InvoiceResponse::failed(format!("ZBD create_invoice failed: {}", err))
            }
        }
    }

    async fn get_invoice_status(&self, checking_id: &str) -> PaymentStatus {
        match self.zbd_api.get_charge(checking_id).await {
            Ok(charge) => PaymentStatus::new(PaymentResult::from(charge.status)),
            Err(err) => {
                tracing::warn!("ZBD get_invoice_status failed for {}: {}", checking_id, err);
                PaymentStatus::unknown(format!("ZBD get_invoice_status failed: {}", err))
            }
        }
    }

    async fn pay_invoice(
        &self,
        _quote: &MeltQuote,
        _fee_limit_msat: u64,
    ) -> Result<PaymentResponse, Error> {
        Err(Error::Unsupported("Melt (pay_invoice) is disabled for ZBD"))
    }

    async fn get_payment_status(&self, _checking_id: &str) -> Result<PaymentStatus, Error> {
        Err(Error::Unsupported("Melt (get_payment_status) is disabled for ZBD"))
    }

    async fn get_payment_quote(
        &self,
        _request: &MeltQuoteRequest,
    ) -> Result<PaymentQuoteResponse, Error> {
        Err(Error::Unsupported("Melt (get_payment_quote) is disabled for ZBD"))
    }

    #[cfg(feature = "redis")]
    async fn paid_invoices_stream(&self) -> Result<PaidInvoiceStream, Error> {
        let redis_url = self
            .redis_url
            .as_deref()
            .ok_or(Error::MissingStreamEndpoint)?;

        let source = stream::RedisMessageSource::connect(redis_url, PAID_INVOICES_CHANNEL).await?;

        Ok(self.paid_invoices_stream_from(Box::new(source)))
    }

    #[cfg(not(feature = "redis"))]
    async fn paid_invoices_stream(&self) -> Result<PaidInvoiceStream, Error> {
        Err(Error::StreamTransportUnavailable)
    }

    fn is_wait_invoice_active(&self) -> bool {
        self.wait_invoice_streams.load(Ordering::SeqCst) > 0
    }

    fn cancel_wait_invoice(&self) {
        let mut cancel_token = self.wait_invoice_cancel_token.lock();
        cancel_token.cancel();
        *cancel_token = CancellationToken::new();
    }
}
