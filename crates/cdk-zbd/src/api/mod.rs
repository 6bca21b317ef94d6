//! ZBD API client
//!
//! Thin binding to the four ZBD endpoints the backend needs.
//! See <https://docs.zbdpay.com/> for the complete API reference.
//!
//! # Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | GET | `/v1/wallet` | Wallet balance in millisatoshis |
//! | GET | `/v1/btcusd` | Current BTC/USD price |
//! | POST | `/v1/charges` | Create a charge (BOLT11 invoice) |
//! | GET | `/v1/charges/{id}` | Get charge by ID |
//!
//! # Authentication
//!
//! Every request carries the static project key in the `apikey` header.
//!
//! # Timeouts
//!
//! The underlying client is built with a fixed per-request timeout. A timeout is
//! reported as an ordinary [`Error::Reqwest`].

pub mod error;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use error::Error;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use types::*;
use url::Url;

use crate::rate::RateSource;

/// Production ZBD API endpoint
pub const DEFAULT_API_URL: &str = "https://api.zebedee.io";

/// ZBD API client
#[derive(Clone)]
pub struct ZbdApi {
    api_key: String,
    base_url: Url,
    client: Client,
}

impl std::fmt::Debug for ZbdApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZbdApi")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ZbdApi {
    /// Create a new ZBD API client
    ///
    /// No request is made here.
    pub fn new(api_key: &str, api_url: Option<&str>, timeout_ms: u64) -> Result<Self, Error> {
        let base_url = Url::parse(api_url.unwrap_or(DEFAULT_API_URL))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self {
            api_key: api_key.to_string(),
            base_url,
            client,
        })
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Make a GET request
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.base_url.join(path)?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header("apikey", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Make a POST request
    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, Error> {
        let url = self.base_url.join(path)?;
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, Error> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(serde_json::from_str(&text)?)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(Error::NotFound)
        } else {
            warn!("ZBD API error: {} - {}", status, text);
            Err(Error::from_response(status.as_u16(), &text))
        }
    }

    /// Get the wallet balance in millisatoshis
    pub async fn get_wallet(&self) -> Result<WalletData, Error> {
        let response: ZbdResponse<WalletData> = self.get("/v1/wallet").await?;
        Ok(response.data)
    }

    /// Get the current BTC/USD price
    ///
    /// The price is returned as reported; [`crate::rate::RateCache`] rejects
    /// non-positive values.
    pub async fn get_btc_usd_rate(&self) -> Result<f64, Error> {
        let response: ZbdResponse<BtcUsdData> = self.get("/v1/btcusd").await?;
        Ok(response.data.btc_usd_price)
    }

    /// Create a charge
    pub async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge, Error> {
        let response: ZbdResponse<Charge> = self.post("/v1/charges", request).await?;
        Ok(response.data)
    }

    /// Get a charge by ID
    pub async fn get_charge(&self, charge_id: &str) -> Result<Charge, Error> {
        let response: ZbdResponse<Charge> = self.get(&format!("/v1/charges/{}", charge_id)).await?;
        Ok(response.data)
    }
}

#[async_trait]
impl RateSource for ZbdApi {
    async fn fetch_btc_usd_rate(&self) -> Result<f64, Error> {
        self.get_btc_usd_rate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_client() {
        let client = ZbdApi::new("test_key", None, 30000).unwrap();
        assert_eq!(client.base_url().as_str(), "https://api.zebedee.io/");
    }

    #[test]
    fn test_new_client_custom_url() {
        let client = ZbdApi::new("test_key", Some("http://127.0.0.1:8080"), 1000).unwrap();
        assert_eq!(
            client.base_url().join("/v1/charges/abc").unwrap().as_str(),
            "http://127.0.0.1:8080/v1/charges/abc"
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            ZbdApi::new("test_key", Some("not a url"), 1000),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = ZbdApi::new("super_secret", None, 30000).unwrap();
        assert!(!format!("{:?}", client).contains("super_secret"));
    }
}
