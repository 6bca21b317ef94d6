//! BTC/USD exchange rate caching and USD conversion
//!
//! USD invoices are priced in cents but ZBD charges are denominated in
//! millisatoshis, so every USD invoice needs a recent BTC/USD rate.
//!
//! # Caching Strategy
//!
//! - Fresh (younger than [`RATE_CACHE_TTL`]): served from the cache, no request.
//! - Stale (younger than [`RATE_CIRCUIT_BREAKER_TTL`]): a refresh is attempted; if
//!   it fails the cached rate is served.
//! - Expired: a refresh must succeed, otherwise [`Error::RateUnavailable`].
//!
//! The cache keeps the last rate forever but never serves it past the circuit
//! breaker window. Concurrent refreshes race freely; the last write wins.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::api::error::Error as ZbdApiError;
use crate::error::Error;

/// Age under which a cached rate is served without refreshing
pub const RATE_CACHE_TTL: Duration = Duration::from_secs(300);
/// Age under which a cached rate may stand in for a failed refresh
pub const RATE_CIRCUIT_BREAKER_TTL: Duration = Duration::from_secs(900);

/// Millisatoshis per satoshi
pub const MSATS_PER_SAT: u64 = 1000;

/// Seconds since the unix epoch
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// BTC/USD rate observed at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeRate {
    rate: f64,
    observed_at: u64,
}

impl ExchangeRate {
    /// Rate observed now
    pub fn new(rate: f64) -> Result<Self, Error> {
        Self::at(rate, unix_time())
    }

    /// Rate observed at `observed_at` (unix seconds)
    ///
    /// Fails with [`Error::InvalidRate`] unless `rate` is positive and finite.
    pub fn at(rate: f64, observed_at: u64) -> Result<Self, Error> {
        let rate = validate_rate(rate).map_err(|_| Error::InvalidRate(rate))?;
        Ok(Self { rate, observed_at })
    }

    /// US dollars per bitcoin
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Unix timestamp of the observation
    pub fn observed_at(&self) -> u64 {
        self.observed_at
    }

    /// Age of the observation at `now`
    pub fn age(&self, now: u64) -> Duration {
        Duration::from_secs(now.saturating_sub(self.observed_at))
    }

    /// Whether the rate can be served without refreshing
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(unix_time())
    }

    /// [`Self::is_fresh`] evaluated at `now`
    pub fn is_fresh_at(&self, now: u64) -> bool {
        self.age(now) < RATE_CACHE_TTL
    }

    /// Whether the rate can stand in for a failed refresh
    pub fn is_usable(&self) -> bool {
        self.is_usable_at(unix_time())
    }

    /// [`Self::is_usable`] evaluated at `now`
    pub fn is_usable_at(&self, now: u64) -> bool {
        self.age(now) < RATE_CIRCUIT_BREAKER_TTL
    }
}

/// Provider of live BTC/USD rates
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Fetch the current price of one bitcoin in US dollars
    async fn fetch_btc_usd_rate(&self) -> Result<f64, ZbdApiError>;
}

/// Shared holder of the most recent exchange rate
///
/// Clones share the same slot, so every backend instance built from one cache
/// sees the same rate.
#[derive(Debug, Clone, Default)]
pub struct RateCache {
    current: Arc<RwLock<Option<ExchangeRate>>>,
}

impl RateCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Last stored rate, however old
    pub fn get_cached(&self) -> Option<ExchangeRate> {
        *self.current.read()
    }

    /// Replace the stored rate
    pub fn store(&self, rate: ExchangeRate) {
        *self.current.write() = Some(rate);
    }

    /// Get a BTC/USD rate recent enough to price an invoice with
    ///
    /// See the [module documentation](self) for the freshness policy.
    pub async fn get_exchange_rate<S>(&self, source: &S) -> Result<f64, Error>
    where
        S: RateSource + ?Sized,
    {
        if let Some(cached) = self.get_cached().filter(ExchangeRate::is_fresh) {
            return Ok(cached.rate());
        }

        let fetched = source
            .fetch_btc_usd_rate()
            .await
            .and_then(validate_rate);

        match fetched {
            Ok(rate) => {
                debug!("Fetched BTC/USD rate {}", rate);
                self.store(ExchangeRate {
                    rate,
                    observed_at: unix_time(),
                });
                Ok(rate)
            }
            Err(err) => match self.get_cached().filter(ExchangeRate::is_usable) {
                Some(cached) => {
                    warn!(
                        "Exchange rate refresh failed, using cached rate {} from {}: {}",
                        cached.rate(),
                        cached.observed_at(),
                        err
                    );
                    Ok(cached.rate())
                }
                None => Err(Error::RateUnavailable(err)),
            },
        }
    }
}

fn validate_rate(rate: f64) -> Result<f64, ZbdApiError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(ZbdApiError::InvalidRate(rate))
    }
}

/// Convert US cents to millisatoshis at `btc_usd_rate` dollars per bitcoin
///
/// The result is rounded up to a whole satoshi, so it is always a multiple of
/// [`MSATS_PER_SAT`] and never less than the exact value. Amounts too large for
/// a `u64` of millisatoshis fail with [`Error::AmountOverflow`].
pub fn cents_to_msats(cents: u64, btc_usd_rate: f64) -> Result<u64, Error> {
    validate_rate(btc_usd_rate).map_err(|_| Error::InvalidRate(btc_usd_rate))?;

    if cents == 0 {
        return Ok(0);
    }

    // cents / 100 / rate * 100_000_000, with a single division
    let sats = (cents as f64 * 1_000_000.0 / btc_usd_rate).ceil();

    if !sats.is_finite() || sats >= u64::MAX as f64 / MSATS_PER_SAT as f64 {
        return Err(Error::AmountOverflow);
    }

    (sats as u64)
        .checked_mul(MSATS_PER_SAT)
        .ok_or(Error::AmountOverflow)
}

/// Convert satoshis to millisatoshis
pub fn sats_to_msats(sats: u64) -> Result<u64, Error> {
    sats.checked_mul(MSATS_PER_SAT).ok_or(Error::AmountOverflow)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct MockRateSource {
        rate: Option<f64>,
        calls: AtomicUsize,
    }

    impl MockRateSource {
        fn returning(rate: f64) -> Self {
            Self {
                rate: Some(rate),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                rate: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateSource for MockRateSource {
        async fn fetch_btc_usd_rate(&self) -> Result<f64, ZbdApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rate.ok_or_else(|| ZbdApiError::Api {
                status: 503,
                message: "Service unavailable".to_string(),
            })
        }
    }

    #[test]
    fn test_freshness_windows() {
        let now = 1_700_000_000;

        let rate = ExchangeRate::at(100_000.0, now - 299).unwrap();
        assert!(rate.is_fresh_at(now));
        assert!(rate.is_usable_at(now));

        let rate = ExchangeRate::at(100_000.0, now - 300).unwrap();
        assert!(!rate.is_fresh_at(now));
        assert!(rate.is_usable_at(now));

        let rate = ExchangeRate::at(100_000.0, now - 900).unwrap();
        assert!(!rate.is_fresh_at(now));
        assert!(!rate.is_usable_at(now));

        // Observation from the future counts as age zero
        let rate = ExchangeRate::at(100_000.0, now + 10).unwrap();
        assert!(rate.is_fresh_at(now));
    }

    #[tokio::test]
    async fn test_fresh_rate_fetched_once() {
        let cache = RateCache::new();
        let source = MockRateSource::returning(100_000.0);

        assert_eq!(cache.get_exchange_rate(&source).await.unwrap(), 100_000.0);
        assert_eq!(cache.get_exchange_rate(&source).await.unwrap(), 100_000.0);
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.get_cached().unwrap().rate(), 100_000.0);
    }

    #[tokio::test]
    async fn test_stale_rate_refreshed() {
        let cache = RateCache::new();
        cache.store(ExchangeRate::at(95_000.0, unix_time() - 360).unwrap());
        let source = MockRateSource::returning(97_000.0);

        assert_eq!(cache.get_exchange_rate(&source).await.unwrap(), 97_000.0);
        assert_eq!(source.calls(), 1);
        assert!(cache.get_cached().unwrap().is_fresh());
    }

    #[tokio::test]
    async fn test_stale_rate_used_when_refresh_fails() {
        let cache = RateCache::new();
        let observed_at = unix_time() - 360;
        cache.store(ExchangeRate::at(95_000.0, observed_at).unwrap());
        let source = MockRateSource::failing();

        assert_eq!(cache.get_exchange_rate(&source).await.unwrap(), 95_000.0);
        assert_eq!(source.calls(), 1);
        // Fallback does not touch the stored observation
        assert_eq!(cache.get_cached().unwrap().observed_at(), observed_at);
    }

    #[tokio::test]
    async fn test_expired_rate_not_used() {
        let cache = RateCache::new();
        cache.store(ExchangeRate::at(95_000.0, unix_time() - 1200).unwrap());
        let source = MockRateSource::failing();

        let err = cache.get_exchange_rate(&source).await.unwrap_err();
        assert!(matches!(err, Error::RateUnavailable(ZbdApiError::Api { status: 503, .. })));
        assert!(err.to_string().contains("Failed to fetch exchange rate"));
        // The expired rate is kept as bookkeeping
        assert_eq!(cache.get_cached().unwrap().rate(), 95_000.0);
    }

    #[tokio::test]
    async fn test_empty_cache_fetch_fails() {
        let cache = RateCache::new();
        let source = MockRateSource::failing();

        assert!(matches!(
            cache.get_exchange_rate(&source).await,
            Err(Error::RateUnavailable(_))
        ));
        assert!(cache.get_cached().is_none());
    }

    #[tokio::test]
    async fn test_non_positive_rate_is_failure() {
        let cache = RateCache::new();
        for bad in [0.0, -1.0, f64::NAN] {
            let source = MockRateSource::returning(bad);
            assert!(matches!(
                cache.get_exchange_rate(&source).await,
                Err(Error::RateUnavailable(ZbdApiError::InvalidRate(_)))
            ));
        }
        assert!(cache.get_cached().is_none());

        cache.store(ExchangeRate::at(90_000.0, unix_time() - 600).unwrap());
        let source = MockRateSource::returning(0.0);
        assert_eq!(cache.get_exchange_rate(&source).await.unwrap(), 90_000.0);
    }

    #[tokio::test]
    async fn test_clones_share_rate() {
        let cache = RateCache::new();
        let other = cache.clone();
        let source = MockRateSource::returning(100_000.0);

        cache.get_exchange_rate(&source).await.unwrap();
        other.get_exchange_rate(&source).await.unwrap();
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_cents_to_msats_examples() {
        // $1.00 at $100k/BTC = 1000 sats
        let msats = cents_to_msats(100, 100_000.0).unwrap();
        assert!((1_000_000..=1_002_000).contains(&msats));
        assert_eq!(msats % 1000, 0);

        // 1 cent at $96k/BTC = 10.4166 sats, rounded up
        assert_eq!(cents_to_msats(1, 96_000.0).unwrap(), 11_000);

        assert_eq!(cents_to_msats(0, 96_000.0).unwrap(), 0);
    }

    #[test]
    fn test_cents_to_msats_overflow() {
        assert!(matches!(
            cents_to_msats(u64::MAX, 1.0),
            Err(Error::AmountOverflow)
        ));
        assert!(matches!(
            cents_to_msats(1, f64::MIN_POSITIVE),
            Err(Error::AmountOverflow)
        ));

        // Largest amounts that still fit stay whole satoshis
        let msats = cents_to_msats(10_000_000_000, 1.0).unwrap();
        assert_eq!(msats, 10_000_000_000_000_000_000);
        assert_eq!(msats % 1000, 0);
    }

    #[test]
    fn test_invalid_rates_rejected() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                ExchangeRate::at(bad, unix_time()),
                Err(Error::InvalidRate(_))
            ));
            assert!(matches!(cents_to_msats(100, bad), Err(Error::InvalidRate(_))));
        }
        assert!(ExchangeRate::new(100_000.0).is_ok());
    }

    #[test]
    fn test_cents_to_msats_never_underpays() {
        let cents_values = [0u64, 1, 2, 3, 7, 99, 100, 101, 12_345, 999_999, 10_000_000];
        let rates = [0.5, 1.0, 3_333.33, 42_123.45, 96_000.0, 100_000.0, 123_456.789, 1e7];

        for &cents in &cents_values {
            for &rate in &rates {
                let msats = cents_to_msats(cents, rate).unwrap();
                let exact = cents as f64 / 100.0 / rate * 100_000_000.0 * 1000.0;
                let epsilon = exact.abs() * 1e-9;

                assert_eq!(msats % 1000, 0, "cents={cents} rate={rate}");
                assert!(msats as f64 + epsilon >= exact, "cents={cents} rate={rate}");
                assert!((msats as f64) < exact + 1000.0 + epsilon, "cents={cents} rate={rate}");
            }
        }
    }

    #[test]
    fn test_sats_to_msats() {
        assert_eq!(sats_to_msats(1000).unwrap(), 1_000_000);
        assert!(matches!(sats_to_msats(u64::MAX), Err(Error::AmountOverflow)));
    }
}
