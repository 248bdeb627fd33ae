//! Peer-to-peer exchange-rate source.
//!
//! Queries a P2P advertisement search API for USDT offers in the local
//! currency, both sides of the book, and reduces them to sell/buy
//! statistics. Offer prices are noisy: out-of-range listings and outliers
//! are dropped before the stats are computed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use cambio_resilience::{
    ExecutionProfile, HealthRegistry, ResilientSource, SourceAdapter, SourceConfig, SourceError,
};

use crate::fallback::LastKnownGood;
use crate::transport::{check_status, into_source_error};

const P2P_API_URL: &str = "https://p2p.binance.com/bapi/c2c/v2/friendly/c2c/adv/search";
const P2P_SOURCE: &str = "p2p";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

const PAGES: u32 = 2;
const ROWS_PER_PAGE: u32 = 20;

// Listings outside this band are spam or mispriced, not market rates.
const PRICE_RANGE: RangeInclusive<f64> = 100.0..=500.0;

// Static defaults when nothing was ever fetched successfully.
const FALLBACK_SELL: f64 = 196.0;
const FALLBACK_BUY: f64 = 193.5;

/// Price statistics for one side of the book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateStats {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    /// Offers that survived filtering.
    pub offers: usize,
}

/// Reduced peer-to-peer market view for one scrape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pRates {
    pub sell: RateStats,
    pub buy: RateStats,
    /// Midpoint of the two sides' averages.
    pub usdt_ves: f64,
    /// Sell average minus buy average.
    pub spread: f64,
    pub as_of: DateTime<Utc>,
    /// Provenance marker; fallback payloads are labeled so the UI can show
    /// a staleness indicator.
    pub source: String,
}

/// Offer prices per side, as returned by the API.
#[derive(Debug, Clone, Default)]
pub struct RawOffers {
    pub sell: Vec<String>,
    pub buy: Vec<String>,
}

/// Offer prices per side, parsed to numbers but not yet filtered.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOffers {
    pub sell: Vec<f64>,
    pub buy: Vec<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    asset: &'a str,
    fiat: &'a str,
    trade_type: &'a str,
    page: u32,
    rows: u32,
    pay_types: &'a [&'a str],
    publisher_type: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Option<Vec<SearchAdvertisement>>,
}

#[derive(Debug, Deserialize)]
struct SearchAdvertisement {
    adv: Option<Advertisement>,
}

#[derive(Debug, Deserialize)]
struct Advertisement {
    price: Option<String>,
}

fn pluck_prices(response: SearchResponse) -> Vec<String> {
    response
        .data
        .unwrap_or_default()
        .into_iter()
        .filter_map(|ad| ad.adv.and_then(|adv| adv.price))
        .collect()
}

/// Adapter querying the P2P advertisement API.
pub struct P2pRatesAdapter {
    http: reqwest::Client,
    url: String,
    asset: String,
    fiat: String,
    request_timeout: Duration,
    cache: Arc<LastKnownGood<P2pRates>>,
}

impl P2pRatesAdapter {
    /// Create an adapter feeding and falling back on the given store.
    pub fn new(cache: Arc<LastKnownGood<P2pRates>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: P2P_API_URL.to_string(),
            asset: "USDT".to_string(),
            fiat: "VES".to_string(),
            request_timeout: Duration::from_secs(10),
            cache,
        }
    }

    /// Override the API URL (tests, mirrors).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Override the per-attempt request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn fetch_offers(&self, trade_type: &str) -> Result<Vec<String>, SourceError> {
        let mut prices = Vec::new();

        for page in 1..=PAGES {
            let body = SearchRequest {
                asset: &self.asset,
                fiat: &self.fiat,
                trade_type,
                page,
                rows: ROWS_PER_PAGE,
                pay_types: &[],
                publisher_type: None,
            };

            let response = self
                .http
                .post(&self.url)
                .header("User-Agent", USER_AGENT)
                .json(&body)
                .timeout(self.request_timeout)
                .send()
                .await
                .map_err(into_source_error)?;

            check_status(&response)?;

            let parsed: SearchResponse = response.json().await.map_err(into_source_error)?;
            prices.extend(pluck_prices(parsed));
        }

        Ok(prices)
    }
}

#[async_trait]
impl SourceAdapter for P2pRatesAdapter {
    type Raw = RawOffers;
    type Parsed = ParsedOffers;
    type Output = P2pRates;

    fn name(&self) -> &str {
        "p2p-rates"
    }

    async fn fetch(&self) -> Result<RawOffers, SourceError> {
        let (sell, buy) =
            futures::try_join!(self.fetch_offers("SELL"), self.fetch_offers("BUY"))?;
        Ok(RawOffers { sell, buy })
    }

    fn parse(&self, raw: RawOffers) -> Result<ParsedOffers, SourceError> {
        let to_numbers = |prices: Vec<String>| {
            prices
                .into_iter()
                .filter_map(|text| match text.trim().parse::<f64>() {
                    Ok(price) => Some(price),
                    Err(_) => {
                        debug!(price = %text, "skipping unparseable offer price");
                        None
                    }
                })
                .collect::<Vec<f64>>()
        };

        Ok(ParsedOffers {
            sell: to_numbers(raw.sell),
            buy: to_numbers(raw.buy),
        })
    }

    fn validate(&self, parsed: &ParsedOffers) -> Result<(), SourceError> {
        if parsed.sell.is_empty() && parsed.buy.is_empty() {
            return Err(SourceError::Validation("no valid offers found".into()));
        }
        for price in parsed.sell.iter().chain(parsed.buy.iter()) {
            if *price <= 0.0 {
                return Err(SourceError::Validation(format!(
                    "offer price must be positive, got {price}"
                )));
            }
        }
        Ok(())
    }

    fn transform(&self, parsed: ParsedOffers) -> P2pRates {
        let sell = side_stats(&parsed.sell);
        let buy = side_stats(&parsed.buy);

        let usdt_ves = match (sell.offers, buy.offers) {
            (0, 0) => 0.0,
            (_, 0) => sell.avg,
            (0, _) => buy.avg,
            _ => round2((sell.avg + buy.avg) / 2.0),
        };
        let spread = if sell.offers > 0 && buy.offers > 0 {
            round2(sell.avg - buy.avg)
        } else {
            0.0
        };

        let rates = P2pRates {
            sell,
            buy,
            usdt_ves,
            spread,
            as_of: Utc::now(),
            source: P2P_SOURCE.to_string(),
        };
        self.cache.store(rates.clone());
        rates
    }

    fn fallback(&self, _error: &SourceError) -> Option<P2pRates> {
        match self.cache.stale_copy() {
            Some((mut rates, age)) => {
                rates.source = format!("{P2P_SOURCE} (stale {}s)", age.as_secs());
                Some(rates)
            }
            None => {
                let sell = RateStats {
                    min: FALLBACK_SELL,
                    avg: FALLBACK_SELL,
                    max: FALLBACK_SELL,
                    offers: 0,
                };
                let buy = RateStats {
                    min: FALLBACK_BUY,
                    avg: FALLBACK_BUY,
                    max: FALLBACK_BUY,
                    offers: 0,
                };
                Some(P2pRates {
                    usdt_ves: round2((FALLBACK_SELL + FALLBACK_BUY) / 2.0),
                    spread: round2(FALLBACK_SELL - FALLBACK_BUY),
                    sell,
                    buy,
                    as_of: Utc::now(),
                    source: format!("{P2P_SOURCE} (fallback)"),
                })
            }
        }
    }
}

/// Build the registered peer-to-peer source for this process.
pub fn p2p_rates_source(
    profile: ExecutionProfile,
    registry: Arc<HealthRegistry>,
) -> ResilientSource<P2pRatesAdapter> {
    let cache = Arc::new(LastKnownGood::new());
    ResilientSource::new(
        P2pRatesAdapter::new(cache),
        SourceConfig::p2p_rates(profile),
        registry,
    )
}

/// Range-filter, outlier-filter and reduce one side of the book.
fn side_stats(prices: &[f64]) -> RateStats {
    let plausible: Vec<f64> = prices
        .iter()
        .copied()
        .filter(|price| PRICE_RANGE.contains(price))
        .collect();
    let kept = drop_outliers(&plausible);

    if kept.is_empty() {
        return RateStats::default();
    }

    let min = kept.iter().copied().fold(f64::INFINITY, f64::min);
    let max = kept.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = kept.iter().sum::<f64>() / kept.len() as f64;

    RateStats {
        min: round2(min),
        avg: round2(avg),
        max: round2(max),
        offers: kept.len(),
    }
}

/// Drop prices more than two standard deviations from the mean.
fn drop_outliers(prices: &[f64]) -> Vec<f64> {
    if prices.len() < 3 {
        return prices.to_vec();
    }

    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    let variance =
        prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / prices.len() as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return prices.to_vec();
    }

    prices
        .iter()
        .copied()
        .filter(|p| (p - mean).abs() <= 2.0 * std_dev)
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> P2pRatesAdapter {
        P2pRatesAdapter::new(Arc::new(LastKnownGood::new()))
    }

    #[test]
    fn plucks_prices_from_response_payload() {
        let payload = r#"{
            "data": [
                {"adv": {"price": "195.50"}},
                {"adv": {"price": "196.20"}},
                {"adv": null},
                {"adv": {"price": null}}
            ]
        }"#;
        let response: SearchResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(pluck_prices(response), vec!["195.50", "196.20"]);
    }

    #[test]
    fn parse_skips_unparseable_prices() {
        let raw = RawOffers {
            sell: vec!["195.50".into(), "n/a".into(), "196.20".into()],
            buy: vec!["193.00".into()],
        };
        let parsed = adapter().parse(raw).unwrap();
        assert_eq!(parsed.sell, vec![195.50, 196.20]);
        assert_eq!(parsed.buy, vec![193.00]);
    }

    #[test]
    fn zero_price_fails_validation() {
        let parsed = ParsedOffers {
            sell: vec![195.50, 0.0],
            buy: vec![193.00],
        };
        assert!(matches!(
            adapter().validate(&parsed),
            Err(SourceError::Validation(_))
        ));
    }

    #[test]
    fn empty_book_fails_validation() {
        let parsed = ParsedOffers {
            sell: vec![],
            buy: vec![],
        };
        assert!(adapter().validate(&parsed).is_err());

        let one_sided = ParsedOffers {
            sell: vec![195.50],
            buy: vec![],
        };
        assert!(adapter().validate(&one_sided).is_ok());
    }

    #[test]
    fn side_stats_filters_range_and_outliers() {
        // 50 and 900 are outside the plausible band; 320 is a 2-sigma
        // outlier against the tight cluster.
        let prices = vec![195.0, 196.0, 197.0, 195.5, 196.5, 50.0, 900.0, 320.0];
        let stats = side_stats(&prices);

        assert_eq!(stats.offers, 5);
        assert_eq!(stats.min, 195.0);
        assert_eq!(stats.max, 197.0);
        assert!((stats.avg - 196.0).abs() < 0.1);
    }

    #[test]
    fn transform_computes_mid_and_spread() {
        let cache = Arc::new(LastKnownGood::new());
        let adapter = P2pRatesAdapter::new(cache.clone());

        let rates = adapter.transform(ParsedOffers {
            sell: vec![196.0, 196.0],
            buy: vec![194.0, 194.0],
        });

        assert_eq!(rates.sell.avg, 196.0);
        assert_eq!(rates.buy.avg, 194.0);
        assert_eq!(rates.usdt_ves, 195.0);
        assert_eq!(rates.spread, 2.0);
        assert_eq!(rates.source, "p2p");
        assert!(cache.is_primed());
    }

    #[test]
    fn fallback_prefers_last_known_good() {
        let cache = Arc::new(LastKnownGood::new());
        let adapter = P2pRatesAdapter::new(cache.clone());
        let error = SourceError::transport("connection reset");

        let cold = adapter.fallback(&error).unwrap();
        assert_eq!(cold.sell.avg, FALLBACK_SELL);
        assert_eq!(cold.source, "p2p (fallback)");

        adapter.transform(ParsedOffers {
            sell: vec![198.0],
            buy: vec![195.0],
        });

        let stale = adapter.fallback(&error).unwrap();
        assert_eq!(stale.sell.avg, 198.0);
        assert!(stale.source.starts_with("p2p (stale"));
    }
}
