//! Official central-bank exchange-rate source.
//!
//! Scrapes the USD and EUR reference rates from the central bank's homepage
//! HTML. Extraction is regex-based with two layers: the structured
//! `<span>USD</span> … <strong>NNN,NN</strong>` markup the page normally
//! carries, then looser currency-context patterns when the markup shifts.
//! Candidates outside the plausible range for each currency are discarded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
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

const OFFICIAL_URL: &str = "https://www.bcv.org.ve";
const OFFICIAL_SOURCE: &str = "official";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// Plausible ranges; anything outside is page noise, not a rate.
const USD_RANGE: RangeInclusive<f64> = 150.0..=250.0;
const EUR_RANGE: RangeInclusive<f64> = 180.0..=280.0;

// Static defaults when nothing was ever fetched successfully.
const FALLBACK_USD: f64 = 189.0;
const FALLBACK_EUR: f64 = 221.0;

static STRUCTURED_USD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<span>\s*USD\s*</span>.{0,200}?<strong>\s*(\d{1,3}(?:[.,]\d+)?)\s*</strong>")
        .expect("structured USD pattern")
});
static STRUCTURED_EUR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<span>\s*EUR\s*</span>.{0,200}?<strong>\s*(\d{1,3}(?:[.,]\d+)?)\s*</strong>")
        .expect("structured EUR pattern")
});
static LOOSE_USD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:USD|d[oó]lar)[^0-9]{0,80}(\d{1,3}[.,]\d{2,})").expect("loose USD pattern")
});
static LOOSE_EUR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:EUR|euro)[^0-9]{0,80}(\d{1,3}[.,]\d{2,})").expect("loose EUR pattern")
});

/// Official reference rates for one scrape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficialRates {
    /// Local currency per USD.
    pub usd: f64,
    /// Local currency per EUR.
    pub eur: f64,
    pub as_of: DateTime<Utc>,
    /// Provenance marker; fallback payloads are labeled so the UI can show
    /// a staleness indicator.
    pub source: String,
}

/// Rates extracted from the page, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOfficialRates {
    pub usd: Option<f64>,
    pub eur: Option<f64>,
}

/// Adapter scraping the central-bank homepage.
pub struct OfficialRatesAdapter {
    http: reqwest::Client,
    url: String,
    request_timeout: Duration,
    cache: Arc<LastKnownGood<OfficialRates>>,
}

impl OfficialRatesAdapter {
    /// Create an adapter feeding and falling back on the given store.
    pub fn new(cache: Arc<LastKnownGood<OfficialRates>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: OFFICIAL_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            cache,
        }
    }

    /// Override the page URL (tests, mirrors).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Override the per-attempt request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn extract(html: &str, structured: &Regex, loose: &Regex, range: &RangeInclusive<f64>) -> Option<f64> {
        if let Some(captures) = structured.captures(html) {
            if let Some(rate) = parse_rate(&captures[1]) {
                if range.contains(&rate) {
                    return Some(rate);
                }
            }
        }

        // The markup moved; look for any number in currency context.
        for captures in loose.captures_iter(html) {
            if let Some(rate) = parse_rate(&captures[1]) {
                if range.contains(&rate) {
                    return Some(rate);
                }
                debug!(rate, "discarding out-of-range rate candidate");
            }
        }

        None
    }
}

#[async_trait]
impl SourceAdapter for OfficialRatesAdapter {
    type Raw = String;
    type Parsed = ParsedOfficialRates;
    type Output = OfficialRates;

    fn name(&self) -> &str {
        "official-rates"
    }

    async fn fetch(&self) -> Result<String, SourceError> {
        let response = self
            .http
            .get(&self.url)
            .header("User-Agent", USER_AGENT)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "es-VE,es;q=0.9,en;q=0.8")
            .header("Cache-Control", "no-cache")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(into_source_error)?;

        check_status(&response)?;
        response.text().await.map_err(into_source_error)
    }

    fn parse(&self, raw: String) -> Result<ParsedOfficialRates, SourceError> {
        if raw.trim().is_empty() {
            return Err(SourceError::Parse("empty page body".into()));
        }

        Ok(ParsedOfficialRates {
            usd: Self::extract(&raw, &STRUCTURED_USD, &LOOSE_USD, &USD_RANGE),
            eur: Self::extract(&raw, &STRUCTURED_EUR, &LOOSE_EUR, &EUR_RANGE),
        })
    }

    fn validate(&self, parsed: &ParsedOfficialRates) -> Result<(), SourceError> {
        if parsed.usd.is_none() && parsed.eur.is_none() {
            return Err(SourceError::Validation(
                "failed to extract USD and EUR rates".into(),
            ));
        }
        for rate in [parsed.usd, parsed.eur].into_iter().flatten() {
            if rate <= 0.0 {
                return Err(SourceError::Validation(format!(
                    "exchange rate must be positive, got {rate}"
                )));
            }
        }
        Ok(())
    }

    fn transform(&self, parsed: ParsedOfficialRates) -> OfficialRates {
        let rates = OfficialRates {
            usd: round2(parsed.usd.unwrap_or(FALLBACK_USD)),
            eur: round2(parsed.eur.unwrap_or(FALLBACK_EUR)),
            as_of: Utc::now(),
            source: if parsed.usd.is_some() && parsed.eur.is_some() {
                OFFICIAL_SOURCE.to_string()
            } else {
                format!("{OFFICIAL_SOURCE} (partial)")
            },
        };
        self.cache.store(rates.clone());
        rates
    }

    fn fallback(&self, _error: &SourceError) -> Option<OfficialRates> {
        match self.cache.stale_copy() {
            Some((mut rates, age)) => {
                rates.source = format!("{OFFICIAL_SOURCE} (stale {}s)", age.as_secs());
                Some(rates)
            }
            None => Some(OfficialRates {
                usd: FALLBACK_USD,
                eur: FALLBACK_EUR,
                as_of: Utc::now(),
                source: format!("{OFFICIAL_SOURCE} (fallback)"),
            }),
        }
    }
}

/// Build the registered official-rates source for this process.
pub fn official_rates_source(
    profile: ExecutionProfile,
    registry: Arc<HealthRegistry>,
) -> ResilientSource<OfficialRatesAdapter> {
    let cache = Arc::new(LastKnownGood::new());
    ResilientSource::new(
        OfficialRatesAdapter::new(cache),
        SourceConfig::official_rates(profile),
        registry,
    )
}

fn parse_rate(text: &str) -> Option<f64> {
    let cleaned: String = text.replace(',', ".").split_whitespace().collect();
    cleaned.parse::<f64>().ok()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> OfficialRatesAdapter {
        OfficialRatesAdapter::new(Arc::new(LastKnownGood::new()))
    }

    const STRUCTURED_PAGE: &str = r#"
        <div id="dolar"><span>USD</span><strong> 189,45 </strong></div>
        <div id="euro"><span>EUR</span><strong> 221,30 </strong></div>
    "#;

    #[test]
    fn parses_structured_markup_with_comma_decimals() {
        let parsed = adapter().parse(STRUCTURED_PAGE.to_string()).unwrap();
        assert_eq!(parsed.usd, Some(189.45));
        assert_eq!(parsed.eur, Some(221.30));
    }

    #[test]
    fn falls_back_to_loose_currency_context() {
        let page = "Tipo de cambio del dólar: 190.10 — euro: 223.55".to_string();
        let parsed = adapter().parse(page).unwrap();
        assert_eq!(parsed.usd, Some(190.10));
        assert_eq!(parsed.eur, Some(223.55));
    }

    #[test]
    fn rejects_out_of_range_candidates() {
        // 1.50 and 999.99 are page noise, not rates.
        let page = "USD 1,50 something USD 999,99 EUR 5,00".to_string();
        let parsed = adapter().parse(page).unwrap();
        assert_eq!(parsed.usd, None);
        assert_eq!(parsed.eur, None);
    }

    #[test]
    fn validation_requires_at_least_one_rate() {
        let parsed = ParsedOfficialRates {
            usd: None,
            eur: None,
        };
        assert!(matches!(
            adapter().validate(&parsed),
            Err(SourceError::Validation(_))
        ));

        let partial = ParsedOfficialRates {
            usd: Some(189.45),
            eur: None,
        };
        assert!(adapter().validate(&partial).is_ok());
    }

    #[test]
    fn transform_rounds_and_primes_the_cache() {
        let cache = Arc::new(LastKnownGood::new());
        let adapter = OfficialRatesAdapter::new(cache.clone());

        let rates = adapter.transform(ParsedOfficialRates {
            usd: Some(189.4567),
            eur: Some(221.304),
        });

        assert_eq!(rates.usd, 189.46);
        assert_eq!(rates.eur, 221.30);
        assert_eq!(rates.source, "official");
        assert!(cache.is_primed());
    }

    #[test]
    fn fallback_prefers_last_known_good() {
        let cache = Arc::new(LastKnownGood::new());
        let adapter = OfficialRatesAdapter::new(cache.clone());

        // Nothing cached yet: static defaults, labeled as fallback.
        let error = SourceError::transport("connection reset");
        let cold = adapter.fallback(&error).unwrap();
        assert_eq!(cold.usd, FALLBACK_USD);
        assert_eq!(cold.source, "official (fallback)");

        adapter.transform(ParsedOfficialRates {
            usd: Some(190.00),
            eur: Some(222.00),
        });

        let stale = adapter.fallback(&error).unwrap();
        assert_eq!(stale.usd, 190.00);
        assert!(stale.source.starts_with("official (stale"));
    }

    #[test]
    fn empty_page_is_a_parse_error() {
        assert!(matches!(
            adapter().parse("   ".to_string()),
            Err(SourceError::Parse(_))
        ));
    }
}
