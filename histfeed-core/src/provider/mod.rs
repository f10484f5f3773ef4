//! Quote provider capability and selection.
//!
//! Two concrete upstream surfaces sit behind the [`QuoteProvider`] trait: the
//! per-symbol chart endpoint and the multi-symbol spark endpoint. Callers pick
//! a side via [`ProviderKind`]; the batch scheduler alternates sides to spread
//! request volume. Both sides answer point-in-time quote lookups from the same
//! quote endpoint.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{Dataset, DatasetError, DateRange};

mod chart;
mod spark;

pub use chart::ChartProvider;
pub use spark::SparkProvider;

/// Errors surfaced by quote providers.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("HTTP {status} from provider")]
    HttpStatus { status: u16 },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("no historical data returned for {symbols}")]
    NoData { symbols: String },

    #[error("table error: {0}")]
    Dataset(#[from] DatasetError),
}

/// Relative lookback accepted by the upstream range parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelativePeriod {
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "10y")]
    TenYears,
    #[serde(rename = "max")]
    Max,
}

impl RelativePeriod {
    /// The value the upstream `range=` query parameter expects.
    pub fn as_query(self) -> &'static str {
        match self {
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::TwoYears => "2y",
            Self::FiveYears => "5y",
            Self::TenYears => "10y",
            Self::Max => "max",
        }
    }

    /// Smallest preset that reaches back to `start` as seen from `today`.
    ///
    /// The spark endpoint only understands presets, so explicit windows are
    /// over-fetched to the covering preset and trimmed afterwards.
    pub fn covering(start: NaiveDate, today: NaiveDate) -> Self {
        let days = (today - start).num_days().max(0);
        match days {
            0..=31 => Self::OneMonth,
            32..=93 => Self::ThreeMonths,
            94..=186 => Self::SixMonths,
            187..=366 => Self::OneYear,
            367..=731 => Self::TwoYears,
            732..=1827 => Self::FiveYears,
            1828..=3653 => Self::TenYears,
            _ => Self::Max,
        }
    }
}

/// Fetch window for a historical request.
///
/// Exactly one form applies per call: a relative lookback for first-time
/// builds, or an explicit padded range when extending an existing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchWindow {
    Period(RelativePeriod),
    Range(DateRange),
}

/// Typed subset of the upstream quote payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteInfo {
    pub symbol: String,
    #[serde(default)]
    pub regular_market_price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
}

/// Capability over one upstream quote source.
///
/// Implementations differ only in latency and availability; callers must be
/// able to substitute either side without behavior change. Batch-level
/// failure isolation is the caller's job.
pub trait QuoteProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &'static str;

    /// Fetch daily close prices for `symbols` over `window` as a wide table.
    fn historical_close(
        &self,
        symbols: &[String],
        window: &FetchWindow,
    ) -> Result<Dataset, FetchError>;

    /// Point-in-time quote lookup for several symbols at once.
    ///
    /// Symbols the upstream does not know are absent from the map.
    fn quotes_info(&self, symbols: &[String]) -> Result<HashMap<String, QuoteInfo>, FetchError>;

    /// Point-in-time quote lookup for a single symbol.
    fn quote_info(&self, symbol: &str) -> Result<QuoteInfo, FetchError> {
        let mut quotes = self.quotes_info(&[symbol.to_string()])?;
        quotes.remove(symbol).ok_or_else(|| FetchError::NoData {
            symbols: symbol.to_string(),
        })
    }
}

/// The two upstream sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Chart,
    Spark,
}

impl ProviderKind {
    /// The alternate side.
    pub fn other(self) -> Self {
        match self {
            Self::Chart => Self::Spark,
            Self::Spark => Self::Chart,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chart => "chart",
            Self::Spark => "spark",
        }
    }

    /// Construct the provider for this side.
    pub fn build(self) -> Box<dyn QuoteProvider> {
        match self {
            Self::Chart => Box::new(ChartProvider::new()),
            Self::Spark => Box::new(SparkProvider::new()),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── shared HTTP plumbing ────────────────────────────────────────────

const MAX_RETRIES: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(500);

pub(crate) fn http_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
        .build()
        .expect("failed to build HTTP client")
}

/// GET a JSON payload with bounded retries and exponential backoff.
pub(crate) fn get_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::blocking::Client,
    url: &str,
) -> Result<T, FetchError> {
    let mut last_error = None;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let delay = BASE_DELAY * 2u32.pow(attempt - 1);
            std::thread::sleep(delay);
        }

        match client.get(url).send() {
            Ok(resp) => {
                let status = resp.status();

                if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(60);
                    last_error = Some(FetchError::RateLimited {
                        retry_after_secs: retry_after,
                    });
                    continue;
                }

                if status == reqwest::StatusCode::UNAUTHORIZED {
                    return Err(FetchError::AuthenticationRequired(
                        "quote endpoint rejected the request".into(),
                    ));
                }

                if !status.is_success() {
                    last_error = Some(FetchError::HttpStatus {
                        status: status.as_u16(),
                    });
                    continue;
                }

                return resp
                    .json()
                    .map_err(|e| FetchError::ResponseFormat(format!("bad JSON payload: {e}")));
            }
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    last_error = Some(FetchError::Network(e.to_string()));
                    continue;
                }
                return Err(FetchError::Network(e.to_string()));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| FetchError::Network("max retries exceeded".into())))
}

// ── shared response assembly ────────────────────────────────────────

/// Per-symbol close series keyed by formatted date.
pub(crate) type CloseSeries = Vec<(String, Option<f64>)>;

/// Convert upstream epoch seconds + closes into a dated series, keeping only
/// points inside the window (presets pass everything through).
pub(crate) fn close_series(
    timestamps: &[i64],
    closes: &[Option<f64>],
    window: &FetchWindow,
) -> Result<CloseSeries, FetchError> {
    let mut series = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.naive_utc().date())
            .ok_or_else(|| FetchError::ResponseFormat(format!("invalid timestamp: {ts}")))?;

        if let FetchWindow::Range(range) = window {
            if date < range.start || date > range.end {
                continue;
            }
        }

        let close = closes.get(i).copied().flatten();
        series.push((date.format("%Y-%m-%d").to_string(), close));
    }
    Ok(series)
}

/// Assemble per-symbol series into the wide table on the union date axis.
///
/// Symbols missing a date get a null there. A batch where no symbol produced
/// any point at all is an error rather than an empty table.
pub(crate) fn wide_table(series: Vec<(String, CloseSeries)>) -> Result<Dataset, FetchError> {
    let mut all_dates = BTreeSet::new();
    for (_, points) in &series {
        for (date, _) in points {
            all_dates.insert(date.clone());
        }
    }

    if all_dates.is_empty() {
        let symbols = series
            .iter()
            .map(|(s, _)| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(FetchError::NoData { symbols });
    }

    let dates: Vec<String> = all_dates.into_iter().collect();
    let mut columns = Vec::with_capacity(series.len());
    for (symbol, points) in series {
        let by_date: HashMap<&str, Option<f64>> = points
            .iter()
            .map(|(date, close)| (date.as_str(), *close))
            .collect();
        let values: Vec<Option<f64>> = dates
            .iter()
            .map(|date| by_date.get(date.as_str()).copied().flatten())
            .collect();
        columns.push((symbol, values));
    }

    Ok(Dataset::from_columns(dates, columns)?)
}

// ── quote endpoint (shared by both sides) ───────────────────────────

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteBody,
}

#[derive(Debug, Deserialize)]
struct QuoteBody {
    result: Option<Vec<QuoteInfo>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub code: String,
    pub description: String,
}

pub(crate) fn fetch_quotes_info(
    client: &reqwest::blocking::Client,
    host: &str,
    symbols: &[String],
) -> Result<HashMap<String, QuoteInfo>, FetchError> {
    let joined = symbols.join(",");
    let url = format!("https://{host}/v7/finance/quote?symbols={joined}");
    let envelope: QuoteEnvelope = get_json(client, &url)?;

    let result = envelope.quote_response.result.ok_or_else(|| {
        if let Some(err) = envelope.quote_response.error {
            FetchError::Upstream(format!("{}: {}", err.code, err.description))
        } else {
            FetchError::ResponseFormat("empty quote result with no error".into())
        }
    })?;

    Ok(result
        .into_iter()
        .map(|info| (info.symbol.clone(), info))
        .collect())
}
