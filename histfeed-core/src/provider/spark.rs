//! Multi-symbol spark endpoint.
//!
//! One HTTP request covers the whole batch. The endpoint only understands
//! relative range presets, so explicit windows are over-fetched to the
//! covering preset and trimmed back during parsing. Symbols absent from the
//! response yield all-null columns for the repair cascade to deal with.

use std::collections::HashMap;

use serde::Deserialize;

use super::{
    close_series, fetch_quotes_info, get_json, http_client, wide_table, ApiError, CloseSeries,
    FetchError, FetchWindow, QuoteInfo, QuoteProvider, RelativePeriod,
};
use crate::dataset::Dataset;

const HOST: &str = "query1.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct SparkEnvelope {
    spark: SparkBody,
}

#[derive(Debug, Deserialize)]
struct SparkBody {
    result: Option<Vec<SparkEntry>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct SparkEntry {
    symbol: String,
    response: Option<Vec<SparkSlice>>,
}

#[derive(Debug, Deserialize)]
struct SparkSlice {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<CloseData>,
}

#[derive(Debug, Deserialize)]
struct CloseData {
    close: Vec<Option<f64>>,
}

/// Spark-endpoint side of the provider pair.
pub struct SparkProvider {
    client: reqwest::blocking::Client,
}

impl SparkProvider {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }

    fn spark_url(symbols: &[String], window: &FetchWindow) -> String {
        let joined = symbols.join(",");
        let preset = match window {
            FetchWindow::Period(period) => *period,
            FetchWindow::Range(range) => {
                RelativePeriod::covering(range.start, chrono::Utc::now().date_naive())
            }
        };
        format!(
            "https://{HOST}/v7/finance/spark?symbols={joined}&range={}&interval=1d",
            preset.as_query()
        )
    }

    /// Per-symbol close series from the batched payload.
    fn parse_entries(
        envelope: SparkEnvelope,
        window: &FetchWindow,
    ) -> Result<HashMap<String, CloseSeries>, FetchError> {
        let result = envelope.spark.result.ok_or_else(|| {
            if let Some(err) = envelope.spark.error {
                FetchError::Upstream(format!("{}: {}", err.code, err.description))
            } else {
                FetchError::ResponseFormat("empty spark result with no error".into())
            }
        })?;

        let mut series = HashMap::with_capacity(result.len());
        for entry in result {
            let slice = entry.response.and_then(|r| r.into_iter().next());
            let points = match slice {
                Some(slice) => {
                    let timestamps = slice.timestamp.unwrap_or_default();
                    let closes = slice
                        .indicators
                        .quote
                        .into_iter()
                        .next()
                        .map(|q| q.close)
                        .unwrap_or_default();
                    close_series(&timestamps, &closes, window)?
                }
                None => Vec::new(),
            };
            series.insert(entry.symbol, points);
        }
        Ok(series)
    }
}

impl Default for SparkProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteProvider for SparkProvider {
    fn name(&self) -> &'static str {
        "spark"
    }

    fn historical_close(
        &self,
        symbols: &[String],
        window: &FetchWindow,
    ) -> Result<Dataset, FetchError> {
        let url = Self::spark_url(symbols, window);
        let envelope: SparkEnvelope = get_json(&self.client, &url)?;
        let mut by_symbol = Self::parse_entries(envelope, window)?;

        // Requested order, absent symbols as empty series.
        let series: Vec<(String, CloseSeries)> = symbols
            .iter()
            .map(|s| (s.clone(), by_symbol.remove(s).unwrap_or_default()))
            .collect();
        wide_table(series)
    }

    fn quotes_info(&self, symbols: &[String]) -> Result<HashMap<String, QuoteInfo>, FetchError> {
        fetch_quotes_info(&self.client, HOST, symbols)
    }
}
