//! Per-symbol chart endpoint.
//!
//! One HTTP request per symbol in the batch; the per-symbol series are
//! aligned into the wide table afterwards. Symbols the upstream does not
//! know yield an all-null column rather than failing the batch, so the
//! repair cascade can drop and log them like any other stale column.

use std::collections::HashMap;

use serde::Deserialize;

use super::{
    close_series, fetch_quotes_info, get_json, http_client, wide_table, ApiError, CloseSeries,
    FetchError, FetchWindow, QuoteInfo, QuoteProvider,
};
use crate::dataset::Dataset;

const HOST: &str = "query2.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartSlice>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChartSlice {
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

/// Chart-endpoint side of the provider pair.
pub struct ChartProvider {
    client: reqwest::blocking::Client,
}

impl ChartProvider {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }

    fn chart_url(symbol: &str, window: &FetchWindow) -> String {
        match window {
            FetchWindow::Period(period) => format!(
                "https://{HOST}/v8/finance/chart/{symbol}?range={}&interval=1d",
                period.as_query()
            ),
            FetchWindow::Range(range) => {
                let start_ts = range.start.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
                let end_ts = range.end.and_hms_opt(23, 59, 59).unwrap().and_utc().timestamp();
                format!(
                    "https://{HOST}/v8/finance/chart/{symbol}\
                     ?period1={start_ts}&period2={end_ts}&interval=1d"
                )
            }
        }
    }

    /// Extract the close series for one symbol.
    ///
    /// An unknown symbol or a data-free slice comes back as an empty series;
    /// only malformed or upstream-reported systemic errors raise.
    fn parse_envelope(
        envelope: ChartEnvelope,
        window: &FetchWindow,
    ) -> Result<CloseSeries, FetchError> {
        let result = match envelope.chart.result {
            Some(result) => result,
            None => {
                return match envelope.chart.error {
                    Some(err) if err.code == "Not Found" => Ok(Vec::new()),
                    Some(err) => Err(FetchError::Upstream(format!(
                        "{}: {}",
                        err.code, err.description
                    ))),
                    None => Err(FetchError::ResponseFormat(
                        "empty chart result with no error".into(),
                    )),
                };
            }
        };

        let slice = match result.into_iter().next() {
            Some(slice) => slice,
            None => return Ok(Vec::new()),
        };
        let timestamps = match slice.timestamp {
            Some(timestamps) => timestamps,
            None => return Ok(Vec::new()),
        };
        let closes = slice
            .indicators
            .quote
            .into_iter()
            .next()
            .map(|q| q.close)
            .unwrap_or_default();

        close_series(&timestamps, &closes, window)
    }

    fn fetch_one(&self, symbol: &str, window: &FetchWindow) -> Result<CloseSeries, FetchError> {
        let url = Self::chart_url(symbol, window);
        let envelope: ChartEnvelope = get_json(&self.client, &url)?;
        Self::parse_envelope(envelope, window)
    }
}

impl Default for ChartProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteProvider for ChartProvider {
    fn name(&self) -> &'static str {
        "chart"
    }

    fn historical_close(
        &self,
        symbols: &[String],
        window: &FetchWindow,
    ) -> Result<Dataset, FetchError> {
        let mut series = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            series.push((symbol.clone(), self.fetch_one(symbol, window)?));
        }
        wide_table(series)
    }

    fn quotes_info(&self, symbols: &[String]) -> Result<HashMap<String, QuoteInfo>, FetchError> {
        fetch_quotes_info(&self.client, HOST, symbols)
    }
}
