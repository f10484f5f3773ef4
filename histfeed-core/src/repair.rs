//! Missing-close repair cascade.
//!
//! Every freshly fetched batch table passes through four fixed stages before
//! it may be merged:
//!
//! 1. columns with more than one missing close are dropped (stale for this
//!    run);
//! 2. columns with a gap anywhere before the final row are dropped (a mid
//!    history gap cannot be patched by a point-in-time quote);
//! 3. columns whose only gap is the final row get one live quote lookup; a
//!    usable regular market price patches the cell, anything else drops the
//!    column;
//! 4. any missing value still present afterwards rejects the whole batch.
//!
//! A batch whose every column is dropped becomes an empty no-op, not an
//! error. All drops and patches are reported through the returned [`RunLog`].

use thiserror::Error;

use crate::dataset::{Dataset, DatasetError};
use crate::provider::QuoteProvider;
use crate::runlog::RunLog;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("missing closes remain after repair for: {}", symbols.join(", "))]
    ResidualNulls { symbols: Vec<String> },

    #[error("table error: {0}")]
    Dataset(#[from] DatasetError),
}

/// Run the cascade over one batch table.
///
/// Returns the cleaned table and the log slice describing what happened to
/// it. The surviving table contains no missing values.
pub fn repair_batch(
    table: Dataset,
    quotes: &dyn QuoteProvider,
) -> Result<(Dataset, RunLog), RepairError> {
    let mut log = RunLog::new();

    let table = drop_multi_gap_columns(table, &mut log)?;
    let table = drop_mid_gap_columns(table, &mut log)?;
    let table = patch_terminal_gaps(table, quotes, &mut log)?;

    let residual: Vec<String> = columns_where(&table, |nulls| nulls > 0)?;
    if !residual.is_empty() {
        return Err(RepairError::ResidualNulls { symbols: residual });
    }

    if table.is_empty() {
        log.warn("every symbol in the batch was dropped during repair");
    }
    Ok((table, log))
}

fn columns_where(
    table: &Dataset,
    pred: impl Fn(usize) -> bool,
) -> Result<Vec<String>, RepairError> {
    let mut matched = Vec::new();
    for symbol in table.symbols() {
        if pred(table.null_count(&symbol)?) {
            matched.push(symbol);
        }
    }
    Ok(matched)
}

fn drop_multi_gap_columns(table: Dataset, log: &mut RunLog) -> Result<Dataset, RepairError> {
    let stale = columns_where(&table, |nulls| nulls > 1)?;
    let mut table = table;
    for symbol in &stale {
        table = table.without_symbol(symbol)?;
    }
    if !stale.is_empty() {
        log.warn(format!(
            "dropped {}: more than one missing close in the fetched window",
            stale.join(", ")
        ));
    }
    Ok(table)
}

fn drop_mid_gap_columns(table: Dataset, log: &mut RunLog) -> Result<Dataset, RepairError> {
    let mut gapped = Vec::new();
    for symbol in columns_where(&table, |nulls| nulls == 1)? {
        let values = table.close_values(&symbol)?;
        let terminal = values.last().map(Option::is_none).unwrap_or(false);
        if !terminal {
            gapped.push(symbol);
        }
    }

    let mut table = table;
    for symbol in &gapped {
        table = table.without_symbol(symbol)?;
    }
    if !gapped.is_empty() {
        log.warn(format!(
            "dropped {}: missing close before the final row",
            gapped.join(", ")
        ));
    }
    Ok(table)
}

fn patch_terminal_gaps(
    table: Dataset,
    quotes: &dyn QuoteProvider,
    log: &mut RunLog,
) -> Result<Dataset, RepairError> {
    // After the mid-gap stage a single-null column can only be terminal.
    let candidates = columns_where(&table, |nulls| nulls == 1)?;
    if candidates.is_empty() {
        return Ok(table);
    }

    let mut table = table;
    match quotes.quotes_info(&candidates) {
        Ok(infos) => {
            for symbol in &candidates {
                let price = infos
                    .get(symbol)
                    .and_then(|info| info.regular_market_price)
                    .filter(|p| p.is_finite());
                match price {
                    Some(price) => {
                        let mut values = table.close_values(symbol)?;
                        if let Some(last) = values.last_mut() {
                            *last = Some(price);
                        }
                        table = table.with_symbol_values(symbol, values)?;
                        log.warn(format!(
                            "the latest close for {symbol} was missing and was replaced \
                             with the live regular market price {price}"
                        ));
                    }
                    None => {
                        table = table.without_symbol(symbol)?;
                        log.warn(format!(
                            "dropped {symbol}: live quote carries no regular market price"
                        ));
                    }
                }
            }
        }
        Err(e) => {
            for symbol in &candidates {
                table = table.without_symbol(symbol)?;
            }
            log.warn(format!(
                "dropped {}: live quote lookup failed: {e}",
                candidates.join(", ")
            ));
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FetchError, FetchWindow, QuoteInfo};
    use std::collections::HashMap;

    struct StubQuotes {
        prices: HashMap<String, Option<f64>>,
        fail: bool,
    }

    impl StubQuotes {
        fn with_price(symbol: &str, price: f64) -> Self {
            let mut prices = HashMap::new();
            prices.insert(symbol.to_string(), Some(price));
            Self {
                prices,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                prices: HashMap::new(),
                fail: true,
            }
        }

        fn empty() -> Self {
            Self {
                prices: HashMap::new(),
                fail: false,
            }
        }
    }

    impl QuoteProvider for StubQuotes {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn historical_close(
            &self,
            _symbols: &[String],
            _window: &FetchWindow,
        ) -> Result<Dataset, FetchError> {
            unimplemented!("not used by repair tests")
        }

        fn quotes_info(
            &self,
            symbols: &[String],
        ) -> Result<HashMap<String, QuoteInfo>, FetchError> {
            if self.fail {
                return Err(FetchError::Network("connection refused".into()));
            }
            Ok(symbols
                .iter()
                .filter_map(|s| {
                    self.prices.get(s).map(|price| {
                        (
                            s.clone(),
                            QuoteInfo {
                                symbol: s.clone(),
                                regular_market_price: *price,
                                currency: None,
                                short_name: None,
                            },
                        )
                    })
                })
                .collect())
        }
    }

    fn batch(symbols: &[(&str, Vec<Option<f64>>)]) -> Dataset {
        let rows = symbols[0].1.len();
        let dates: Vec<String> = (0..rows).map(|i| format!("2024-01-{:02}", i + 2)).collect();
        Dataset::from_columns(
            dates,
            symbols
                .iter()
                .map(|(s, v)| (s.to_string(), v.clone()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn clean_batch_passes_through() {
        let table = batch(&[("SPY", vec![Some(1.0), Some(2.0)])]);
        let (out, log) = repair_batch(table, &StubQuotes::empty()).unwrap();

        assert_eq!(out.symbols(), vec!["SPY"]);
        assert!(log.is_empty());
    }

    #[test]
    fn multi_gap_column_is_dropped() {
        let table = batch(&[
            ("AAA", vec![None, Some(1.0), None]),
            ("SPY", vec![Some(1.0), Some(2.0), Some(3.0)]),
        ]);
        let (out, log) = repair_batch(table, &StubQuotes::empty()).unwrap();

        assert_eq!(out.symbols(), vec!["SPY"]);
        assert!(log.warnings[0].contains("AAA"));
        assert!(log.warnings[0].contains("more than one missing close"));
    }

    #[test]
    fn mid_gap_column_is_dropped() {
        let table = batch(&[
            ("MID", vec![Some(1.0), None, Some(3.0)]),
            ("SPY", vec![Some(1.0), Some(2.0), Some(3.0)]),
        ]);
        let (out, log) = repair_batch(table, &StubQuotes::empty()).unwrap();

        assert_eq!(out.symbols(), vec!["SPY"]);
        assert!(log.warnings[0].contains("missing close before the final row"));
    }

    #[test]
    fn terminal_gap_is_patched_with_live_price() {
        let table = batch(&[("BBB", vec![Some(10.0), None])]);
        let quotes = StubQuotes::with_price("BBB", 12.5);
        let (out, log) = repair_batch(table, &quotes).unwrap();

        assert_eq!(out.close_values("BBB").unwrap(), vec![Some(10.0), Some(12.5)]);
        assert_eq!(out.null_count("BBB").unwrap(), 0);
        assert!(log.warnings[0].contains("12.5"));
    }

    #[test]
    fn terminal_gap_without_price_drops_column() {
        let table = batch(&[
            ("BBB", vec![Some(10.0), None]),
            ("SPY", vec![Some(1.0), Some(2.0)]),
        ]);
        let (out, log) = repair_batch(table, &StubQuotes::empty()).unwrap();

        assert_eq!(out.symbols(), vec!["SPY"]);
        assert!(log.warnings[0].contains("no regular market price"));
    }

    #[test]
    fn failed_lookup_drops_all_candidates_with_detail() {
        let table = batch(&[
            ("BBB", vec![Some(10.0), None]),
            ("CCC", vec![Some(20.0), None]),
        ]);
        let (out, log) = repair_batch(table, &StubQuotes::failing()).unwrap();

        assert!(out.is_empty());
        assert!(log.warnings[0].contains("BBB, CCC"));
        assert!(log.warnings[0].contains("connection refused"));
        // everything gone, so the no-op warning follows
        assert!(log.warnings[1].contains("every symbol in the batch was dropped"));
    }

    #[test]
    fn drop_and_patch_coexist_in_one_batch() {
        let table = batch(&[
            ("AAA", vec![None, None]),
            ("BBB", vec![Some(10.0), None]),
        ]);
        let quotes = StubQuotes::with_price("BBB", 12.5);
        let (out, log) = repair_batch(table, &quotes).unwrap();

        assert_eq!(out.symbols(), vec!["BBB"]);
        assert_eq!(out.close_values("BBB").unwrap(), vec![Some(10.0), Some(12.5)]);
        assert!(log.warnings.iter().any(|w| w.contains("AAA")));
        assert!(log.warnings.iter().any(|w| w.contains("12.5")));
    }

    #[test]
    fn surviving_columns_have_no_gaps() {
        let table = batch(&[
            ("AAA", vec![None, None, Some(1.0)]),
            ("MID", vec![Some(1.0), None, Some(3.0)]),
            ("BBB", vec![Some(1.0), Some(2.0), None]),
            ("SPY", vec![Some(1.0), Some(2.0), Some(3.0)]),
        ]);
        let quotes = StubQuotes::with_price("BBB", 9.0);
        let (out, _) = repair_batch(table, &quotes).unwrap();

        for symbol in out.symbols() {
            assert_eq!(out.null_count(&symbol).unwrap(), 0, "{symbol} kept a gap");
        }
    }
}
