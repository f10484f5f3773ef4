//! The wide close-price table.
//!
//! One row per trading date, one `Float64` column per symbol, plus a required
//! `date` column of `YYYY-MM-DD` strings (lexicographic order equals
//! chronological order). Missing prices are nulls; providers normalize NaN
//! floats to null on construction so "missing" means exactly one thing
//! downstream.

use std::io::Cursor;

use chrono::NaiveDate;
use polars::prelude::*;
use thiserror::Error;

pub const DATE_COLUMN: &str = "date";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors raised by table construction and access.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("table has no '{DATE_COLUMN}' column")]
    MissingDateColumn,

    #[error("'{DATE_COLUMN}' column is not a string column: {0}")]
    DateColumnType(String),

    #[error("unparseable date value '{0}' (expected YYYY-MM-DD)")]
    BadDate(String),

    #[error("duplicate date value '{0}'")]
    DuplicateDate(String),

    #[error("column '{0}' is not a float column")]
    NonNumericColumn(String),

    #[error("table has no rows")]
    Empty,

    #[error("table error: {0}")]
    Frame(#[from] PolarsError),
}

/// Inclusive calendar range covered by a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Widen the range by `days` calendar days on each side.
    pub fn padded(&self, days: i64) -> Self {
        Self {
            start: self.start - chrono::Duration::days(days),
            end: self.end + chrono::Duration::days(days),
        }
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Date-indexed close-price table.
///
/// Construction validates the shape once; every accessor after that can rely
/// on the `date` column existing, parsing, and being unique.
#[derive(Debug, Clone)]
pub struct Dataset {
    df: DataFrame,
}

impl Dataset {
    /// Wrap a DataFrame, validating the date column and symbol column types.
    ///
    /// Rows are sorted by date as part of construction.
    pub fn from_frame(df: DataFrame) -> Result<Self, DatasetError> {
        let date_col = df
            .column(DATE_COLUMN)
            .map_err(|_| DatasetError::MissingDateColumn)?;
        let dates = date_col
            .str()
            .map_err(|e| DatasetError::DateColumnType(e.to_string()))?;

        let mut seen = std::collections::BTreeSet::new();
        for value in dates.into_iter() {
            let value = value.ok_or_else(|| DatasetError::BadDate("<null>".into()))?;
            if NaiveDate::parse_from_str(value, DATE_FORMAT).is_err() {
                return Err(DatasetError::BadDate(value.to_string()));
            }
            if !seen.insert(value.to_string()) {
                return Err(DatasetError::DuplicateDate(value.to_string()));
            }
        }

        for col in df.get_columns() {
            let name = col.name().as_str();
            if name == DATE_COLUMN {
                continue;
            }
            if col.dtype() != &DataType::Float64 {
                return Err(DatasetError::NonNumericColumn(name.to_string()));
            }
        }

        let df = df.sort([DATE_COLUMN], SortMultipleOptions::default())?;
        Ok(Self { df })
    }

    /// Build a table from a date axis and per-symbol value vectors.
    ///
    /// Every value vector must match the length of `dates`; non-finite floats
    /// are stored as null.
    pub fn from_columns(
        dates: Vec<String>,
        series: Vec<(String, Vec<Option<f64>>)>,
    ) -> Result<Self, DatasetError> {
        let mut columns = Vec::with_capacity(series.len() + 1);
        columns.push(Column::new(DATE_COLUMN.into(), dates));
        for (symbol, values) in series {
            let cleaned: Vec<Option<f64>> = values
                .into_iter()
                .map(|v| v.filter(|x| x.is_finite()))
                .collect();
            columns.push(Column::new(symbol.as_str().into(), cleaned));
        }
        Self::from_frame(DataFrame::new(columns)?)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.df
    }

    /// Number of date rows.
    pub fn rows(&self) -> usize {
        self.df.height()
    }

    /// Symbol columns only (the date axis is not counted).
    pub fn symbol_count(&self) -> usize {
        self.df.width().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.symbol_count() == 0
    }

    /// Column names minus the date axis, in table order.
    pub fn symbols(&self) -> Vec<String> {
        self.df
            .get_columns()
            .iter()
            .map(|c| c.name().as_str())
            .filter(|n| *n != DATE_COLUMN)
            .map(str::to_string)
            .collect()
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.df
            .column(symbol)
            .map(|c| c.name().as_str() != DATE_COLUMN)
            .unwrap_or(false)
    }

    /// Min/max of the date axis.
    pub fn date_range(&self) -> Result<DateRange, DatasetError> {
        let dates = self.date_values()?;
        let first = dates.first().ok_or(DatasetError::Empty)?;
        let last = dates.last().ok_or(DatasetError::Empty)?;
        Ok(DateRange::new(parse_date(first)?, parse_date(last)?))
    }

    /// The date axis as strings, ascending.
    pub fn date_values(&self) -> Result<Vec<String>, DatasetError> {
        let dates = self
            .df
            .column(DATE_COLUMN)
            .map_err(|_| DatasetError::MissingDateColumn)?
            .str()
            .map_err(|e| DatasetError::DateColumnType(e.to_string()))?;
        Ok(dates.into_iter().flatten().map(str::to_string).collect())
    }

    /// Nulls in one symbol column.
    pub fn null_count(&self, symbol: &str) -> Result<usize, DatasetError> {
        Ok(self.df.column(symbol)?.null_count())
    }

    /// Close values for one symbol, aligned to the date axis.
    pub fn close_values(&self, symbol: &str) -> Result<Vec<Option<f64>>, DatasetError> {
        let values = self.df.column(symbol)?.f64()?;
        Ok(values.into_iter().collect())
    }

    /// Drop a symbol column, returning the reduced table.
    pub fn without_symbol(&self, symbol: &str) -> Result<Self, DatasetError> {
        Ok(Self {
            df: self.df.drop(symbol)?,
        })
    }

    /// Replace one symbol column with new values (same length as the table).
    pub fn with_symbol_values(
        mut self,
        symbol: &str,
        values: Vec<Option<f64>>,
    ) -> Result<Self, DatasetError> {
        self.df
            .with_column(Column::new(symbol.into(), values))?;
        Ok(self)
    }

    /// Serialize as the storage wire format: UTF-8 CSV with a header row.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, DatasetError> {
        let mut buf = Vec::new();
        CsvWriter::new(&mut buf)
            .include_header(true)
            .finish(&mut self.df.clone())?;
        Ok(buf)
    }

    /// Parse the storage wire format back into a validated table.
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, DatasetError> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()?;
        Self::from_frame(df)
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, DatasetError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| DatasetError::BadDate(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(symbols: &[(&str, Vec<Option<f64>>)]) -> Dataset {
        let dates = vec!["2024-01-02".to_string(), "2024-01-03".to_string()];
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
    fn construction_sorts_by_date() {
        let ds = Dataset::from_columns(
            vec!["2024-01-05".into(), "2024-01-02".into(), "2024-01-03".into()],
            vec![("SPY".into(), vec![Some(3.0), Some(1.0), Some(2.0)])],
        )
        .unwrap();

        assert_eq!(
            ds.date_values().unwrap(),
            vec!["2024-01-02", "2024-01-03", "2024-01-05"]
        );
        assert_eq!(
            ds.close_values("SPY").unwrap(),
            vec![Some(1.0), Some(2.0), Some(3.0)]
        );
    }

    #[test]
    fn duplicate_dates_rejected() {
        let result = Dataset::from_columns(
            vec!["2024-01-02".into(), "2024-01-02".into()],
            vec![("SPY".into(), vec![Some(1.0), Some(2.0)])],
        );
        assert!(matches!(result, Err(DatasetError::DuplicateDate(d)) if d == "2024-01-02"));
    }

    #[test]
    fn malformed_date_rejected() {
        let result = Dataset::from_columns(
            vec!["01/02/2024".into()],
            vec![("SPY".into(), vec![Some(1.0)])],
        );
        assert!(matches!(result, Err(DatasetError::BadDate(_))));
    }

    #[test]
    fn nan_values_become_null() {
        let ds = table(&[("SPY", vec![Some(f64::NAN), Some(100.0)])]);
        assert_eq!(ds.null_count("SPY").unwrap(), 1);
        assert_eq!(
            ds.close_values("SPY").unwrap(),
            vec![None, Some(100.0)]
        );
    }

    #[test]
    fn date_range_spans_min_to_max() {
        let ds = table(&[("SPY", vec![Some(1.0), Some(2.0)])]);
        let range = ds.date_range().unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    }

    #[test]
    fn padded_range_widens_both_sides() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
        )
        .padded(2);
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 1, 12).unwrap());
    }

    #[test]
    fn symbols_excludes_date_axis() {
        let ds = table(&[
            ("SPY", vec![Some(1.0), Some(2.0)]),
            ("QQQ", vec![Some(3.0), Some(4.0)]),
        ]);
        assert_eq!(ds.symbols(), vec!["SPY", "QQQ"]);
        assert_eq!(ds.symbol_count(), 2);
        assert!(ds.has_symbol("QQQ"));
        assert!(!ds.has_symbol("IWM"));
    }

    #[test]
    fn csv_roundtrip_preserves_nulls() {
        let ds = table(&[("SPY", vec![None, Some(100.5)])]);
        let bytes = ds.to_csv_bytes().unwrap();
        let back = Dataset::from_csv_bytes(&bytes).unwrap();

        assert_eq!(back.date_values().unwrap(), ds.date_values().unwrap());
        assert_eq!(back.close_values("SPY").unwrap(), vec![None, Some(100.5)]);
    }

    #[test]
    fn without_symbol_drops_column() {
        let ds = table(&[
            ("SPY", vec![Some(1.0), Some(2.0)]),
            ("QQQ", vec![Some(3.0), Some(4.0)]),
        ]);
        let reduced = ds.without_symbol("SPY").unwrap();
        assert_eq!(reduced.symbols(), vec!["QQQ"]);
        assert_eq!(reduced.rows(), 2);
    }

    #[test]
    fn with_symbol_values_replaces_column() {
        let ds = table(&[("SPY", vec![Some(1.0), None])]);
        let patched = ds
            .with_symbol_values("SPY", vec![Some(1.0), Some(9.9)])
            .unwrap();
        assert_eq!(patched.null_count("SPY").unwrap(), 0);
        assert_eq!(
            patched.close_values("SPY").unwrap(),
            vec![Some(1.0), Some(9.9)]
        );
    }

    #[test]
    fn empty_table_has_no_range() {
        let ds = Dataset::from_columns(vec![], vec![]).unwrap();
        assert!(matches!(ds.date_range(), Err(DatasetError::Empty)));
    }
}
