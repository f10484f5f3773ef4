//! Folding cleaned batch tables into the accumulated dataset.
//!
//! Folds are inner joins on the date axis, so only dates both sides know
//! survive. The guard after every fold is the range invariant: the joined
//! table must still span exactly the reference range. A provider returning a
//! shifted or truncated calendar would otherwise shrink the historical window
//! a little more with every batch without anyone noticing.

use polars::prelude::*;
use thiserror::Error;

use crate::dataset::{Dataset, DatasetError, DateRange, DATE_COLUMN};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(
        "the merged table has a different date range ({merged}) \
         than the reference data ({reference})"
    )]
    RangeMismatch {
        merged: DateRange,
        reference: DateRange,
    },

    #[error("table error: {0}")]
    Dataset(#[from] DatasetError),
}

/// Inner-join `batch` onto `accumulated` by date, then verify the result
/// still spans `reference`.
///
/// On rejection the accumulated table is untouched; the caller simply drops
/// the batch. The reference never moves during a run: Create mode pins it to
/// the first successful batch's range, Update mode to the stored table's
/// range as loaded at run start.
pub fn fold(
    accumulated: &Dataset,
    batch: &Dataset,
    reference: &DateRange,
) -> Result<Dataset, MergeError> {
    let joined = accumulated
        .frame()
        .clone()
        .lazy()
        .join(
            batch.frame().clone().lazy(),
            [col(DATE_COLUMN)],
            [col(DATE_COLUMN)],
            JoinArgs::new(JoinType::Inner),
        )
        .collect()
        .map_err(DatasetError::from)?;

    let joined = Dataset::from_frame(joined)?;
    let merged = joined.date_range()?;
    if merged != *reference {
        return Err(MergeError::RangeMismatch {
            merged,
            reference: *reference,
        });
    }
    Ok(joined)
}
