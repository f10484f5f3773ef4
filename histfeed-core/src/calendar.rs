//! Trading-session guard.
//!
//! Ingestion must not run while the exchange is trading: intraday quotes
//! would leak into a table that models settled daily closes. Weekdays inside
//! the regular Eastern session are refused; weekends always pass. Exchange
//! holidays are not detected — a holiday weekday is treated like any other
//! weekday, which refuses some runs that would have been safe. Known gap.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error(
        "ingestion refused: {clock} Eastern is inside the regular trading session \
         ({open} to {close})"
    )]
    MarketOpen {
        clock: NaiveTime,
        open: NaiveTime,
        close: NaiveTime,
    },
}

/// Regular session boundaries in Eastern local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for SessionHours {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }
    }
}

/// Refuse weekday timestamps inside the session, boundaries included.
pub fn ensure_outside_session(
    now: DateTime<Utc>,
    hours: SessionHours,
) -> Result<(), CalendarError> {
    let eastern = now.with_timezone(&chrono_tz::America::New_York);
    if matches!(eastern.weekday(), Weekday::Sat | Weekday::Sun) {
        return Ok(());
    }

    let clock = eastern.time();
    if clock >= hours.open && clock <= hours.close {
        return Err(CalendarError::MarketOpen {
            clock,
            open: hours.open,
            close: hours.close,
        });
    }
    Ok(())
}
