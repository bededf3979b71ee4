//! Calendar-day boundaries for daily aggregates.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// A half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayRange {
    /// The full calendar day `date` in `tz` (midnight to next midnight).
    fn local_day<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Self {
        Self {
            start: local_midnight_to_utc(date, tz),
            end: local_midnight_to_utc(date + Duration::days(1), tz),
        }
    }

    /// From local midnight of `now`'s calendar day up to `now`.
    pub fn today_until<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> Self {
        let day = Self::local_day(now.with_timezone(tz).date_naive(), tz);
        Self {
            start: day.start,
            end: now.max(day.start),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Converts a local date at midnight to UTC.
/// Handles DST ambiguity by picking the earlier time.
fn local_midnight_to_utc<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        // Single or ambiguous (DST fall-back): use the earlier time
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            // DST spring-forward gap at midnight: 1am local exists
            let one_am = midnight + Duration::hours(1);
            tz.from_local_datetime(&one_am)
                .earliest()
                .map_or_else(|| one_am.and_utc(), |dt| dt.with_timezone(&Utc))
        }
    }
}

/// Converts a duration to fractional hours.
#[allow(clippy::cast_precision_loss)]
pub fn duration_hours(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / MS_PER_HOUR
}
