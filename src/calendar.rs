use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::model::{DAY_MS, Ms, Span, WallClock};

/// Maps local calendar dates and wall-clock times to instants at a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCalendar {
    offset: FixedOffset,
}

impl Default for LocalCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl LocalCalendar {
    pub fn utc() -> Self {
        Self {
            offset: FixedOffset::east_opt(0).expect("zero offset is valid"),
        }
    }

    /// `None` when the offset is not strictly within ±24h.
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    /// Instant of local midnight starting `date`.
    pub fn midnight(&self, date: NaiveDate) -> Ms {
        let utc_midnight = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        utc_midnight - self.offset.local_minus_utc() as Ms * 1000
    }

    pub fn day_span(&self, date: NaiveDate) -> Span {
        let start = self.midnight(date);
        Span::new(start, start + DAY_MS)
    }

    pub fn at(&self, date: NaiveDate, time: WallClock) -> Ms {
        self.midnight(date) + time.offset_ms()
    }

    pub fn date_of(&self, instant: Ms) -> Option<NaiveDate> {
        DateTime::<Utc>::from_timestamp_millis(instant)
            .map(|dt| dt.with_timezone(&self.offset).date_naive())
    }

    /// Local time of day of `instant`, truncated to the minute.
    pub fn wall_clock_of(&self, instant: Ms) -> Option<WallClock> {
        let date = self.date_of(instant)?;
        let minutes = (instant - self.midnight(date)) / 60_000;
        WallClock::from_minutes(u32::try_from(minutes).ok()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HOUR_MS;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn utc_midnight() {
        let cal = LocalCalendar::utc();
        // 2026-10-19T00:00:00Z
        assert_eq!(cal.midnight(day()), 1_792_368_000_000);
        assert_eq!(cal.day_span(day()).duration_ms(), DAY_MS);
    }

    #[test]
    fn negative_offset_shifts_midnight_later() {
        let utc = LocalCalendar::utc();
        let brt = LocalCalendar::with_offset_minutes(-180).unwrap();
        assert_eq!(brt.midnight(day()) - utc.midnight(day()), 3 * HOUR_MS);
        assert_eq!(brt.offset_minutes(), -180);
    }

    #[test]
    fn date_and_wall_clock_of_instant() {
        let cal = LocalCalendar::with_offset_minutes(-180).unwrap();
        let t = cal.at(day(), "23:30".parse().unwrap());
        assert_eq!(cal.date_of(t), Some(day()));
        assert_eq!(cal.wall_clock_of(t).unwrap().to_string(), "23:30");
        // Same instant is already the next day in UTC.
        assert_eq!(LocalCalendar::utc().date_of(t), day().succ_opt());
    }

    #[test]
    fn rejects_out_of_range_offset() {
        assert!(LocalCalendar::with_offset_minutes(24 * 60).is_none());
        assert!(LocalCalendar::with_offset_minutes(14 * 60).is_some());
    }
}
