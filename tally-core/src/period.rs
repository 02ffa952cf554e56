//! Reset periods bounding which completions count toward a task's state.
//!
//! Boundaries are computed in a fixed UTC offset (the household's local
//! time). Every period starts at local midnight.

use crate::{Timestamp, ValidationError};
use chrono::{Datelike, Days, FixedOffset, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A recurring window after which completions stop counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "period", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResetPeriod {
    /// Resets every day at midnight.
    #[default]
    Daily,
    /// Resets every week at midnight on `anchor`.
    Weekly { anchor: Weekday },
    /// Resets every month at midnight on `anchor_day`.
    ///
    /// Months shorter than `anchor_day` reset on their last day.
    Monthly { anchor_day: u32 },
}

impl ResetPeriod {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Monthly { anchor_day } if !(1..=31).contains(anchor_day) => {
                Err(ValidationError::InvalidValue {
                    field: "anchor_day".to_string(),
                    reason: format!("{} is not a day of the month", anchor_day),
                })
            }
            _ => Ok(()),
        }
    }

    /// Start of the period containing `now`.
    pub fn period_start(&self, now: Timestamp, offset: FixedOffset) -> Timestamp {
        local_midnight(self.start_date(local_date(now, offset)), offset)
    }

    /// Start of the period following the one containing `now`.
    pub fn period_end(&self, now: Timestamp, offset: FixedOffset) -> Timestamp {
        let start = self.start_date(local_date(now, offset));
        let next = match self {
            Self::Daily => start.checked_add_days(Days::new(1)),
            Self::Weekly { .. } => start.checked_add_days(Days::new(7)),
            Self::Monthly { anchor_day } => {
                let (year, month) = next_month(start.year(), start.month());
                anchor_in_month(year, month, *anchor_day)
            }
        };
        local_midnight(next.unwrap_or(start), offset)
    }

    /// Whether a completion at `at` falls inside the period containing `now`.
    pub fn contains(&self, at: Timestamp, now: Timestamp, offset: FixedOffset) -> bool {
        at >= self.period_start(now, offset)
    }

    fn start_date(&self, today: NaiveDate) -> NaiveDate {
        match self {
            Self::Daily => today,
            Self::Weekly { anchor } => {
                let back = (today.weekday().num_days_from_monday() + 7
                    - anchor.num_days_from_monday())
                    % 7;
                today
                    .checked_sub_days(Days::new(u64::from(back)))
                    .unwrap_or(today)
            }
            Self::Monthly { anchor_day } => {
                let this_month = anchor_in_month(today.year(), today.month(), *anchor_day);
                match this_month {
                    Some(anchor) if today >= anchor => anchor,
                    _ => {
                        let (year, month) = prev_month(today.year(), today.month());
                        anchor_in_month(year, month, *anchor_day).unwrap_or(today)
                    }
                }
            }
        }
    }
}

fn local_date(now: Timestamp, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

fn local_midnight(date: NaiveDate, offset: FixedOffset) -> Timestamp {
    let local = date.and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&(local - TimeDelta::seconds(i64::from(offset.local_minus_utc()))))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = next_month(year, month);
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn anchor_in_month(year: i32, month: u32, anchor_day: u32) -> Option<NaiveDate> {
    let day = anchor_day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_daily_starts_at_midnight() {
        let now = at(2026, 3, 10, 15, 30);
        assert_eq!(ResetPeriod::Daily.period_start(now, utc()), at(2026, 3, 10, 0, 0));
        assert_eq!(ResetPeriod::Daily.period_end(now, utc()), at(2026, 3, 11, 0, 0));
    }

    #[test]
    fn test_daily_respects_offset() {
        // 02:00 UTC is still the previous evening at UTC-5
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = at(2026, 3, 10, 2, 0);
        assert_eq!(ResetPeriod::Daily.period_start(now, offset), at(2026, 3, 9, 5, 0));
    }

    #[test]
    fn test_weekly_anchor() {
        // 2026-03-11 is a Wednesday
        let now = at(2026, 3, 11, 9, 0);
        let monday = ResetPeriod::Weekly { anchor: Weekday::Mon };
        assert_eq!(monday.period_start(now, utc()), at(2026, 3, 9, 0, 0));
        assert_eq!(monday.period_end(now, utc()), at(2026, 3, 16, 0, 0));

        let wednesday = ResetPeriod::Weekly { anchor: Weekday::Wed };
        assert_eq!(wednesday.period_start(now, utc()), at(2026, 3, 11, 0, 0));

        let thursday = ResetPeriod::Weekly { anchor: Weekday::Thu };
        assert_eq!(thursday.period_start(now, utc()), at(2026, 3, 5, 0, 0));
    }

    #[test]
    fn test_monthly_anchor_before_and_after() {
        let period = ResetPeriod::Monthly { anchor_day: 15 };
        assert_eq!(period.period_start(at(2026, 3, 20, 8, 0), utc()), at(2026, 3, 15, 0, 0));
        assert_eq!(period.period_start(at(2026, 3, 10, 8, 0), utc()), at(2026, 2, 15, 0, 0));
        assert_eq!(period.period_end(at(2026, 3, 10, 8, 0), utc()), at(2026, 3, 15, 0, 0));
    }

    #[test]
    fn test_monthly_anchor_clamps_to_short_month() {
        let period = ResetPeriod::Monthly { anchor_day: 31 };
        assert_eq!(period.period_start(at(2026, 2, 28, 12, 0), utc()), at(2026, 2, 28, 0, 0));
        assert_eq!(period.period_start(at(2026, 2, 27, 12, 0), utc()), at(2026, 1, 31, 0, 0));
        assert_eq!(period.period_end(at(2026, 2, 28, 12, 0), utc()), at(2026, 3, 31, 0, 0));
    }

    #[test]
    fn test_monthly_crosses_year() {
        let period = ResetPeriod::Monthly { anchor_day: 5 };
        assert_eq!(period.period_start(at(2026, 1, 2, 0, 0), utc()), at(2025, 12, 5, 0, 0));
    }

    #[test]
    fn test_contains_is_inclusive_of_start() {
        let now = at(2026, 3, 10, 15, 0);
        assert!(ResetPeriod::Daily.contains(at(2026, 3, 10, 0, 0), now, utc()));
        assert!(!ResetPeriod::Daily.contains(at(2026, 3, 9, 23, 59), now, utc()));
    }

    #[test]
    fn test_validate_rejects_bad_anchor_day() {
        assert!(ResetPeriod::Monthly { anchor_day: 0 }.validate().is_err());
        assert!(ResetPeriod::Monthly { anchor_day: 32 }.validate().is_err());
        assert!(ResetPeriod::Monthly { anchor_day: 31 }.validate().is_ok());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(ResetPeriod::Weekly { anchor: Weekday::Sun }).unwrap();
        assert_eq!(json["period"], "WEEKLY");
        let back: ResetPeriod = serde_json::from_value(json).unwrap();
        assert_eq!(back, ResetPeriod::Weekly { anchor: Weekday::Sun });
    }
}
