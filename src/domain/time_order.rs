use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ranked classification of a timestamp relative to "now". Lower ranks are
/// further in the past.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum TimeOrder {
    SometimeInThePast,
    TwoWeeksAgo,
    LastWeek,
    PreviousDaysInThisWeek,
    TwoDaysAgo,
    Yesterday,
    Today,
    Tomorrow,
    TwoDaysFromNow,
    FutureDaysInThisWeek,
    NextWeek,
    TwoWeeksFromNow,
    SometimeInTheFuture,
}

impl TimeOrder {
    pub const ALL: [TimeOrder; 13] = [
        TimeOrder::SometimeInThePast,
        TimeOrder::TwoWeeksAgo,
        TimeOrder::LastWeek,
        TimeOrder::PreviousDaysInThisWeek,
        TimeOrder::TwoDaysAgo,
        TimeOrder::Yesterday,
        TimeOrder::Today,
        TimeOrder::Tomorrow,
        TimeOrder::TwoDaysFromNow,
        TimeOrder::FutureDaysInThisWeek,
        TimeOrder::NextWeek,
        TimeOrder::TwoWeeksFromNow,
        TimeOrder::SometimeInTheFuture,
    ];

    pub fn ranking(self) -> i32 {
        match self {
            Self::Today => 0,
            Self::Tomorrow => 1,
            Self::TwoDaysFromNow => 2,
            Self::FutureDaysInThisWeek => 3,
            Self::NextWeek => 4,
            Self::TwoWeeksFromNow => 5,
            Self::SometimeInTheFuture => 10,
            Self::Yesterday => -1,
            Self::TwoDaysAgo => -2,
            Self::PreviousDaysInThisWeek => -3,
            Self::LastWeek => -4,
            Self::TwoWeeksAgo => -5,
            Self::SometimeInThePast => -10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Today => "Today",
            Self::Tomorrow => "Tomorrow",
            Self::Yesterday => "Yesterday",
            Self::TwoDaysAgo => "Two days ago",
            Self::TwoDaysFromNow => "Two days from now",
            Self::FutureDaysInThisWeek => "Future days in this week",
            Self::NextWeek => "Next Week",
            Self::TwoWeeksFromNow => "Two weeks from now",
            Self::PreviousDaysInThisWeek => "Previous days in this week",
            Self::LastWeek => "Last Week",
            Self::TwoWeeksAgo => "Two weeks ago",
            Self::SometimeInTheFuture => "Sometime in the future",
            Self::SometimeInThePast => "Sometime in the past",
        }
    }
}

impl fmt::Display for TimeOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Time zone and week convention used for calendar-day comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCalendar {
    pub time_zone: Tz,
    pub week_start: Weekday,
}

impl Default for LocalCalendar {
    fn default() -> Self {
        Self {
            time_zone: Tz::UTC,
            week_start: Weekday::Mon,
        }
    }
}

impl LocalCalendar {
    pub fn new(time_zone: Tz, week_start: Weekday) -> Self {
        Self {
            time_zone,
            week_start,
        }
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.time_zone).date_naive()
    }

    pub fn start_of_week(&self, date: NaiveDate) -> NaiveDate {
        let offset = (date.weekday().num_days_from_monday() + 7
            - self.week_start.num_days_from_monday())
            % 7;
        date - Duration::days(i64::from(offset))
    }

    /// First instant of the local day. A midnight skipped by a DST jump
    /// resolves to the first valid hour after it.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        (0..=3)
            .find_map(|hours| {
                self.time_zone
                    .from_local_datetime(&(midnight + Duration::hours(hours)))
                    .earliest()
            })
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
    }
}

/// Half-open `[start, end)` range of instants; a missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DueWindow {
    pub const UNBOUNDED: DueWindow = DueWindow {
        start: None,
        end: None,
    };

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| start <= instant) && self.end.is_none_or(|end| instant < end)
    }
}

/// Instants that `classify` maps to `order` for the given `now`, or `None`
/// when no date currently falls in that bucket (e.g. the rest of this week
/// on its last days).
pub fn bucket_window(order: TimeOrder, now: DateTime<Utc>, calendar: &LocalCalendar) -> Option<DueWindow> {
    let today = calendar.local_date(now);
    // Offset of the week start from today, in days (never positive).
    let week = (calendar.start_of_week(today) - today).num_days();
    let (start, end) = match order {
        TimeOrder::Today => (Some(0), Some(1)),
        TimeOrder::Tomorrow => (Some(1), Some(2)),
        TimeOrder::TwoDaysFromNow => (Some(2), Some(3)),
        TimeOrder::Yesterday => (Some(-1), Some(0)),
        TimeOrder::TwoDaysAgo => (Some(-2), Some(-1)),
        TimeOrder::FutureDaysInThisWeek => (Some(3), Some(week + 7)),
        TimeOrder::NextWeek => (Some((week + 7).max(3)), Some(week + 14)),
        TimeOrder::TwoWeeksFromNow => (Some((week + 14).max(3)), Some(week + 21)),
        TimeOrder::SometimeInTheFuture => (Some((week + 21).max(3)), None),
        TimeOrder::PreviousDaysInThisWeek => (Some(week), Some(-2)),
        TimeOrder::LastWeek => (Some(week - 7), Some(week.min(-2))),
        TimeOrder::TwoWeeksAgo => (Some(week - 14), Some((week - 7).min(-2))),
        TimeOrder::SometimeInThePast => (None, Some((week - 14).min(-2))),
    };
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return None;
        }
    }
    let instant = |days: i64| calendar.start_of_day(today + Duration::days(days));
    Some(DueWindow {
        start: start.map(instant),
        end: end.map(instant),
    })
}

/// Classifies `due` against `now`. Undated tasks land in the far future.
pub fn classify(due: Option<DateTime<Utc>>, now: DateTime<Utc>, calendar: &LocalCalendar) -> TimeOrder {
    let Some(due) = due else {
        return TimeOrder::SometimeInTheFuture;
    };

    let due_date = calendar.local_date(due);
    let today = calendar.local_date(now);
    let day_delta = (due_date - today).num_days();
    match day_delta {
        0 => return TimeOrder::Today,
        1 => return TimeOrder::Tomorrow,
        -1 => return TimeOrder::Yesterday,
        2 => return TimeOrder::TwoDaysFromNow,
        -2 => return TimeOrder::TwoDaysAgo,
        _ => {}
    }

    let week_delta =
        (calendar.start_of_week(due_date) - calendar.start_of_week(today)).num_days() / 7;
    match week_delta {
        0 if day_delta > 0 => TimeOrder::FutureDaysInThisWeek,
        0 => TimeOrder::PreviousDaysInThisWeek,
        1 => TimeOrder::NextWeek,
        -1 => TimeOrder::LastWeek,
        2 => TimeOrder::TwoWeeksFromNow,
        -2 => TimeOrder::TwoWeeksAgo,
        delta if delta > 0 => TimeOrder::SometimeInTheFuture,
        _ => TimeOrder::SometimeInThePast,
    }
}
