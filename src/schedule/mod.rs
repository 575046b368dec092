use crate::error::Error;
use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde_json::{json, Value};

const SECS_PER_DAY: i64 = 86_400;

/// The eight schedule buckets: seven weekdays plus the public-holiday
/// override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayClass {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
    Pub,
}

impl DayClass {
    pub const ALL: [DayClass; 8] = [
        DayClass::Mon,
        DayClass::Tue,
        DayClass::Wed,
        DayClass::Thu,
        DayClass::Fri,
        DayClass::Sat,
        DayClass::Sun,
        DayClass::Pub,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DayClass::Mon => "mon",
            DayClass::Tue => "tue",
            DayClass::Wed => "wed",
            DayClass::Thu => "thu",
            DayClass::Fri => "fri",
            DayClass::Sat => "sat",
            DayClass::Sun => "sun",
            DayClass::Pub => "pub",
        }
    }

    pub fn from_str(s: &str) -> Option<DayClass> {
        DayClass::ALL.iter().copied().find(|d| d.as_str() == s)
    }

    fn index(&self) -> usize {
        DayClass::ALL.iter().position(|d| d == self).unwrap_or(0)
    }
}

impl From<Weekday> for DayClass {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DayClass::Mon,
            Weekday::Tue => DayClass::Tue,
            Weekday::Wed => DayClass::Wed,
            Weekday::Thu => DayClass::Thu,
            Weekday::Fri => DayClass::Fri,
            Weekday::Sat => DayClass::Sat,
            Weekday::Sun => DayClass::Sun,
        }
    }
}

/// A single recurring daily interval: a start time-of-day plus a duration.
/// The duration may run past midnight but never exceeds 24 hours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    start_time: NaiveTime,
    duration_secs: i64,
}

impl TimeWindow {
    /// Build a window from an "HH:MM:SS" start time and a duration in
    /// (possibly fractional) hours. Durations are kept at second
    /// precision.
    pub fn new(start_time: &str, duration_hours: f64) -> Result<Self, Error> {
        let start_time = NaiveTime::parse_from_str(start_time, "%H:%M:%S").map_err(|e| {
            Error::InvalidSchedule(format!("Unparseable start time {:?}: {}", start_time, e))
        })?;

        if !duration_hours.is_finite() {
            return Err(Error::InvalidSchedule(format!(
                "Unparseable duration: {}",
                duration_hours
            )));
        }

        let duration_secs = (duration_hours * 3600.0).round() as i64;
        if duration_secs <= 0 || duration_secs > SECS_PER_DAY {
            return Err(Error::InvalidSchedule(format!(
                "Invalid duration amount: {} hours",
                duration_hours
            )));
        }

        Ok(Self {
            start_time,
            duration_secs,
        })
    }

    pub fn start_time(&self) -> NaiveTime {
        self.start_time
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_secs)
    }

    fn duration_hours(&self) -> f64 {
        self.duration_secs as f64 / 3600.0
    }

    fn start_secs(&self) -> i64 {
        self.start_time.num_seconds_from_midnight() as i64
    }

    /// Strict non-overlap against the window that follows this one, with
    /// both windows projected onto a shared timeline. `same_day` places
    /// `next` on the same calendar day, otherwise on the day after.
    fn does_not_overlap_with(&self, next: &TimeWindow, same_day: bool) -> bool {
        let end = self.start_secs() + self.duration_secs;
        let next_start = if same_day {
            next.start_secs()
        } else {
            next.start_secs() + SECS_PER_DAY
        };
        end < next_start
    }

    /// Whether the window covers `local` when placed on `local`'s calendar
    /// date (`same_day`) or on the previous date (the wraparound case).
    /// Both window ends are exclusive.
    fn covers(&self, local: NaiveDateTime, same_day: bool) -> bool {
        let anchor = if same_day {
            local.date()
        } else {
            local.date() - Duration::days(1)
        };
        let start = anchor.and_time(self.start_time);
        let end = start + self.duration();
        start < local && local < end
    }
}

/// The ordered set of windows for one day classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaySchedule {
    windows: Vec<TimeWindow>,
}

impl DaySchedule {
    pub fn new(mut windows: Vec<TimeWindow>) -> Self {
        windows.sort_by_key(|w| w.start_time);
        Self { windows }
    }

    /// True iff consecutive windows neither overlap nor touch. Empty and
    /// singleton schedules are trivially valid.
    pub fn validate(&self) -> bool {
        self.windows
            .windows(2)
            .all(|pair| pair[0].does_not_overlap_with(&pair[1], true))
    }

    pub fn windows(&self) -> &[TimeWindow] {
        &self.windows
    }

    pub fn first(&self) -> Option<&TimeWindow> {
        self.windows.first()
    }

    pub fn last(&self) -> Option<&TimeWindow> {
        self.windows.last()
    }

    fn from_value(value: &Value) -> Result<Self, Error> {
        let runs = value
            .as_array()
            .ok_or_else(|| Error::InvalidSchedule("Day schedule must be an array".to_string()))?;

        let mut windows = Vec::with_capacity(runs.len());
        for run in runs {
            let start_time = run
                .get("start_time")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidSchedule("Missing start_time".to_string()))?;
            let duration = run
                .get("duration")
                .and_then(Value::as_f64)
                .ok_or_else(|| Error::InvalidSchedule("Missing duration".to_string()))?;
            windows.push(TimeWindow::new(start_time, duration)?);
        }

        Ok(Self::new(windows))
    }

    fn to_value(&self) -> Value {
        Value::Array(
            self.windows
                .iter()
                .map(|w| {
                    json!({
                        "start_time": w.start_time.format("%H:%M:%S").to_string(),
                        "duration": w.duration_hours(),
                    })
                })
                .collect(),
        )
    }
}

/// A full weekly calendar: one `DaySchedule` per classification. Built
/// fresh from the persisted JSON object on every read, owned by a
/// location, and replaced wholesale on mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekSchedule {
    days: [DaySchedule; 8],
}

impl WeekSchedule {
    /// Parse the persisted representation: a JSON object keyed by the
    /// eight day classifications, each an array of
    /// `{start_time, duration}` runs. A missing key means an empty day;
    /// an unknown key is an error.
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::InvalidSchedule("Schedule must be an object".to_string()))?;

        for key in map.keys() {
            if DayClass::from_str(key).is_none() {
                return Err(Error::InvalidSchedule(format!("Invalid day type: {}", key)));
            }
        }

        let mut days: [DaySchedule; 8] = Default::default();
        for class in DayClass::ALL {
            if let Some(day_value) = map.get(class.as_str()) {
                days[class.index()] = DaySchedule::from_value(day_value)?;
            }
        }

        Ok(Self { days })
    }

    pub fn from_json(serialized: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(serialized)
            .map_err(|e| Error::InvalidSchedule(format!("Unparseable schedule JSON: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for class in DayClass::ALL {
            map.insert(class.as_str().to_string(), self.day(class).to_value());
        }
        Value::Object(map)
    }

    pub fn day(&self, class: DayClass) -> &DaySchedule {
        &self.days[class.index()]
    }

    /// True iff every day is internally valid and no day's last window,
    /// projected past midnight, reaches into the next calendar day's
    /// first window. The holiday bucket takes part in no adjacency pair.
    pub fn validate(&self) -> bool {
        self.all_days_valid() && self.adjacent_days_valid()
    }

    fn all_days_valid(&self) -> bool {
        self.days.iter().all(DaySchedule::validate)
    }

    fn adjacent_days_valid(&self) -> bool {
        for i in 0..7 {
            let day = &self.days[i];
            let next_day = &self.days[(i + 1) % 7];

            let (Some(last), Some(first)) = (day.last(), next_day.first()) else {
                continue;
            };
            if !last.does_not_overlap_with(first, false) {
                return false;
            }
        }
        true
    }

    /// Point-in-time operational query. The instant is converted to local
    /// time in `tz`; a location is operational iff a window of today's
    /// classification covers the instant, or a window of yesterday's
    /// classification still covers it after wrapping past midnight.
    /// Windows never exceed 24 hours, so no older day can reach it.
    pub fn is_operational_at(
        &self,
        instant: DateTime<Utc>,
        tz: Tz,
        holiday_today: bool,
        holiday_yesterday: bool,
    ) -> bool {
        let local = instant
            .with_timezone(&tz)
            .naive_local()
            .with_nanosecond(0)
            .unwrap_or_else(|| instant.with_timezone(&tz).naive_local());

        let today = if holiday_today {
            DayClass::Pub
        } else {
            DayClass::from(local.weekday())
        };
        if self.day(today).windows().iter().any(|w| w.covers(local, true)) {
            return true;
        }

        let yesterday = if holiday_yesterday {
            DayClass::Pub
        } else {
            DayClass::from((local.date() - Duration::days(1)).weekday())
        };
        self.day(yesterday)
            .windows()
            .iter()
            .any(|w| w.covers(local, false))
    }
}
