//! Simulated Clock (§4.3).
//!
//! One virtual clock per exchange. Time is carried as a millisecond epoch
//! `i64`, mirroring the teacher's `backtest_v2::clock::SimClock`
//! nanosecond-epoch pattern scaled down to millisecond precision — this spec
//! never needs sub-millisecond resolution and millisecond arithmetic keeps
//! the gating/bucket-floor math exact in integers.

use crate::error::ClockError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::collections::BTreeSet;

pub const MIN_ACCELERATION: f64 = 0.1;
pub const MAX_ACCELERATION: f64 = 1000.0;

const MINUTES_PER_DAY: u32 = 24 * 60;
const MILLIS_PER_MINUTE: i64 = 60_000;

/// Minutes since local midnight, `0..=1440`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DayMinute(pub u32);

impl DayMinute {
    pub fn parse(hhmm: &str) -> Option<Self> {
        let (h, m) = hhmm.split_once(':')?;
        let h: u32 = h.parse().ok()?;
        let m: u32 = m.parse().ok()?;
        if h < 24 && m < 60 {
            Some(Self(h * 60 + m))
        } else {
            None
        }
    }
}

/// A half-open intraday window `[start, end)`, local to the exchange.
#[derive(Debug, Clone)]
pub struct DayInterval {
    pub name: String,
    pub start: DayMinute,
    pub end: DayMinute,
}

impl DayInterval {
    pub fn new(name: impl Into<String>, start: DayMinute, end: DayMinute) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    fn contains_minute(&self, minute: u32) -> bool {
        minute >= self.start.0 && minute < self.end.0
    }
}

/// Derived market-phase label returned by `get_time_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeState {
    PreMarket,
    Morning,
    LunchBreak,
    Afternoon,
    PostMarket,
    NonTradingDay,
    ConfiguredNonTrading,
}

/// Per-exchange virtual clock with acceleration and trading-calendar/interval
/// gating (§3, §4.3).
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    virtual_time_millis: i64,
    acceleration: f64,
    /// Indexed by `chrono::Weekday::num_days_from_monday()`; Mon-Fri `true`
    /// by default.
    trading_days: [bool; 7],
    /// Sorted ascending by `start`.
    trading_intervals: Vec<DayInterval>,
    non_trading_intervals: Vec<DayInterval>,
    /// Reserved for a future holiday calendar (§9 Open Question, decided:
    /// not implemented today — see DESIGN.md). Always empty; checked but
    /// never populated.
    holidays: BTreeSet<NaiveDate>,
}

impl SimulatedClock {
    pub fn new(
        initial_virtual_time_millis: i64,
        acceleration: f64,
        mut trading_intervals: Vec<DayInterval>,
        non_trading_intervals: Vec<DayInterval>,
    ) -> Self {
        if trading_intervals.is_empty() {
            trading_intervals = default_trading_intervals();
        }
        trading_intervals.sort_by_key(|iv| iv.start);
        Self {
            virtual_time_millis: initial_virtual_time_millis,
            acceleration: acceleration.clamp(MIN_ACCELERATION, MAX_ACCELERATION),
            trading_days: [true, true, true, true, true, false, false],
            trading_intervals,
            non_trading_intervals,
            holidays: BTreeSet::new(),
        }
    }

    pub fn virtual_time_millis(&self) -> i64 {
        self.virtual_time_millis
    }

    pub fn virtual_time(&self) -> DateTime<Utc> {
        millis_to_datetime(self.virtual_time_millis)
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    pub fn set_acceleration(&mut self, x: f64) -> Result<(), ClockError> {
        if !(MIN_ACCELERATION..=MAX_ACCELERATION).contains(&x) {
            return Err(ClockError::InvalidAcceleration {
                value_milli: (x * 1000.0) as i64,
            });
        }
        self.acceleration = x;
        Ok(())
    }

    /// Compute the next upcoming occurrence of `market_open` on or after
    /// `now`, snapping forward across non-trading days — used once at
    /// exchange `onBeginPlay` (§4.3 Initialization).
    pub fn initial_time_for(now: DateTime<Utc>, market_open: DayMinute, trading_days: &[bool; 7]) -> i64 {
        let today_open = millis_at(now.date_naive(), market_open.0);
        let mut candidate_date = if now.timestamp_millis() <= today_open {
            now.date_naive()
        } else {
            now.date_naive() + chrono::Duration::days(1)
        };
        for _ in 0..3660 {
            if trading_days[candidate_date.weekday().num_days_from_monday() as usize] {
                return millis_at(candidate_date, market_open.0);
            }
            candidate_date += chrono::Duration::days(1);
        }
        millis_at(candidate_date, market_open.0)
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.trading_days[date.weekday().num_days_from_monday() as usize]
            && !self.holidays.contains(&date)
    }

    fn non_trading_interval_at(&self, ms: i64) -> Option<&DayInterval> {
        let minute = minute_of_day(ms);
        self.non_trading_intervals
            .iter()
            .find(|iv| iv.contains_minute(minute))
    }

    fn trading_interval_at(&self, ms: i64) -> Option<&DayInterval> {
        let minute = minute_of_day(ms);
        self.trading_intervals
            .iter()
            .find(|iv| iv.contains_minute(minute))
    }

    /// Fully frozen: not a trading day, or inside an explicit non-trading
    /// interval. Nothing — not even a jump — happens while frozen.
    fn is_frozen(&self, ms: i64) -> bool {
        !self.is_trading_day(date_of(ms)) || self.non_trading_interval_at(ms).is_some()
    }

    fn is_open(&self, ms: i64) -> bool {
        self.is_trading_day(date_of(ms))
            && self.trading_interval_at(ms).is_some()
            && self.non_trading_interval_at(ms).is_none()
    }

    /// Find the earliest instant `>= target` at which the clock would be
    /// open, skipping over intraday gaps (e.g. lunch), configured
    /// non-trading intervals, and non-trading calendar days.
    fn resolve_forward(&self, target: i64) -> i64 {
        let mut cursor = target;
        for _ in 0..(3660 * (self.trading_intervals.len().max(1) + self.non_trading_intervals.len() + 1)) {
            if self.is_open(cursor) {
                return cursor;
            }
            if let Some(nt) = self.non_trading_interval_at(cursor) {
                cursor = millis_at(date_of(cursor), nt.end.0);
                continue;
            }
            if !self.is_trading_day(date_of(cursor)) {
                cursor = millis_at(date_of(cursor) + chrono::Duration::days(1), 0);
                continue;
            }
            // On a trading day, outside any interval: find the next interval
            // start today at or after `cursor`, else jump to the first
            // interval of the next trading day.
            let minute = minute_of_day(cursor);
            if let Some(next) = self
                .trading_intervals
                .iter()
                .find(|iv| iv.start.0 >= minute)
            {
                cursor = millis_at(date_of(cursor), next.start.0);
                continue;
            }
            let mut next_date = date_of(cursor) + chrono::Duration::days(1);
            while !self.is_trading_day(next_date) {
                next_date += chrono::Duration::days(1);
            }
            let first = self
                .trading_intervals
                .first()
                .map(|iv| iv.start.0)
                .unwrap_or(9 * 60 + 30);
            cursor = millis_at(next_date, first);
        }
        cursor
    }

    /// Advance the clock by `real_delta_seconds` of wall-clock time,
    /// applying `acceleration` and trading-hours gating (§4.3).
    pub fn advance(&mut self, real_delta_seconds: f64) {
        if real_delta_seconds <= 0.0 {
            return;
        }
        let current = self.virtual_time_millis;
        if self.is_frozen(current) {
            return;
        }
        let delta_ms = (real_delta_seconds * self.acceleration * 1000.0).round() as i64;
        let naive_new = current + delta_ms.max(0);
        let resolved = self.resolve_forward(naive_new);
        if resolved > self.virtual_time_millis {
            self.virtual_time_millis = resolved;
        }
    }

    pub fn get_time_state(&self) -> TimeState {
        let ms = self.virtual_time_millis;
        if !self.is_trading_day(date_of(ms)) {
            return TimeState::NonTradingDay;
        }
        if self.non_trading_interval_at(ms).is_some() {
            return TimeState::ConfiguredNonTrading;
        }
        let minute = minute_of_day(ms);
        if let Some(pos) = self
            .trading_intervals
            .iter()
            .position(|iv| iv.contains_minute(minute))
        {
            return if pos == 0 {
                TimeState::Morning
            } else if pos + 1 == self.trading_intervals.len() {
                TimeState::Afternoon
            } else {
                TimeState::Morning
            };
        }
        match self.trading_intervals.first() {
            Some(first) if minute < first.start.0 => TimeState::PreMarket,
            _ => match self.trading_intervals.last() {
                Some(last) if minute >= last.end.0 => TimeState::PostMarket,
                _ => TimeState::LunchBreak,
            },
        }
    }
}

fn default_trading_intervals() -> Vec<DayInterval> {
    vec![
        DayInterval::new(
            "morning",
            DayMinute::parse("09:30").unwrap(),
            DayMinute::parse("11:30").unwrap(),
        ),
        DayInterval::new(
            "afternoon",
            DayMinute::parse("13:00").unwrap(),
            DayMinute::parse("15:00").unwrap(),
        ),
    ]
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or(Utc.timestamp_opt(0, 0).unwrap())
}

fn date_of(ms: i64) -> NaiveDate {
    millis_to_datetime(ms).date_naive()
}

fn minute_of_day(ms: i64) -> u32 {
    let dt = millis_to_datetime(ms);
    dt.hour() * 60 + dt.minute()
}

fn millis_at(date: NaiveDate, minute: u32) -> i64 {
    let naive = NaiveDateTime::new(
        date,
        chrono::NaiveTime::from_hms_opt(minute / 60, minute % 60, 0).unwrap(),
    );
    Utc.from_utc_datetime(&naive).timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> i64 {
        chrono::DateTime::parse_from_rfc3339(s)
            .unwrap()
            .with_timezone(&Utc)
            .timestamp_millis()
    }

    #[test]
    fn gating_jumps_across_lunch_gap() {
        let mut clock = SimulatedClock::new(ts("2026-01-05T11:30:00Z"), 1.0, vec![], vec![]);
        clock.advance(120.0);
        assert_eq!(clock.virtual_time_millis(), ts("2026-01-05T13:00:00Z"));
    }

    #[test]
    fn weekend_is_skipped() {
        // 2026-01-02 is a Friday.
        let mut clock = SimulatedClock::new(ts("2026-01-02T15:00:00Z"), 1.0, vec![], vec![]);
        clock.advance(60.0);
        assert_eq!(clock.virtual_time_millis(), ts("2026-01-05T09:30:00Z"));
    }

    #[test]
    fn virtual_time_never_decreases() {
        let mut clock = SimulatedClock::new(ts("2026-01-05T09:30:00Z"), 1.0, vec![], vec![]);
        let before = clock.virtual_time_millis();
        clock.advance(10.0);
        assert!(clock.virtual_time_millis() >= before);
    }

    #[test]
    fn set_acceleration_validates_range() {
        let mut clock = SimulatedClock::new(ts("2026-01-05T09:30:00Z"), 1.0, vec![], vec![]);
        assert!(clock.set_acceleration(0.05).is_err());
        assert!(clock.set_acceleration(2000.0).is_err());
        assert!(clock.set_acceleration(5.0).is_ok());
        assert_eq!(clock.acceleration(), 5.0);
    }

    #[test]
    fn frozen_on_configured_non_trading_interval() {
        let non_trading = vec![DayInterval::new(
            "maintenance",
            DayMinute::parse("10:00").unwrap(),
            DayMinute::parse("10:15").unwrap(),
        )];
        let mut clock = SimulatedClock::new(ts("2026-01-05T10:05:00Z"), 1.0, vec![], non_trading);
        clock.advance(60.0);
        assert_eq!(clock.virtual_time_millis(), ts("2026-01-05T10:05:00Z"));
        assert_eq!(clock.get_time_state(), TimeState::ConfiguredNonTrading);
    }

    #[test]
    fn initial_time_snaps_to_next_trading_day() {
        let trading_days = [true, true, true, true, true, false, false];
        // 2026-01-03 is a Saturday.
        let now = chrono::DateTime::parse_from_rfc3339("2026-01-03T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let open = DayMinute::parse("09:15").unwrap();
        let initial = SimulatedClock::initial_time_for(now, open, &trading_days);
        assert_eq!(initial, ts("2026-01-05T09:15:00Z"));
    }
}
