pub mod trigger;

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::error::TriggerError;

pub use trigger::CronTrigger;

/// A parsed schedule, either a fixed interval or a calendar expression
/// (§6, Schedule). Both variants answer the same two questions the trigger
/// loop needs: when does it next fire, and how many ticks were missed while
/// nothing was watching.
#[derive(Clone, Debug)]
pub enum CronSchedule {
    Interval(StdDuration),
    Spec(Box<cron::Schedule>),
}

impl CronSchedule {
    /// Parses a schedule string. A bare duration like `"30s"` or `"5m"` is
    /// an interval; anything else is treated as a cron expression. Five
    /// space-separated fields are accepted for backward compatibility with
    /// schedules written before per-second granularity existed: seconds are
    /// assumed to be 1, matching expressions written against the standard
    /// five-field form. A six-field expression whose seconds field is the
    /// wildcard is normalized the same way, since an unconstrained seconds
    /// field almost always means "the author didn't think about seconds",
    /// not "fire every second".
    pub fn parse(raw: &str) -> Result<Self, TriggerError> {
        let raw = raw.trim();
        if let Ok(duration) = humantime::parse_duration(raw) {
            return Ok(CronSchedule::Interval(duration));
        }

        let normalized = normalize_cron_expression(raw);
        let schedule = normalized
            .parse::<cron::Schedule>()
            .map_err(|err| TriggerError::Configuration(format!("invalid cron schedule: {err}")))?;
        Ok(CronSchedule::Spec(Box::new(schedule)))
    }

    /// The first fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CronSchedule::Interval(delay) => {
                let delay = chrono::Duration::from_std(*delay).ok()?;
                Some(after + delay)
            }
            CronSchedule::Spec(schedule) => schedule.after(&after).next(),
        }
    }

    /// How long to wait before the next event should fire, given the last
    /// time one fired. Zero means a fire is already overdue and should run
    /// immediately rather than waiting out the rest of the interval (§6).
    pub fn next_submit_delay(&self, last_run: DateTime<Utc>, now: DateTime<Utc>) -> StdDuration {
        match self.next_after(last_run) {
            Some(next) if next > now => (next - now).to_std().unwrap_or_default(),
            _ => StdDuration::ZERO,
        }
    }

    /// How many scheduled fires happened between `last_run` (exclusive) and
    /// `now` (inclusive) without anything observing them (§6).
    pub fn missed_ticks(&self, last_run: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
        let mut count = 0u64;
        let mut cursor = last_run;
        while let Some(next) = self.next_after(cursor) {
            if next > now {
                break;
            }
            count += 1;
            cursor = next;
        }
        count
    }
}

fn normalize_cron_expression(raw: &str) -> String {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    match fields.len() {
        5 => format!("1 {raw}"),
        6 if fields[0] == "*" => {
            let mut rest = fields[1..].join(" ");
            if !rest.is_empty() {
                rest = format!(" {rest}");
            }
            format!("1{rest}")
        }
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn backward_compatible_five_field_schedule_defaults_seconds_to_one() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        let CronSchedule::Spec(spec) = &schedule else {
            panic!("expected a calendar schedule");
        };
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = spec.after(&start).next().unwrap();
        assert_eq!(next.second(), 1);
    }

    #[test]
    fn six_field_wildcard_seconds_normalizes_to_one() {
        let schedule = CronSchedule::parse("* */5 * * * *").unwrap();
        let CronSchedule::Spec(spec) = &schedule else {
            panic!("expected a calendar schedule");
        };
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = spec.after(&start).next().unwrap();
        assert_eq!(next.second(), 1);
    }

    #[test]
    fn interval_missed_ticks_matches_floor_division() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        let cases: [(StdDuration, u64); 3] = [
            (StdDuration::from_millis(0), 0),
            (StdDuration::from_secs(1), 1),
            (StdDuration::from_secs(9), 9),
        ];
        for (diff, expected) in cases {
            let schedule = CronSchedule::Interval(StdDuration::from_secs(1));
            let last = now - chrono::Duration::from_std(diff).unwrap();
            assert_eq!(schedule.missed_ticks(last, now), expected);
        }
    }

    #[test]
    fn spec_schedule_counts_missed_ticks() {
        let schedule = CronSchedule::parse("*/5 * * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 11).unwrap();
        let last_run = now - chrono::Duration::seconds(10);
        assert_eq!(schedule.missed_ticks(last_run, now), 2);
    }

    #[test]
    fn next_submit_delay_is_zero_on_no_misses_upper_bound() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let delay = schedule.next_submit_delay(now, now);
        assert!(delay > StdDuration::ZERO && delay < StdDuration::from_secs(5 * 60));
    }

    #[test]
    fn next_submit_delay_is_zero_when_already_overdue() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap();
        let last_run = now - chrono::Duration::minutes(10);
        assert_eq!(schedule.next_submit_delay(last_run, now), StdDuration::ZERO);
    }

    #[test]
    fn next_schedule_rolls_over_to_the_next_day() {
        let last_run = Utc.with_ymd_and_hms(2019, 1, 1, 1, 1, 1).unwrap();
        let expression = format!("{} {} * * *", last_run.minute(), last_run.hour());
        let schedule = CronSchedule::parse(&expression).unwrap();
        let next = schedule.next_after(last_run).unwrap();
        assert_eq!(next.day(), last_run.day() + 1);
    }
}
