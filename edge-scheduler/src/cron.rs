//! The restricted cron subset spec.md §9 allows: `*/N * * * *` ("every N
//! minutes") and `H M * * *` ("daily at H:M"). Nothing beyond these two
//! shapes is supported; anything else is a `ConfigInvalid` at parse time.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronParseError {
    #[error("unsupported cron expression {0:?}: only '*/N * * * *' and 'H M * * *' are supported")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronSchedule {
    EveryMinutes(u32),
    Daily { hour: u32, minute: u32 },
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 || fields[2] != "*" || fields[3] != "*" || fields[4] != "*" {
            return Err(CronParseError::Unsupported(expr.to_owned()));
        }

        if let Some(n) = fields[0].strip_prefix("*/") {
            if fields[1] == "*" {
                let n: u32 = n.parse().map_err(|_| CronParseError::Unsupported(expr.to_owned()))?;
                if n == 0 {
                    return Err(CronParseError::Unsupported(expr.to_owned()));
                }
                return Ok(CronSchedule::EveryMinutes(n));
            }
        }

        if fields[0] != "*" && fields[1] != "*" {
            let hour: u32 = fields[1].parse().map_err(|_| CronParseError::Unsupported(expr.to_owned()))?;
            let minute: u32 = fields[0].parse().map_err(|_| CronParseError::Unsupported(expr.to_owned()))?;
            if hour > 23 || minute > 59 {
                return Err(CronParseError::Unsupported(expr.to_owned()));
            }
            return Ok(CronSchedule::Daily { hour, minute });
        }

        Err(CronParseError::Unsupported(expr.to_owned()))
    }

    /// The next fire time strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            CronSchedule::EveryMinutes(n) => {
                let minute = from.minute() as i64;
                let n = n as i64;
                let next_boundary = ((minute / n) + 1) * n;
                let minutes_ahead = next_boundary - minute;
                (from + ChronoDuration::minutes(minutes_ahead))
                    .with_second(0)
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(from)
            }
            CronSchedule::Daily { hour, minute } => {
                let today = Utc
                    .with_ymd_and_hms(from.year(), from.month(), from.day(), hour, minute, 0)
                    .single()
                    .unwrap_or(from);
                if today > from {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
        }
    }

    /// Duration from `from` until the next fire, for use with
    /// `tokio::time::sleep`.
    pub fn duration_until_next(&self, from: DateTime<Utc>) -> std::time::Duration {
        let next = self.next_after(from);
        (next - from).to_std().unwrap_or(std::time::Duration::from_secs(1))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_every_n_minutes() {
        assert_eq!(CronSchedule::parse("*/5 * * * *").unwrap(), CronSchedule::EveryMinutes(5));
    }

    #[test]
    fn parses_daily() {
        assert_eq!(
            CronSchedule::parse("30 2 * * *").unwrap(),
            CronSchedule::Daily { hour: 2, minute: 30 }
        );
    }

    #[test]
    fn rejects_unsupported_shapes() {
        assert!(CronSchedule::parse("*/5 * * * 1-5").is_err());
        assert!(CronSchedule::parse("* * * * *").is_err());
        assert!(CronSchedule::parse("not a cron").is_err());
    }

    #[test]
    fn every_n_minutes_lands_on_the_next_boundary() {
        let schedule = CronSchedule::EveryMinutes(5);
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 10, 2, 30).unwrap();
        let next = schedule.next_after(from);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn daily_rolls_to_tomorrow_once_todays_slot_has_passed() {
        let schedule = CronSchedule::Daily { hour: 2, minute: 0 };
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
        let next = schedule.next_after(from);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 2, 0, 0).unwrap());
    }
}
