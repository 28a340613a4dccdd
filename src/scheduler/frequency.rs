//! Schedule frequency handling.
//!
//! The API accepts either a structured frequency (daily, weekly, every N
//! hours) translated here into classic 5-field cron, or a raw cron
//! expression. Everything is normalized to a 6-field expression (leading
//! seconds) before it reaches the cron parser or the runtime scheduler.

use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frequency {
    /// Every day at `time` (`HH:MM`).
    Daily { time: String },
    /// On `days` (0 = Sunday .. 6 = Saturday) at `time`.
    Weekly { days: Vec<u8>, time: String },
    /// Every `hours` hours, on the hour.
    EveryHours { hours: u32 },
    /// Opaque cron expression, validated but not interpreted.
    Custom { expression: String },
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn parse_time(time: &str) -> Result<(u32, u32)> {
    let (hh, mm) = time
        .split_once(':')
        .with_context(|| format!("invalid time '{}', expected HH:MM", time))?;
    let hour: u32 = hh
        .parse()
        .with_context(|| format!("invalid hour in '{}'", time))?;
    let minute: u32 = mm
        .parse()
        .with_context(|| format!("invalid minute in '{}'", time))?;
    if hour > 23 || minute > 59 {
        bail!("time '{}' out of range", time);
    }
    Ok((hour, minute))
}

/// Translates a structured frequency into a 5-field cron expression.
pub fn to_cron(frequency: &Frequency) -> Result<String> {
    match frequency {
        Frequency::Daily { time } => {
            let (hour, minute) = parse_time(time)?;
            Ok(format!("{} {} * * *", minute, hour))
        }
        Frequency::Weekly { days, time } => {
            if days.is_empty() {
                bail!("weekly frequency needs at least one day");
            }
            let (hour, minute) = parse_time(time)?;
            let mut days = days.clone();
            days.sort_unstable();
            days.dedup();
            let names: Vec<&str> = days
                .iter()
                .map(|d| {
                    DAY_NAMES
                        .get(*d as usize)
                        .copied()
                        .with_context(|| format!("invalid weekday {}", d))
                })
                .collect::<Result<_>>()?;
            Ok(format!("{} {} * * {}", minute, hour, names.join(",")))
        }
        Frequency::EveryHours { hours } => {
            if !(1..=23).contains(hours) {
                bail!("hour interval must be between 1 and 23, got {}", hours);
            }
            Ok(format!("0 */{} * * *", hours))
        }
        Frequency::Custom { expression } => {
            normalize(expression)?;
            Ok(expression.trim().to_string())
        }
    }
}

/// Normalizes a 5- or 6-field cron expression to 6 fields and validates its
/// syntax. Anything else is rejected.
pub fn normalize(expression: &str) -> Result<String> {
    let trimmed = expression.trim();
    let fields = trimmed.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", trimmed),
        6 => trimmed.to_string(),
        n => bail!("cron expression must have 5 or 6 fields, got {}", n),
    };
    Schedule::from_str(&normalized)
        .with_context(|| format!("invalid cron expression '{}'", trimmed))?;
    Ok(normalized)
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    Tz::from_str(name.trim()).map_err(|_| anyhow::anyhow!("unknown timezone '{}'", name))
}

/// First occurrence of the schedule strictly after `after`, evaluated in the
/// given timezone, returned in UTC.
pub fn next_occurrence(
    expression: &str,
    timezone: Tz,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let normalized = normalize(expression)?;
    let schedule = Schedule::from_str(&normalized)
        .with_context(|| format!("invalid cron expression '{}'", expression))?;
    let after_local = after.with_timezone(&timezone);
    Ok(schedule
        .after(&after_local)
        .next()
        .map(|dt| dt.with_timezone(&Utc)))
}

/// RFC 3339 next-run stamp for persistence. An invalid timezone falls back
/// to `default_timezone` so bookkeeping never blocks a fire.
pub fn next_run_stamp(expression: &str, timezone: &str, default_timezone: &str) -> Option<String> {
    let tz = parse_timezone(timezone)
        .or_else(|_| parse_timezone(default_timezone))
        .ok()?;
    next_occurrence(expression, tz, Utc::now())
        .ok()
        .flatten()
        .map(|dt| dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_translates_to_cron() {
        let cron = to_cron(&Frequency::Daily {
            time: "09:30".into(),
        })
        .unwrap();
        assert_eq!(cron, "30 9 * * *");
        normalize(&cron).unwrap();
    }

    #[test]
    fn weekly_uses_day_names_sorted_and_deduped() {
        let cron = to_cron(&Frequency::Weekly {
            days: vec![5, 1, 1],
            time: "07:00".into(),
        })
        .unwrap();
        assert_eq!(cron, "0 7 * * MON,FRI");
        normalize(&cron).unwrap();
    }

    #[test]
    fn every_hours_translates_and_bounds() {
        let cron = to_cron(&Frequency::EveryHours { hours: 6 }).unwrap();
        assert_eq!(cron, "0 */6 * * *");
        assert!(to_cron(&Frequency::EveryHours { hours: 0 }).is_err());
        assert!(to_cron(&Frequency::EveryHours { hours: 24 }).is_err());
    }

    #[test]
    fn bad_time_is_rejected() {
        assert!(to_cron(&Frequency::Daily { time: "25:00".into() }).is_err());
        assert!(to_cron(&Frequency::Daily { time: "0930".into() }).is_err());
        assert!(
            to_cron(&Frequency::Weekly {
                days: vec![],
                time: "09:00".into()
            })
            .is_err()
        );
    }

    #[test]
    fn normalize_validates_field_count_and_syntax() {
        assert_eq!(normalize("0 9 * * *").unwrap(), "0 0 9 * * *");
        assert_eq!(normalize("0 0 9 * * *").unwrap(), "0 0 9 * * *");
        assert!(normalize("not a cron").is_err());
        assert!(normalize("* * *").is_err());
        assert!(normalize("99 99 * * *").is_err());
    }

    #[test]
    fn next_occurrence_is_strictly_after() {
        let tz = parse_timezone("UTC").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        // Exactly at 09:00: next run must be tomorrow, not now.
        let next = next_occurrence("0 9 * * *", tz, after).unwrap().unwrap();
        assert!(next > after);
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_occurrence_respects_sao_paulo_offset() {
        // 2024-01-01T23:00Z is 20:00 in America/Sao_Paulo (UTC-3, no DST in
        // 2024). The next local 09:00 is 2024-01-02T09:00-03:00 = 12:00Z.
        let tz = parse_timezone("America/Sao_Paulo").unwrap();
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap();
        let next = next_occurrence("0 9 * * *", tz, created).unwrap().unwrap();
        assert!(next > created);
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(parse_timezone("America/Nowhere").is_err());
        assert!(parse_timezone("America/Sao_Paulo").is_ok());
    }
}
