//! Cadence expressions and next-fire computation.
//!
//! Two forms are accepted:
//!
//! - fixed interval: `@every 10h00m00s`, `@every 90s`, `every 2 hours`
//! - cron: standard 5-field (`*/15 * * * *`), 6-field with seconds, 7-field
//!   with year, or a descriptor such as `@hourly` / `@daily`
//!
//! Anything else is a [`ScheduleError::InvalidCadence`] at registration time.

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ScheduleError;

static EVERY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^@?every\s+(.+)$").expect("static regex"));

static DURATION_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\d+)\s*(milliseconds?|ms|seconds?|secs?|s|minutes?|mins?|m|hours?|hrs?|h|days?|d)",
    )
    .expect("static regex")
});

/// A parsed recurrence rule.
#[derive(Clone)]
pub enum Cadence {
    /// Fire every fixed interval, first firing one interval after registration.
    Every(Duration),
    /// Fire on every matching cron tick (UTC).
    Cron(Box<CronSchedule>),
}

impl Cadence {
    /// Parse a cadence expression.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidCadence {
            expression: expression.to_string(),
            reason,
        };

        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(invalid("expression is empty".to_string()));
        }

        if let Some(caps) = EVERY_PREFIX.captures(trimmed) {
            let interval = parse_interval(&caps[1]).map_err(invalid)?;
            return Ok(Cadence::Every(interval));
        }

        let normalized = normalize_cron(trimmed);
        CronSchedule::from_str(&normalized)
            .map(|s| Cadence::Cron(Box::new(s)))
            .map_err(|e| invalid(e.to_string()))
    }

    /// First firing instant strictly after `after`, or `None` if the rule has
    /// no further occurrences.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::Every(interval) => {
                let step = chrono::Duration::from_std(*interval).ok()?;
                after.checked_add_signed(step)
            }
            Cadence::Cron(schedule) => schedule.after(&after).next(),
        }
    }
}

impl FromStr for Cadence {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cadence::parse(s)
    }
}

impl fmt::Debug for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Every(d) => f.debug_tuple("Every").field(d).finish(),
            Cadence::Cron(s) => f.debug_tuple("Cron").field(&s.to_string()).finish(),
        }
    }
}

/// The `cron` crate wants a leading seconds field; classic crontab lines
/// don't have one. Crontab also numbers weekdays 0-7 from Sunday while the
/// crate uses 1-7 from Sunday, so a 5-field line gets its day-of-week field
/// renumbered. 6- and 7-field lines are passed through in the crate's own
/// numbering.
fn normalize_cron(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 {
        format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            crontab_weekdays(fields[4])
        )
    } else {
        expression.to_string()
    }
}

/// Renumber a crontab day-of-week field (Sunday = 0 or 7) into the `cron`
/// crate's numbering (Sunday = 1). Names and `*` pass through.
///
/// ```ignore
/// assert_eq!(crontab_weekdays("0"), "1");
/// assert_eq!(crontab_weekdays("1-5"), "2-6");
/// assert_eq!(crontab_weekdays("5-7"), "6-7,1");
/// ```
fn crontab_weekdays(field: &str) -> String {
    field.split(',').map(crontab_weekday_item).join(",")
}

fn crontab_weekday_item(item: &str) -> String {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };
    let suffix = step.map(|s| format!("/{s}")).unwrap_or_default();

    match range.split_once('-') {
        Some((start, end)) => match (start.parse::<u32>(), end.parse::<u32>()) {
            (Ok(0), Ok(7)) => format!("1-7{suffix}"),
            // Saturday..Sunday wraps in the crate's numbering: split off Sunday.
            (Ok(start), Ok(7)) if (1..7).contains(&start) => {
                let every = step.and_then(|s| s.parse::<u32>().ok()).unwrap_or(1);
                let mut out = format!("{}-7{suffix}", start + 1);
                if every > 0 && (7 - start) % every == 0 {
                    out.push_str(",1");
                }
                out
            }
            (Ok(start), Ok(end)) => format!("{}-{}{suffix}", weekday(start), weekday(end)),
            _ => item.to_string(),
        },
        None => match range.parse::<u32>() {
            Ok(day) => format!("{}{suffix}", weekday(day)),
            Err(_) => item.to_string(),
        },
    }
}

/// Out-of-range values are left alone so the parser rejects them.
fn weekday(day: u32) -> u32 {
    if day <= 7 { day % 7 + 1 } else { day }
}

/// Parse `10h00m00s`, `1h30m`, `90s`, `2 hours`, `1d 12h`, `500ms`.
fn parse_interval(text: &str) -> Result<Duration, String> {
    let mut total = Duration::ZERO;
    let mut matched_chars = 0usize;

    for caps in DURATION_PART.captures_iter(text) {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        matched_chars += whole.chars().filter(|c| !c.is_whitespace()).count();

        let n: u64 = caps[1]
            .parse()
            .map_err(|_| format!("number '{}' is out of range", &caps[1]))?;
        let unit = caps[2].to_ascii_lowercase();
        let part = match unit.as_str() {
            "ms" | "millisecond" | "milliseconds" => Duration::from_millis(n),
            "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs(n),
            "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs(n.saturating_mul(60)),
            "h" | "hr" | "hrs" | "hour" | "hours" => Duration::from_secs(n.saturating_mul(3_600)),
            _ => Duration::from_secs(n.saturating_mul(86_400)),
        };
        total = total
            .checked_add(part)
            .ok_or_else(|| "interval is too large".to_string())?;
    }

    // Every non-blank character must belong to a number+unit pair.
    let significant = text.chars().filter(|c| !c.is_whitespace()).count();
    if matched_chars == 0 || matched_chars != significant {
        return Err(format!("cannot read interval '{}'", text.trim()));
    }
    if total.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(total)
}
