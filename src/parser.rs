//! Schedule expression parsing
//!
//! Two expression families are accepted:
//!
//! - standard 5-field cron syntax (`min hour day month weekday`) with `*`,
//!   lists (`1,3,5`), ranges (`1-5`) and steps (`*/5`, `0-30/5`)
//! - `@`-directives: `@every <duration>` (e.g. `@every 1s`, `@every 1h30m`),
//!   `@hourly`, `@daily`, `@midnight`, `@weekly`, `@monthly`

use crate::error::{CronError, Result};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use std::time::Duration;

/// A parsed schedule expression
#[derive(Debug, Clone)]
pub enum Schedule {
    /// 5-field cron expression, minute resolution
    Cron(CronExpression),
    /// Fixed interval, first firing one interval after start
    Every(Duration),
}

impl Schedule {
    /// Parse a schedule expression string
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(CronError::InvalidExpression(
                "empty expression".to_string(),
            ));
        }

        if let Some(rest) = expression.strip_prefix("@every ") {
            let interval = parse_duration(rest.trim())?;
            if interval.is_zero() {
                return Err(CronError::InvalidExpression(
                    "@every interval cannot be zero".to_string(),
                ));
            }
            return Ok(Schedule::Every(interval));
        }

        let normalized = match expression {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            other if other.starts_with('@') => {
                return Err(CronError::InvalidExpression(format!(
                    "unknown directive '{}'",
                    other
                )))
            }
            other => other,
        };

        Ok(Schedule::Cron(CronExpression::parse(normalized)?))
    }

    /// Next firing time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(expr) => expr.next_after(after),
            Schedule::Every(interval) => {
                Some(after + ChronoDuration::from_std(*interval).ok()?)
            }
        }
    }
}

/// A parsed 5-field cron expression.
///
/// Each field is a bitmask of allowed values, so matching a timestamp is a
/// handful of bit tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
}

impl CronExpression {
    /// Parse a 5-field cron expression
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::InvalidExpression(format!(
                "expected 5 fields, got {}",
                fields.len()
            )));
        }

        Ok(Self {
            minutes: parse_field(fields[0], 0, 59, "minute")?,
            hours: parse_field(fields[1], 0, 23, "hour")?,
            days: parse_field(fields[2], 1, 31, "day")?,
            months: parse_field(fields[3], 1, 12, "month")?,
            weekdays: parse_field(fields[4], 0, 6, "weekday")?,
        })
    }

    /// Check whether a timestamp matches this expression
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        bit_set(self.minutes, at.minute())
            && bit_set(self.hours, at.hour())
            && bit_set(self.days, at.day())
            && bit_set(self.months, at.month())
            && bit_set(self.weekdays, at.weekday().num_days_from_sunday())
    }

    /// Next matching minute strictly after `after`, or `None` if nothing
    /// matches within four years (impossible-date expressions)
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + ChronoDuration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;

        // Minute walk, bounded so "31 Feb"-style expressions terminate
        let max_minutes = 4 * 366 * 24 * 60;
        for _ in 0..max_minutes {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += ChronoDuration::minutes(1);
        }

        None
    }
}

fn bit_set(mask: u64, value: u32) -> bool {
    value < 64 && mask & (1 << value) != 0
}

/// Parse one cron field into a bitmask of allowed values
fn parse_field(field: &str, min: u32, max: u32, name: &str) -> Result<u64> {
    let mut mask: u64 = 0;

    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step_str)) => {
                let step: u32 = step_str.parse().map_err(|_| {
                    CronError::InvalidExpression(format!(
                        "invalid step '{}' in {} field",
                        step_str, name
                    ))
                })?;
                if step == 0 {
                    return Err(CronError::InvalidExpression(format!(
                        "step cannot be zero in {} field",
                        name
                    )));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (
                parse_value(lo, name)?,
                parse_value(hi, name)?,
            )
        } else {
            let value = parse_value(range, name)?;
            (value, value)
        };

        if start < min || end > max || start > end {
            return Err(CronError::InvalidExpression(format!(
                "range {}-{} out of bounds ({}-{}) in {} field",
                start, end, min, max, name
            )));
        }

        let mut value = start;
        while value <= end {
            mask |= 1 << value;
            value += step;
        }
    }

    if mask == 0 {
        return Err(CronError::InvalidExpression(format!(
            "no values in {} field",
            name
        )));
    }

    Ok(mask)
}

fn parse_value(text: &str, name: &str) -> Result<u32> {
    text.parse().map_err(|_| {
        CronError::InvalidExpression(format!("invalid value '{}' in {} field", text, name))
    })
}

/// Parse a duration like `500ms`, `1s`, `90s`, `2m`, `1h30m`
fn parse_duration(text: &str) -> Result<Duration> {
    if text.is_empty() {
        return Err(CronError::InvalidExpression(
            "missing @every interval".to_string(),
        ));
    }

    let mut total = Duration::ZERO;
    let mut chars = text.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                number.push(*c);
                chars.next();
            } else {
                break;
            }
        }

        let mut unit = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(*c);
                chars.next();
            } else {
                break;
            }
        }

        let value: u64 = number.parse().map_err(|_| {
            CronError::InvalidExpression(format!("invalid interval '{}'", text))
        })?;

        let part = match unit.as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => {
                return Err(CronError::InvalidExpression(format!(
                    "invalid interval unit '{}' in '{}'",
                    unit, text
                )))
            }
        };
        total += part;
    }

    Ok(total)
}
