//! Cron grammar and next-fire computation for both trigger kinds.

use std::str::FromStr;

use {
    chrono::{DateTime, TimeDelta, Utc},
    cron::Schedule,
    tracing::debug,
};

use crate::{
    Error, Result,
    error::Context,
    types::{JobId, TriggerKey, TriggerSpec},
};

/// Parse a cron expression.
///
/// Accepts the 6/7-field form with seconds (`sec min hour dom month dow
/// [year]`) where day-of-week runs 1 (Sunday) to 7 (Saturday), and the
/// classic 5-field form where day-of-week runs 0 (Sunday) to 6, with 7 also
/// Sunday. The 5-field form gets a zero seconds field and a wildcard year.
/// `?` is read as "any value". The `L`, `W` and `#` day modifiers are not
/// supported.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let mut fields: Vec<String> = expression
        .split_whitespace()
        .map(|f| if f == "?" { "*".to_string() } else { f.to_string() })
        .collect();
    if fields.is_empty() {
        return Err(Error::message("empty cron expression"));
    }

    if fields.len() == 5 {
        fields[4] = standard_day_of_week(&fields[4])?;
        fields.insert(0, "0".to_string());
        fields.push("*".to_string());
    }
    Ok(Schedule::from_str(&fields.join(" "))?)
}

/// Rewrite a classic day-of-week field (0 or 7 = Sunday) into the 1-based
/// numbering of the seconds form. Named days pass through unchanged.
fn standard_day_of_week(field: &str) -> Result<String> {
    if field == "*" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days: Vec<u32> = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(parse_day_number(step)?)),
            None => (item, None),
        };
        let (first, last) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((a, b)) => (parse_day_number(a)?, parse_day_number(b)?),
            None => {
                let day = parse_day_number(range)?;
                (day, if step.is_some() { 6 } else { day })
            },
        };
        if first > 7 || last > 7 || first > last || step == Some(0) {
            return Err(Error::message(format!("invalid day-of-week: {item}")));
        }
        let step = step.unwrap_or(1) as usize;
        days.extend((first..=last).step_by(step).map(|d| d % 7 + 1));
    }
    days.sort_unstable();
    days.dedup();

    Ok(days
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_day_number(value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .with_context(|| format!("invalid day-of-week value: {value}"))
}

/// Whether `expression` parses, without registering anything.
pub fn is_valid_cron(expression: &str) -> bool {
    match parse_cron(expression) {
        Ok(_) => true,
        Err(e) => {
            debug!(expression, error = %e, "invalid cron expression");
            false
        },
    }
}

#[derive(Debug, Clone)]
enum Plan {
    Cron(Box<Schedule>),
    Interval { every: TimeDelta },
}

/// A compiled trigger with its next planned fire time.
#[derive(Debug, Clone)]
pub struct Trigger {
    key: TriggerKey,
    plan: Plan,
    next_fire_at: Option<DateTime<Utc>>,
}

impl Trigger {
    /// Compile `spec` for `job_id`, planning the first fire after `now`.
    ///
    /// Fails for malformed cron, a zero interval, or a schedule that would
    /// never fire.
    pub fn new(job_id: &JobId, spec: &TriggerSpec, now: DateTime<Utc>) -> Result<Self> {
        let (plan, first) = match spec {
            TriggerSpec::Cron { expression } => {
                let schedule = parse_cron(expression)
                    .map_err(|e| Error::invalid_trigger(job_id.as_str(), e.to_string()))?;
                let first = schedule.after(&now).next();
                (Plan::Cron(Box::new(schedule)), first)
            },
            TriggerSpec::Interval {
                seconds,
                initial_delay_secs,
            } => {
                if *seconds == 0 {
                    return Err(Error::invalid_trigger(
                        job_id.as_str(),
                        "interval must be at least one second",
                    ));
                }
                let every = seconds_delta(*seconds).ok_or_else(|| {
                    Error::invalid_trigger(job_id.as_str(), "interval out of range")
                })?;
                let first = seconds_delta(*initial_delay_secs)
                    .and_then(|delay| now.checked_add_signed(delay));
                (Plan::Interval { every }, first)
            },
        };

        if first.is_none() {
            return Err(Error::invalid_trigger(
                job_id.as_str(),
                "schedule will never fire",
            ));
        }

        Ok(Self {
            key: job_id.trigger_key(),
            plan,
            next_fire_at: first,
        })
    }

    pub fn key(&self) -> &TriggerKey {
        &self.key
    }

    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.next_fire_at
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire_at.is_some_and(|t| t <= now)
    }

    /// If due at `now`, return the planned fire time and move on to the next
    /// occurrence strictly after `now`. Missed occurrences are skipped.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let due = self.next_fire_at.filter(|t| *t <= now)?;
        self.next_fire_at = match &self.plan {
            Plan::Cron(schedule) => schedule.after(&now).next(),
            Plan::Interval { every } => {
                // Fixed rate: stay on the grid anchored at the first fire.
                let step = every.num_milliseconds().max(1);
                let periods = (now - due).num_milliseconds() / step + 1;
                TimeDelta::try_milliseconds(step.saturating_mul(periods))
                    .and_then(|offset| due.checked_add_signed(offset))
            },
        };
        Some(due)
    }
}

fn seconds_delta(seconds: u64) -> Option<TimeDelta> {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
}
