// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Next-fire computation for task recurrences.
//!
//! Weekdays are numbered 0 = Monday .. 6 = Sunday. Cron expressions are the
//! classic five fields (minute, hour, day-of-month, month, day-of-week);
//! when both day fields are restricted, either matching suffices, as in
//! traditional cron.

use super::ScheduleError;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use dx_core::{Recurrence, TimeOfDay};

/// How far ahead a cron search will look before giving up. Covers leap-day
/// schedules; anything unsatisfiable past this is treated as never firing.
const CRON_SEARCH_DAYS: i64 = 1500;

/// The next fire time strictly after `after`, or `None` when the recurrence
/// will never fire again.
pub fn next_fire(
    recurrence: &Recurrence,
    scheduled_time: DateTime<Utc>,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    match recurrence {
        Recurrence::Once => Ok((scheduled_time > after).then_some(scheduled_time)),
        Recurrence::Daily { time } => Ok(Some(next_daily(*time, after))),
        Recurrence::Weekly { days, time } => next_weekly(days, *time, after),
        Recurrence::Monthly { day, time } => next_monthly(*day, *time, after),
        Recurrence::Cron { expression } => {
            let schedule = parse_cron(expression)?;
            Ok(schedule.next_after(after))
        }
    }
}

fn at_time(date: chrono::NaiveDate, time: TimeOfDay) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(date.year(), date.month(), date.day(), time.hour, time.minute, 0)
        .single()
}

fn next_daily(time: TimeOfDay, after: DateTime<Utc>) -> DateTime<Utc> {
    let today = after.date_naive();
    for offset in 0..=1 {
        if let Some(candidate) = at_time(today + Duration::days(offset), time) {
            if candidate > after {
                return candidate;
            }
        }
    }
    // Unreachable in practice; the day after tomorrow always qualifies.
    after + Duration::days(1)
}

fn next_weekly(
    days: &[u8],
    time: TimeOfDay,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    if days.is_empty() || days.iter().any(|d| *d > 6) {
        return Err(ScheduleError::InvalidRecurrence(format!(
            "weekly days out of range: {days:?}"
        )));
    }
    let start = after.date_naive();
    for offset in 0..=7 {
        let date = start + Duration::days(offset);
        let weekday = date.weekday().num_days_from_monday() as u8;
        if !days.contains(&weekday) {
            continue;
        }
        if let Some(candidate) = at_time(date, time) {
            if candidate > after {
                return Ok(Some(candidate));
            }
        }
    }
    Ok(None)
}

fn next_monthly(
    day: u32,
    time: TimeOfDay,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    if !(1..=31).contains(&day) {
        return Err(ScheduleError::InvalidRecurrence(format!("day of month out of range: {day}")));
    }
    let mut year = after.year();
    let mut month = after.month();
    // Short months skip; five years of months covers every legal day value.
    for _ in 0..60 {
        if let Some(date) = chrono::NaiveDate::from_ymd_opt(year, month, day) {
            if let Some(candidate) = at_time(date, time) {
                if candidate > after {
                    return Ok(Some(candidate));
                }
            }
        }
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    Ok(None)
}

/// One parsed cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    Any,
    Values(Vec<u32>),
}

impl CronField {
    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Values(values) => values.contains(&value),
        }
    }

    fn is_any(&self) -> bool {
        matches!(self, CronField::Any)
    }
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronSchedule {
    /// Whether this schedule matches the given instant (minute resolution).
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        if !self.minute.matches(at.minute()) || !self.hour.matches(at.hour()) {
            return false;
        }
        if !self.month.matches(at.month()) {
            return false;
        }
        // 0 = Sunday in cron's day-of-week numbering
        let dow = at.weekday().num_days_from_sunday();
        let dom_ok = self.day_of_month.matches(at.day());
        let dow_ok = self.day_of_week.matches(dow);
        match (self.day_of_month.is_any(), self.day_of_week.is_any()) {
            (false, false) => dom_ok || dow_ok,
            _ => dom_ok && dow_ok,
        }
    }

    /// The next matching instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        let limit = after + Duration::days(CRON_SEARCH_DAYS);
        while candidate <= limit {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// Parse a classic five-field cron expression.
pub fn parse_cron(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ScheduleError::InvalidCron(format!(
            "expected 5 fields, got {}: {expression:?}",
            fields.len()
        )));
    }
    Ok(CronSchedule {
        minute: parse_field(fields[0], 0, 59, expression)?,
        hour: parse_field(fields[1], 0, 23, expression)?,
        day_of_month: parse_field(fields[2], 1, 31, expression)?,
        month: parse_field(fields[3], 1, 12, expression)?,
        day_of_week: parse_dow(fields[4], expression)?,
    })
}

/// Day-of-week accepts 0–7 with 7 normalized to Sunday (0).
fn parse_dow(field: &str, expression: &str) -> Result<CronField, ScheduleError> {
    match parse_field(field, 0, 7, expression)? {
        CronField::Any => Ok(CronField::Any),
        CronField::Values(values) => {
            let mut normalized: Vec<u32> =
                values.into_iter().map(|v| if v == 7 { 0 } else { v }).collect();
            normalized.sort_unstable();
            normalized.dedup();
            Ok(CronField::Values(normalized))
        }
    }
}

fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    expression: &str,
) -> Result<CronField, ScheduleError> {
    if field == "*" {
        return Ok(CronField::Any);
    }

    let invalid = || ScheduleError::InvalidCron(format!("bad field {field:?} in {expression:?}"));

    let mut values = Vec::new();
    for atom in field.split(',') {
        let (range, step) = match atom.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, step)
            }
            None => (atom, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (lo.parse().map_err(|_| invalid())?, hi.parse().map_err(|_| invalid())?)
        } else {
            let value: u32 = range.parse().map_err(|_| invalid())?;
            (value, value)
        };

        if lo < min || hi > max || lo > hi {
            return Err(invalid());
        }
        values.extend((lo..=hi).step_by(step as usize));
    }

    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err(invalid());
    }
    Ok(CronField::Values(values))
}

#[cfg(test)]
#[path = "trigger_tests.rs"]
mod tests;
