//! Natural-language schedule grammar.
//!
//! An ordered rule list maps fixed phrases to cron expressions or one-shot
//! datetimes; raw 5-field cron passes through validated. Weekday rules emit
//! named day tokens (MON..SUN) to sidestep the 0-vs-7 Sunday ambiguity.
//! Anything else is a typed error.

use chrono::{DateTime, Duration, Timelike, Utc};
use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// A parsed schedule: recurring cron or a single run time.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedSchedule {
    Cron(String),
    Once(DateTime<Utc>),
}

#[derive(Debug, Error)]
pub enum ScheduleParseError {
    #[error(
        "cannot parse schedule: '{0}'. Use a cron expression (e.g. '0 9 * * *'), \
         recurring natural language (e.g. 'every morning at 9am'), or one-time \
         (e.g. 'in 5 minutes', 'at 3pm')"
    )]
    Unparseable(String),
    #[error("invalid cron expression '{expr}': {detail}")]
    InvalidCron { expr: String, detail: String },
}

macro_rules! rx {
    ($name:ident, $pattern:expr) => {{
        static $name: OnceLock<Regex> = OnceLock::new();
        $name.get_or_init(|| Regex::new($pattern).expect("static regex"))
    }};
}

/// Evaluates the next fire time of a 5-field cron expression strictly after
/// `after`. The stored form stays 5-field; a seconds field is prepended only
/// at this evaluation boundary.
pub fn next_cron_occurrence(
    expr: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleParseError> {
    let with_seconds = format!("0 {expr}");
    let schedule = cron::Schedule::from_str(&with_seconds).map_err(|e| {
        ScheduleParseError::InvalidCron {
            expr: expr.to_string(),
            detail: e.to_string(),
        }
    })?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| ScheduleParseError::InvalidCron {
            expr: expr.to_string(),
            detail: "no future occurrence".to_string(),
        })
}

fn to_24h(hour: u32, ampm: Option<&str>) -> u32 {
    match ampm {
        Some("pm") if hour < 12 => hour + 12,
        Some("am") if hour == 12 => 0,
        _ => hour,
    }
}

/// Parses a schedule phrase relative to `now`.
pub fn parse_schedule(text: &str, now: DateTime<Utc>) -> Result<ParsedSchedule, ScheduleParseError> {
    let lower = text.to_lowercase();
    let lower = lower.trim();

    // -- Recurring phrases --------------------------------------------------

    if let Some(c) = rx!(EVERY_N_MIN, r"^every\s+(\d+)\s+minutes?$").captures(lower) {
        return Ok(ParsedSchedule::Cron(format!("*/{} * * * *", &c[1])));
    }
    if rx!(EVERY_HOUR, r"^every\s+hour$").is_match(lower) {
        return Ok(ParsedSchedule::Cron("0 * * * *".to_string()));
    }
    if let Some(c) = rx!(MORNING, r"^every\s+morning\s+at\s+(\d{1,2})\s*am$").captures(lower) {
        return Ok(ParsedSchedule::Cron(format!("0 {} * * *", &c[1])));
    }
    if let Some(c) =
        rx!(EVENING, r"^every\s+(?:evening|night)\s+at\s+(\d{1,2})\s*pm$").captures(lower)
    {
        let hour: u32 = c[1].parse().unwrap_or(0);
        return Ok(ParsedSchedule::Cron(format!("0 {} * * *", hour + 12)));
    }
    if let Some(c) = rx!(EVERY_DAY, r"^every\s+day\s+at\s+(\d{1,2}):(\d{2})$").captures(lower) {
        return Ok(ParsedSchedule::Cron(format!("{} {} * * *", &c[2], &c[1])));
    }
    if lower.contains("daily at midnight") {
        return Ok(ParsedSchedule::Cron("0 0 * * *".to_string()));
    }
    if lower.contains("daily at noon") {
        return Ok(ParsedSchedule::Cron("0 12 * * *".to_string()));
    }

    const DAYS: &[(&str, &str)] = &[
        ("monday", "MON"),
        ("tuesday", "TUE"),
        ("wednesday", "WED"),
        ("thursday", "THU"),
        ("friday", "FRI"),
        ("saturday", "SAT"),
        ("sunday", "SUN"),
    ];
    if let Some(c) =
        rx!(WEEKDAY, r"^every\s+([a-z]+)\s+at\s+(\d{1,2})\s*([ap]m)?$").captures(lower)
    {
        if let Some((_, token)) = DAYS.iter().find(|(name, _)| *name == &c[1]) {
            let hour = to_24h(c[2].parse().unwrap_or(0), c.get(3).map(|m| m.as_str()));
            return Ok(ParsedSchedule::Cron(format!("0 {hour} * * {token}")));
        }
    }

    // -- One-shot phrases ---------------------------------------------------

    if let Some(c) =
        rx!(IN_N, r"^in\s+(\d+)\s+(seconds?|minutes?|hours?|days?)$").captures(lower)
    {
        let amount: i64 = c[1].parse().unwrap_or(0);
        let delta = match c[2].trim_end_matches('s') {
            "second" => Duration::seconds(amount),
            "minute" => Duration::minutes(amount),
            "hour" => Duration::hours(amount),
            _ => Duration::days(amount),
        };
        return Ok(ParsedSchedule::Once(now + delta));
    }
    if let Some(c) = rx!(AT_HM, r"^at\s+(\d{1,2}):(\d{2})\s*([ap]m)?$").captures(lower) {
        let hour = to_24h(c[1].parse().unwrap_or(0), c.get(3).map(|m| m.as_str()));
        let minute: u32 = c[2].parse().unwrap_or(0);
        return Ok(ParsedSchedule::Once(next_clock_time(now, hour, minute)?));
    }
    if let Some(c) = rx!(AT_H, r"^at\s+(\d{1,2})\s*([ap]m)$").captures(lower) {
        let hour = to_24h(c[1].parse().unwrap_or(0), Some(&c[2]));
        return Ok(ParsedSchedule::Once(next_clock_time(now, hour, 0)?));
    }
    if let Some(c) = rx!(AFTER_N, r"^after\s+(\d+)\s+(\w+)$").captures(lower) {
        let amount: i64 = c[1].parse().unwrap_or(0);
        let unit_seconds = match c[2].trim_end_matches('s') {
            "second" => 1,
            "minute" => 60,
            "hour" => 3600,
            "day" => 86_400,
            _ => return Err(ScheduleParseError::Unparseable(text.to_string())),
        };
        return Ok(ParsedSchedule::Once(now + Duration::seconds(amount * unit_seconds)));
    }

    // -- Raw cron passthrough ----------------------------------------------

    if lower.split_whitespace().count() == 5 {
        next_cron_occurrence(lower, now)?;
        return Ok(ParsedSchedule::Cron(lower.to_string()));
    }

    Err(ScheduleParseError::Unparseable(text.to_string()))
}

/// Next occurrence of hour:minute: today if still ahead, else tomorrow.
fn next_clock_time(
    now: DateTime<Utc>,
    hour: u32,
    minute: u32,
) -> Result<DateTime<Utc>, ScheduleParseError> {
    let today = now
        .with_hour(hour)
        .and_then(|t| t.with_minute(minute))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .ok_or_else(|| ScheduleParseError::Unparseable(format!("{hour}:{minute}")))?;
    if today <= now {
        Ok(today + Duration::days(1))
    } else {
        Ok(today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    /// **Scenario**: The recurring grammar maps to the documented cron forms.
    #[test]
    fn recurring_phrases() {
        let cases = [
            ("every 5 minutes", "*/5 * * * *"),
            ("every hour", "0 * * * *"),
            ("every morning at 9am", "0 9 * * *"),
            ("every evening at 8pm", "0 20 * * *"),
            ("every day at 14:30", "30 14 * * *"),
            ("daily at midnight", "0 0 * * *"),
            ("daily at noon", "0 12 * * *"),
            ("every monday at 2pm", "0 14 * * MON"),
            ("every sunday at 9", "0 9 * * SUN"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                parse_schedule(input, noon()).unwrap(),
                ParsedSchedule::Cron(expected.to_string()),
                "input: {input}"
            );
        }
    }

    /// **Scenario**: "in 5 minutes" lands at now+5min; "at 3pm" lands today
    /// when ahead and tomorrow when already past.
    #[test]
    fn one_shot_phrases() {
        let now = noon();
        assert_eq!(
            parse_schedule("in 5 minutes", now).unwrap(),
            ParsedSchedule::Once(now + Duration::minutes(5))
        );
        assert_eq!(
            parse_schedule("in 2 days", now).unwrap(),
            ParsedSchedule::Once(now + Duration::days(2))
        );
        assert_eq!(
            parse_schedule("at 3pm", now).unwrap(),
            ParsedSchedule::Once(Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap())
        );
        assert_eq!(
            parse_schedule("at 9:15am", now).unwrap(),
            ParsedSchedule::Once(Utc.with_ymd_and_hms(2026, 3, 11, 9, 15, 0).unwrap())
        );
        assert_eq!(
            parse_schedule("after 30 seconds", now).unwrap(),
            ParsedSchedule::Once(now + Duration::seconds(30))
        );
    }

    /// **Scenario**: Raw 5-field cron passes through; garbage raises the
    /// typed error; malformed cron is rejected.
    #[test]
    fn passthrough_and_errors() {
        assert_eq!(
            parse_schedule("15 7 * * *", noon()).unwrap(),
            ParsedSchedule::Cron("15 7 * * *".to_string())
        );
        assert!(matches!(
            parse_schedule("sometime maybe", noon()),
            Err(ScheduleParseError::Unparseable(_))
        ));
        assert!(matches!(
            parse_schedule("99 99 * * *", noon()),
            Err(ScheduleParseError::InvalidCron { .. })
        ));
    }

    /// **Scenario**: next_cron_occurrence advances strictly past `after`.
    #[test]
    fn cron_evaluation() {
        let next = next_cron_occurrence("0 9 * * *", noon()).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap());
    }
}
