//! Five-field cron expressions: minute, hour, day-of-month, month, weekday.
//!
//! Supported per-field syntax: `*`, inclusive ranges `a-b`, steps `*/s`,
//! lists `a,b,c` and bare integers. Weekday accepts 0-7 with both 0 and 7
//! meaning Sunday. Matching is done against local time at minute
//! granularity.

use chrono::{DateTime, Datelike, Duration, Local, Timelike};

use crate::error::{Result, SchedulerError};

/// Forward-scan bound for [`CronExpr::next_match`]: one year of minutes.
const NEXT_MATCH_SCAN_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: Vec<u32>,
    wildcard: bool,
}

impl CronField {
    fn matches(&self, value: u32) -> bool {
        self.wildcard || self.values.contains(&value)
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
    original: String,
}

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidCron(format!(
                "expected 5 fields, got {} in '{expression}'",
                fields.len()
            )));
        }

        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            weekday: parse_field(fields[4], 0, 7)?,
            original: expression.to_string(),
        })
    }

    /// Quick validity check without keeping the parse result.
    pub fn is_valid(expression: &str) -> bool {
        Self::parse(expression).is_ok()
    }

    /// The expression as originally written.
    pub fn expression(&self) -> &str {
        &self.original
    }

    /// Whether `time` (at minute granularity) satisfies every field.
    pub fn matches(&self, time: DateTime<Local>) -> bool {
        let weekday = time.weekday().num_days_from_sunday();
        // 0 and 7 both mean Sunday in the weekday field.
        let weekday_ok = self.weekday.matches(weekday)
            || (weekday == 0 && self.weekday.matches(7));

        self.minute.matches(time.minute())
            && self.hour.matches(time.hour())
            && self.day.matches(time.day())
            && self.month.matches(time.month())
            && weekday_ok
    }

    /// First matching minute at or after `from`, scanning up to 365 days.
    /// Returns `from` unchanged when nothing in that horizon matches.
    pub fn next_match(&self, from: DateTime<Local>) -> DateTime<Local> {
        let mut current = from
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(from);
        for _ in 0..NEXT_MATCH_SCAN_MINUTES {
            if self.matches(current) {
                return current;
            }
            current += Duration::minutes(1);
        }
        from
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<CronField> {
    let bounds_err = |value: &str| {
        SchedulerError::InvalidCron(format!(
            "value '{value}' out of range {min}..={max} in field '{field}'"
        ))
    };
    let parse_int = |s: &str| -> Result<u32> {
        let v: u32 = s
            .parse()
            .map_err(|_| SchedulerError::InvalidCron(format!("invalid number '{s}' in '{field}'")))?;
        if v < min || v > max {
            return Err(bounds_err(s));
        }
        Ok(v)
    };

    if field == "*" {
        return Ok(CronField {
            values: Vec::new(),
            wildcard: true,
        });
    }

    if let Some(step) = field.strip_prefix("*/") {
        let step: u32 = step
            .parse()
            .map_err(|_| SchedulerError::InvalidCron(format!("invalid step in '{field}'")))?;
        if step == 0 {
            return Err(SchedulerError::InvalidCron(format!(
                "step must be positive in '{field}'"
            )));
        }
        return Ok(CronField {
            values: (min..=max).step_by(step as usize).collect(),
            wildcard: false,
        });
    }

    if field.contains('-') {
        let (start, end) = field
            .split_once('-')
            .ok_or_else(|| SchedulerError::InvalidCron(format!("bad range '{field}'")))?;
        let start = parse_int(start)?;
        let end = parse_int(end)?;
        if start > end {
            return Err(SchedulerError::InvalidCron(format!(
                "descending range '{field}'"
            )));
        }
        return Ok(CronField {
            values: (start..=end).collect(),
            wildcard: false,
        });
    }

    if field.contains(',') {
        let values = field
            .split(',')
            .map(parse_int)
            .collect::<Result<Vec<_>>>()?;
        return Ok(CronField {
            values,
            wildcard: false,
        });
    }

    Ok(CronField {
        values: vec![parse_int(field)?],
        wildcard: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parses_wildcards_and_values() {
        let cron = CronExpr::parse("0 9 * * 1-5").unwrap();
        assert_eq!(cron.expression(), "0 9 * * 1-5");
        // Monday 2024-01-08 09:00 is a weekday morning.
        assert!(cron.matches(local(2024, 1, 8, 9, 0)));
        // Saturday does not match 1-5.
        assert!(!cron.matches(local(2024, 1, 6, 9, 0)));
        // Wrong minute.
        assert!(!cron.matches(local(2024, 1, 8, 9, 30)));
    }

    #[test]
    fn step_and_list_fields() {
        let cron = CronExpr::parse("*/15 8,12,18 * * *").unwrap();
        assert!(cron.matches(local(2024, 3, 1, 8, 0)));
        assert!(cron.matches(local(2024, 3, 1, 12, 45)));
        assert!(!cron.matches(local(2024, 3, 1, 9, 15)));
        assert!(!cron.matches(local(2024, 3, 1, 8, 20)));
    }

    #[test]
    fn sunday_matches_both_zero_and_seven() {
        let sunday = local(2024, 1, 7, 10, 0);
        assert!(CronExpr::parse("0 10 * * 0").unwrap().matches(sunday));
        assert!(CronExpr::parse("0 10 * * 7").unwrap().matches(sunday));
        assert!(!CronExpr::parse("0 10 * * 1").unwrap().matches(sunday));
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        for bad in [
            "* * * *",        // four fields
            "* * * * * *",    // six fields
            "60 * * * *",     // minute out of range
            "* 24 * * *",     // hour out of range
            "* * 0 * *",      // day out of range
            "* * * 13 *",     // month out of range
            "* * * * 8",      // weekday out of range
            "5-1 * * * *",    // descending range
            "*/0 * * * *",    // zero step
            "a * * * *",      // not a number
        ] {
            assert!(!CronExpr::is_valid(bad), "{bad} should be invalid");
        }
    }

    #[test]
    fn next_match_finds_weekday_morning() {
        // Saturday 2024-01-06 10:00 -> Monday 2024-01-08 09:00.
        let cron = CronExpr::parse("0 9 * * 1-5").unwrap();
        let from = local(2024, 1, 6, 10, 0);
        assert_eq!(cron.next_match(from), local(2024, 1, 8, 9, 0));
    }

    #[test]
    fn next_match_result_matches() {
        let cron = CronExpr::parse("30 14 * * *").unwrap();
        let next = cron.next_match(local(2024, 6, 1, 0, 0));
        assert!(cron.matches(next));
        assert_eq!(next, local(2024, 6, 1, 14, 30));
    }

    #[test]
    fn next_match_is_inclusive_of_from() {
        let cron = CronExpr::parse("0 9 * * *").unwrap();
        let at = local(2024, 1, 8, 9, 0);
        assert_eq!(cron.next_match(at), at);
    }

    #[test]
    fn next_match_without_any_match_returns_from() {
        // February 30th never exists.
        let cron = CronExpr::parse("0 0 30 2 *").unwrap();
        let from = local(2024, 3, 1, 0, 0);
        assert_eq!(cron.next_match(from), from);
    }
}
