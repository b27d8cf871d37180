//! Five-field cron evaluation (minute hour day-of-month month
//! day-of-week) plus the `@` shortcuts, computed in a caller-supplied
//! timezone so local schedules cross DST transitions correctly.
//!
//! DST handling: local times inside a spring-forward gap do not exist and
//! are skipped; in a fall-back overlap the earliest mapping is chosen.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Timelike};

/// One year of minutes bounds the walk; any satisfiable expression fires
/// within that horizon.
const MAX_CHECKS: u32 = 366 * 24 * 60;

/// Expand shortcuts and validate the field count. Returns the normalized
/// five-field expression.
pub fn normalize_schedule(expr: &str) -> Result<String, String> {
    let expanded = match expr.trim() {
        "@hourly" => "0 * * * *".to_string(),
        "@daily" => "0 8 * * *".to_string(),
        "@weekly" => "0 8 * * 1".to_string(),
        "@monthly" => "0 8 1 * *".to_string(),
        other => other.to_string(),
    };

    let fields: Vec<&str> = expanded.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!(
            "Invalid schedule '{expr}': expected 5 cron fields or a @shortcut"
        ));
    }
    let ranges: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 7)];
    for (field, (lo, hi)) in fields.iter().zip(ranges) {
        if !field_is_valid(field, lo, hi) {
            return Err(format!("Invalid schedule '{expr}': bad field '{field}'"));
        }
    }
    Ok(fields.join(" "))
}

fn field_is_valid(field: &str, lo: u32, hi: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        return step.parse::<u32>().is_ok_and(|n| n > 0);
    }
    field.split(',').all(|part| match part.split_once('-') {
        Some((start, end)) => match (start.parse::<u32>(), end.parse::<u32>()) {
            (Ok(start), Ok(end)) => start >= lo && end <= hi && start <= end,
            _ => false,
        },
        None => part.parse::<u32>().is_ok_and(|n| n >= lo && n <= hi),
    })
}

fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>())
                && value >= start
                && value <= end
            {
                return true;
            }
        } else if part.parse::<u32>() == Ok(value) {
            return true;
        }
    }
    false
}

fn matches_naive(fields: &[&str], dt: &NaiveDateTime) -> bool {
    let weekday = dt.weekday().num_days_from_sunday();
    field_matches(fields[0], dt.minute())
        && field_matches(fields[1], dt.hour())
        && field_matches(fields[2], dt.day())
        && field_matches(fields[3], dt.month())
        // both 0 and 7 mean Sunday
        && (field_matches(fields[4], weekday) || (weekday == 0 && field_matches(fields[4], 7)))
}

/// Next instant strictly after `after` matching `expr`, evaluated in
/// `after`'s timezone.
pub fn next_run_after<Tz: TimeZone>(expr: &str, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let normalized = normalize_schedule(expr).ok()?;
    let fields: Vec<&str> = normalized.split_whitespace().collect();
    let tz = after.timezone();

    // Advance to the next whole minute so the result is strictly greater.
    let local_after = after.naive_local();
    let mut candidate = local_after + Duration::seconds(60 - i64::from(local_after.second()));
    candidate = candidate.with_second(0)?.with_nanosecond(0)?;

    for _ in 0..MAX_CHECKS {
        if matches_naive(&fields, &candidate) {
            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Some(dt),
                chrono::LocalResult::Ambiguous(earliest, _) => return Some(earliest),
                chrono::LocalResult::None => {
                    // spring-forward gap; this local minute does not exist
                }
            }
        }
        candidate += Duration::minutes(1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_normalize_shortcuts() {
        assert_eq!(normalize_schedule("@hourly").unwrap(), "0 * * * *");
        assert_eq!(normalize_schedule("@daily").unwrap(), "0 8 * * *");
        assert_eq!(normalize_schedule("@weekly").unwrap(), "0 8 * * 1");
        assert_eq!(normalize_schedule("@monthly").unwrap(), "0 8 1 * *");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_schedule("not cron").is_err());
        assert!(normalize_schedule("* * * *").is_err());
        assert!(normalize_schedule("61 * * * *").is_err());
        assert!(normalize_schedule("* 25 * * *").is_err());
        assert!(normalize_schedule("*/0 * * * *").is_err());
        assert!(normalize_schedule("5-3 * * * *").is_err());
    }

    #[test]
    fn test_every_five_minutes() {
        let next = next_run_after("*/5 * * * *", &at(2026, 6, 15, 10, 2)).unwrap();
        assert_eq!(next, at(2026, 6, 15, 10, 5));
    }

    #[test]
    fn test_specific_time_rolls_to_next_day() {
        let next = next_run_after("30 9 * * *", &at(2026, 6, 15, 10, 0)).unwrap();
        assert_eq!(next, at(2026, 6, 16, 9, 30));
    }

    #[test]
    fn test_day_of_month() {
        let next = next_run_after("0 8 1 * *", &at(2026, 6, 15, 10, 0)).unwrap();
        assert_eq!(next, at(2026, 7, 1, 8, 0));
    }

    #[test]
    fn test_month_field() {
        let next = next_run_after("0 0 1 1 *", &at(2026, 6, 15, 0, 0)).unwrap();
        assert_eq!(next, at(2027, 1, 1, 0, 0));
    }

    #[test]
    fn test_weekday_monday() {
        // 2026-06-15 is a Monday.
        let next = next_run_after("0 8 * * 1", &at(2026, 6, 15, 9, 0)).unwrap();
        assert_eq!(next, at(2026, 6, 22, 8, 0));
    }

    #[test]
    fn test_sunday_as_zero_and_seven() {
        let from = at(2026, 6, 15, 0, 0);
        let zero = next_run_after("0 8 * * 0", &from).unwrap();
        let seven = next_run_after("0 8 * * 7", &from).unwrap();
        assert_eq!(zero, seven);
        assert_eq!(zero, at(2026, 6, 21, 8, 0));
    }

    #[test]
    fn test_ranges_and_lists() {
        let next = next_run_after("0,30 9-17 * * *", &at(2026, 6, 15, 17, 31)).unwrap();
        assert_eq!(next, at(2026, 6, 16, 9, 0));

        let next = next_run_after("0,30 9-17 * * *", &at(2026, 6, 15, 9, 1)).unwrap();
        assert_eq!(next, at(2026, 6, 15, 9, 30));
    }

    #[test]
    fn test_strictly_greater_than_from() {
        // Property 10: next is strictly after `from` for every expression,
        // including when `from` itself matches.
        let exprs = [
            "* * * * *",
            "*/5 * * * *",
            "0 8 * * *",
            "30 9 * * 1",
            "@hourly",
            "@daily",
            "@weekly",
            "@monthly",
        ];
        let from = at(2026, 6, 15, 8, 0);
        for expr in exprs {
            let next = next_run_after(expr, &from).unwrap();
            assert!(next > from, "{expr}: {next} not after {from}");
        }
    }

    #[test]
    fn test_exact_match_minute_advances() {
        // `from` is exactly 08:00; @daily must yield tomorrow 08:00.
        let next = next_run_after("@daily", &at(2026, 6, 15, 8, 0)).unwrap();
        assert_eq!(next, at(2026, 6, 16, 8, 0));
    }

    #[test]
    fn test_spring_forward_gap_skipped() {
        // US/Eastern 2026-03-08: 02:00-03:00 local does not exist.
        let tz: chrono_tz::Tz = "US/Eastern".parse().unwrap();
        let after = tz.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let next = next_run_after("30 2 * * *", &after).unwrap();
        // The gap day is skipped; the next 02:30 local is March 9.
        assert_eq!(next.naive_local(), at(2026, 3, 9, 2, 30).naive_utc());
    }

    #[test]
    fn test_fall_back_earliest_mapping() {
        // US/Eastern 2026-11-01: 01:30 local occurs twice; earliest wins.
        let tz: chrono_tz::Tz = "US/Eastern".parse().unwrap();
        let after = tz.with_ymd_and_hms(2026, 10, 31, 12, 0, 0).unwrap();
        let next = next_run_after("30 1 * * *", &after).unwrap();
        let utc = next.with_timezone(&Utc);
        // EDT (UTC-4) mapping: 01:30 local = 05:30 UTC.
        assert_eq!(utc, at(2026, 11, 1, 5, 30));
    }

    #[test]
    fn test_unsatisfiable_returns_none() {
        // February 31 never exists.
        assert!(next_run_after("0 0 31 2 *", &at(2026, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_invalid_expression_returns_none() {
        assert!(next_run_after("nope", &at(2026, 1, 1, 0, 0)).is_none());
    }
}
