use chrono::Duration;

use super::SchedulerError;

/// Parse an interval such as `30s`, `15m`, `2h`, `1d` or `1w`.
pub fn parse_interval(input: &str) -> Result<Duration, SchedulerError> {
    let s = input.trim();
    let bad = || SchedulerError::BadInterval(input.to_string());

    let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(bad)?;
    let (digits, unit) = s.split_at(split);
    let n: i64 = digits.parse().map_err(|_| bad())?;
    if n == 0 {
        return Err(bad());
    }

    let duration = match unit.trim() {
        "s" => Duration::try_seconds(n),
        "m" => Duration::try_minutes(n),
        "h" => Duration::try_hours(n),
        "d" => Duration::try_days(n),
        "w" => Duration::try_weeks(n),
        _ => None,
    };
    duration.ok_or_else(bad)
}
