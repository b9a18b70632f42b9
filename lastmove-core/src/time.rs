//! Time utilities: timezone-aware wall-clock helpers.

use anyhow::Result;
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

pub const DEFAULT_TIMEZONE: &str = "Asia/Seoul";

/// Parse an IANA timezone name like "Asia/Seoul".
pub fn parse_timezone(tz: &str) -> Result<Tz> {
    tz.parse()
        .map_err(|_| anyhow::anyhow!("invalid timezone: {tz}"))
}

/// Parse a wall-clock time like "19:00".
pub fn parse_wall_clock(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| anyhow::anyhow!("invalid wall-clock time '{s}': {e}"))
}

/// Hour of day (0-23) of `now` in `tz`.
pub fn local_hour(now: DateTime<Utc>, tz: Tz) -> u32 {
    now.with_timezone(&tz).hour()
}

/// Resolve a local date + time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times that do
/// not exist (DST spring-forward) move to the first valid minute after the gap.
pub fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => (1..=180).find_map(|m| {
            tz.from_local_datetime(&(naive + Duration::minutes(m)))
                .earliest()
        }),
    }
}

/// Parse an RFC3339 timestamp into UTC.
pub fn parse_rfc3339_utc(s: &str) -> Result<DateTime<Utc>> {
    let dt = DateTime::parse_from_rfc3339(s.trim())
        .map_err(|e| anyhow::anyhow!("invalid RFC3339 timestamp '{s}': {e}"))?;
    Ok(dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seoul_is_utc_plus_nine() {
        let tz = parse_timezone(DEFAULT_TIMEZONE).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 2, 20, 14, 30, 0).unwrap();
        assert_eq!(local_hour(now, tz), 23);
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(parse_timezone("Mars/Olympus").is_err());
        assert!(parse_wall_clock("25:00").is_err());
        assert_eq!(
            parse_wall_clock("19:00").unwrap(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap()
        );
    }

    #[test]
    fn spring_forward_gap_moves_later() {
        // 2026-03-08 02:30 does not exist in America/Chicago.
        let tz = parse_timezone("America/Chicago").unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let t = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        let resolved = resolve_local(tz, date, t).unwrap();
        assert_eq!(resolved.hour(), 3);
    }

    #[test]
    fn parses_offsets_into_utc() {
        let utc = parse_rfc3339_utc("2026-02-20T23:00:00+09:00").unwrap();
        assert_eq!(utc.to_rfc3339(), "2026-02-20T14:00:00+00:00");
    }
}
