use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use std::time::SystemTime;

// NaiveDate/Time construction can panic if given invalid values, but 1601-01-01 00:00:00 is valid.
const WINDOWS_EPOCH_NAIVE: NaiveDateTime = match NaiveDate::from_ymd_opt(1601, 1, 1) {
    Some(date) => match date.and_hms_opt(0, 0, 0) {
        Some(datetime) => datetime,
        None => panic!("Invalid time component for Windows epoch constant"),
    },
    None => panic!("Invalid date component for Windows epoch constant"),
};
const WINDOWS_EPOCH_UTC: DateTime<Utc> =
    DateTime::<Utc>::from_naive_utc_and_offset(WINDOWS_EPOCH_NAIVE, Utc);

const TICKS_PER_SECOND: u64 = 10_000_000;

/// Converts a FILETIME tick count (100-nanosecond intervals since 1601-01-01 UTC)
/// to a UTC `DateTime`.
///
/// The raw value is treated as unsigned; a tick count that does not fit the
/// chrono range yields `None`.
pub fn filetime_to_datetime(filetime: i64) -> Option<DateTime<Utc>> {
    let ticks = filetime as u64;
    let secs = i64::try_from(ticks / TICKS_PER_SECOND).ok()?;
    let nanos = ((ticks % TICKS_PER_SECOND) * 100) as i64;

    let since_epoch = ChronoDuration::try_seconds(secs)? + ChronoDuration::nanoseconds(nanos);
    WINDOWS_EPOCH_UTC.checked_add_signed(since_epoch)
}

/// Converts a FILETIME tick count to a `std::time::SystemTime`.
///
/// Out-of-range values fall back to the Windows epoch itself.
pub fn filetime_to_systemtime(filetime: i64) -> SystemTime {
    filetime_to_datetime(filetime)
        .unwrap_or(WINDOWS_EPOCH_UTC)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    const UNIX_EPOCH_FILETIME: i64 = 116_444_736_000_000_000;

    #[test]
    fn filetime_to_systemtime_test() {
        assert_eq!(filetime_to_systemtime(UNIX_EPOCH_FILETIME), UNIX_EPOCH);

        let secs_between_epochs = UNIX_EPOCH_FILETIME as u64 / TICKS_PER_SECOND;
        let expected = UNIX_EPOCH - Duration::from_secs(secs_between_epochs);
        assert_eq!(filetime_to_systemtime(0), expected);
    }

    #[test]
    fn filetime_keeps_sub_second_ticks() {
        // 2023-07-15 12:30:45.1234567 UTC
        let expected = NaiveDate::from_ymd_opt(2023, 7, 15)
            .unwrap()
            .and_hms_nano_opt(12, 30, 45, 123_456_700)
            .unwrap()
            .and_utc();
        let ticks = (expected - WINDOWS_EPOCH_UTC).num_microseconds().unwrap() * 10 + 7;

        assert_eq!(filetime_to_datetime(ticks), Some(expected));
    }
}
