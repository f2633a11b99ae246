use std::fmt::{Display, Write as _};

use chrono::{DateTime, Local, TimeZone};

/// `%i` expands to milliseconds, `%f` to microseconds.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%f";

pub fn local_timestamp(format: &str) -> String {
    format_timestamp(&Local::now(), format)
}

pub fn format_timestamp<Tz>(time: &DateTime<Tz>, format: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let micros = time.timestamp_subsec_micros() % 1_000_000;
    let expanded = format
        .replace("%i", &format!("{:03}", micros / 1000))
        .replace("%f", &format!("{micros:06}"));

    let mut rendered = String::with_capacity(expanded.len() + 8);
    if write!(rendered, "{}", time.format(&expanded)).is_err() {
        log::warn!("Invalid timestamp format {format:?}, using default");
        rendered.clear();
        let fallback = DEFAULT_TIMESTAMP_FORMAT.replace("%f", &format!("{micros:06}"));
        let _ = write!(rendered, "{}", time.format(&fallback));
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(123_456))
            .unwrap()
    }

    #[test]
    fn test_default_format_uses_microseconds() {
        assert_eq!(
            format_timestamp(&sample_time(), DEFAULT_TIMESTAMP_FORMAT),
            "2024-03-09_14-05-07-123456"
        );
    }

    #[test]
    fn test_millisecond_token() {
        assert_eq!(
            format_timestamp(&sample_time(), "%H:%M:%S.%i"),
            "14:05:07.123"
        );
    }
}
