//! Nanosecond-precision timestamps for station metadata epochs.
//!
//! [`NanoTime`] keeps SEED's native year + day-of-year layout and converts
//! to and from the two textual forms the codecs need: the SEED variable
//! time field (`YYYY,DDD,HH:MM:SS.FFFF`) and ISO-8601 as used by
//! StationXML (`YYYY-MM-DDTHH:MM:SS.ffffffZ`).

use std::fmt;

/// Nanosecond-precision timestamp (year + day-of-year + time), always UTC.
///
/// Field order makes the derived `Ord` chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NanoTime {
    pub year: u16,
    pub day: u16,        // 1-366
    pub hour: u8,        // 0-23
    pub minute: u8,      // 0-59
    pub second: u8,      // 0-60 (60 for leap second)
    pub nanosecond: u32, // 0-999_999_999
}

const CUMULATIVE_DAYS: [u16; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_year(year: u16) -> u16 {
    if is_leap_year(year) { 366 } else { 365 }
}

impl NanoTime {
    /// Create a NanoTime with default epoch (1970-001 00:00:00.000000000).
    pub fn epoch() -> Self {
        Self::from_day(1970, 1)
    }

    /// Midnight at the start of the given day-of-year.
    pub fn from_day(year: u16, day: u16) -> Self {
        Self {
            year,
            day,
            hour: 0,
            minute: 0,
            second: 0,
            nanosecond: 0,
        }
    }

    /// Midnight at the start of a calendar date. Returns `None` for an
    /// impossible date.
    pub fn from_ymd(year: u16, month: u8, day: u8) -> Option<Self> {
        if !(1..=12).contains(&month) || day == 0 {
            return None;
        }
        let leap = u16::from(is_leap_year(year) && month > 2);
        let month_len = match month {
            2 if is_leap_year(year) => 29,
            2 => 28,
            4 | 6 | 9 | 11 => 30,
            _ => 31,
        };
        if day > month_len {
            return None;
        }
        let doy = CUMULATIVE_DAYS[month as usize - 1] + leap + day as u16;
        Some(Self::from_day(year, doy))
    }

    /// Calendar `(month, day)` of this timestamp's day-of-year.
    pub fn month_day(&self) -> (u8, u8) {
        let leap = is_leap_year(self.year);
        let mut remaining = self.day;
        for month in 1..=12u8 {
            let len = match month {
                2 if leap => 29,
                2 => 28,
                4 | 6 | 9 | 11 => 30,
                _ => 31,
            };
            if remaining <= len {
                return (month, remaining as u8);
            }
            remaining -= len;
        }
        (12, 31)
    }

    fn is_valid(&self) -> bool {
        self.day >= 1
            && self.day <= days_in_year(self.year)
            && self.hour < 24
            && self.minute < 60
            && self.second <= 60
            && self.nanosecond < 1_000_000_000
    }

    /// Parse a SEED time field.
    ///
    /// Trailing components may be omitted (`2020,001` is midnight). The
    /// fraction is read to at most nanosecond precision. An empty string
    /// yields `None`, as does any malformed value.
    pub fn parse_seed(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let mut parts = s.splitn(3, ',');
        let year = parts.next()?.trim().parse().ok()?;
        let day = parts.next()?.trim().parse().ok()?;
        let mut time = Self::from_day(year, day);
        if let Some(clock) = parts.next() {
            parse_clock(clock.trim(), &mut time)?;
        }
        time.is_valid().then_some(time)
    }

    /// Format as a full SEED time field, `YYYY,DDD,HH:MM:SS.FFFF`.
    ///
    /// SEED resolution is 0.1 ms; finer precision is truncated.
    pub fn to_seed_string(&self) -> String {
        format!(
            "{:04},{:03},{:02}:{:02}:{:02}.{:04}",
            self.year,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.nanosecond / 100_000
        )
    }

    /// Parse an ISO-8601 timestamp as used by StationXML.
    ///
    /// Accepts a bare date, an optional fraction of any length up to
    /// nanoseconds, and a `Z` or zero UTC offset suffix.
    pub fn parse_iso(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s
            .strip_suffix('Z')
            .or_else(|| s.strip_suffix("+00:00"))
            .unwrap_or(s);
        let (date, clock) = match s.split_once('T') {
            Some((d, c)) => (d, Some(c)),
            None => (s, None),
        };
        let mut fields = date.split('-');
        let year = fields.next()?.parse().ok()?;
        let month = fields.next()?.parse().ok()?;
        let day = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        let mut time = Self::from_ymd(year, month, day)?;
        if let Some(clock) = clock {
            parse_clock(clock, &mut time)?;
        }
        time.is_valid().then_some(time)
    }

    /// Format as ISO-8601 UTC with microsecond precision, or nanosecond
    /// precision when sub-microsecond digits are present.
    pub fn to_iso_string(&self) -> String {
        let (month, day) = self.month_day();
        let fraction = if self.nanosecond % 1_000 == 0 {
            format!("{:06}", self.nanosecond / 1_000)
        } else {
            format!("{:09}", self.nanosecond)
        };
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{}Z",
            self.year, month, day, self.hour, self.minute, self.second, fraction
        )
    }
}

/// Parse `HH[:MM[:SS[.F...]]]` into `time`.
fn parse_clock(clock: &str, time: &mut NanoTime) -> Option<()> {
    if clock.is_empty() {
        return Some(());
    }
    let mut parts = clock.splitn(3, ':');
    time.hour = parts.next()?.parse().ok()?;
    if let Some(minute) = parts.next() {
        time.minute = minute.parse().ok()?;
    }
    if let Some(second) = parts.next() {
        let (whole, fraction) = match second.split_once('.') {
            Some((w, f)) => (w, f),
            None => (second, ""),
        };
        time.second = whole.parse().ok()?;
        if !fraction.is_empty() {
            if !fraction.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let digits = &fraction[..fraction.len().min(9)];
            let value: u32 = digits.parse().ok()?;
            time.nanosecond = value * 10u32.pow(9 - digits.len() as u32);
        }
    }
    Some(())
}

impl Default for NanoTime {
    fn default() -> Self {
        Self::epoch()
    }
}

impl fmt::Display for NanoTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:03} {:02}:{:02}:{:02}.{:09}",
            self.year, self.day, self.hour, self.minute, self.second, self.nanosecond
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nanotime_epoch() {
        let nt = NanoTime::epoch();
        assert_eq!(nt.year, 1970);
        assert_eq!(nt.day, 1);
        assert_eq!(nt.nanosecond, 0);
    }

    #[test]
    fn test_parse_seed_full() {
        let t = NanoTime::parse_seed("2002,324,12:30:45.1234").unwrap();
        assert_eq!(t.year, 2002);
        assert_eq!(t.day, 324);
        assert_eq!(t.hour, 12);
        assert_eq!(t.minute, 30);
        assert_eq!(t.second, 45);
        assert_eq!(t.nanosecond, 123_400_000);
        assert_eq!(t.to_seed_string(), "2002,324,12:30:45.1234");
    }

    #[test]
    fn test_parse_seed_truncated() {
        let t = NanoTime::parse_seed("1999,001").unwrap();
        assert_eq!(t, NanoTime::from_day(1999, 1));
        let t = NanoTime::parse_seed("1999,001,06:15").unwrap();
        assert_eq!(t.hour, 6);
        assert_eq!(t.minute, 15);
        assert_eq!(t.second, 0);
        assert_eq!(NanoTime::parse_seed(""), None);
        assert_eq!(NanoTime::parse_seed("1999,400"), None);
        assert_eq!(NanoTime::parse_seed("garbage"), None);
    }

    #[test]
    fn test_ymd_conversion() {
        let t = NanoTime::from_ymd(2024, 3, 1).unwrap();
        assert_eq!(t.day, 61); // leap year
        assert_eq!(t.month_day(), (3, 1));
        let t = NanoTime::from_ymd(2023, 12, 31).unwrap();
        assert_eq!(t.day, 365);
        assert_eq!(t.month_day(), (12, 31));
        assert_eq!(NanoTime::from_ymd(2023, 2, 29), None);
    }

    #[test]
    fn test_iso_roundtrip() {
        let t = NanoTime::parse_iso("2020-02-29T10:20:30.5Z").unwrap();
        assert_eq!(t.day, 60);
        assert_eq!(t.nanosecond, 500_000_000);
        assert_eq!(t.to_iso_string(), "2020-02-29T10:20:30.500000Z");

        let t = NanoTime::parse_iso("2020-01-01T00:00:00.000000001").unwrap();
        assert_eq!(t.to_iso_string(), "2020-01-01T00:00:00.000000001Z");

        let t = NanoTime::parse_iso("2011-07-04").unwrap();
        assert_eq!(t.to_iso_string(), "2011-07-04T00:00:00.000000Z");
        assert_eq!(NanoTime::parse_iso("2011-13-04"), None);
    }

    #[test]
    fn test_ordering_is_chronological() {
        let a = NanoTime::parse_seed("2001,365,23:59:59").unwrap();
        let b = NanoTime::parse_seed("2002,001").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_nanotime_display() {
        let nt = NanoTime {
            year: 2024,
            day: 15,
            hour: 10,
            minute: 30,
            second: 0,
            nanosecond: 500_000_000,
        };
        assert_eq!(format!("{nt}"), "2024-015 10:30:00.500000000");
    }
}
