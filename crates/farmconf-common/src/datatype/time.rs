use super::{split_quantity, TypeFormatError};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Units accepted by [`TimeValue`], smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
        }
    }

    /// Case-insensitive lookup of a unit abbreviation.
    pub fn from_abbreviation(token: &str) -> Option<Self> {
        let unit = match token.to_ascii_lowercase().as_str() {
            "ns" => TimeUnit::Nanoseconds,
            "us" => TimeUnit::Microseconds,
            "ms" => TimeUnit::Milliseconds,
            "s" => TimeUnit::Seconds,
            "m" => TimeUnit::Minutes,
            "h" => TimeUnit::Hours,
            "d" => TimeUnit::Days,
            _ => return None,
        };
        Some(unit)
    }

    fn nanos(&self) -> u128 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 3_600 * 1_000_000_000,
            TimeUnit::Days => 86_400 * 1_000_000_000,
        }
    }
}

/// A time interval written as `NUMBER UNIT`, e.g. `15 s` or `250ms`.
///
/// Values compare by the interval they denote, so `1 m == 60 s`.
#[derive(Debug, Clone, Copy)]
pub struct TimeValue {
    value: u64,
    unit: TimeUnit,
}

impl TimeValue {
    pub const fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn parse(input: &str) -> Result<Self, TypeFormatError> {
        let (value, token) = split_quantity(input).ok_or_else(|| {
            TypeFormatError::new(format!(
                "unable to parse time 'NUMBER d|h|m|s|ms|us|ns' from '{}'",
                input
            ))
        })?;
        let unit = TimeUnit::from_abbreviation(token).ok_or_else(|| {
            TypeFormatError::new(format!(
                "time units [d,h,m,s,ms,us,ns] missing from '{}'",
                input
            ))
        })?;
        Ok(Self::new(value, unit))
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn as_nanos(&self) -> u128 {
        self.value as u128 * self.unit.nanos()
    }

    pub fn to_millis(&self) -> u64 {
        u64::try_from(self.as_nanos() / 1_000_000).unwrap_or(u64::MAX)
    }

    pub fn to_secs(&self) -> u64 {
        u64::try_from(self.as_nanos() / 1_000_000_000).unwrap_or(u64::MAX)
    }

    /// The interval as a [`Duration`], saturating at `Duration::MAX`.
    pub fn to_duration(&self) -> Duration {
        let nanos = self.as_nanos();
        let secs = nanos / 1_000_000_000;
        match u64::try_from(secs) {
            Ok(secs) => Duration::new(secs, (nanos % 1_000_000_000) as u32),
            Err(_) => Duration::MAX,
        }
    }
}

impl PartialEq for TimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.as_nanos() == other.as_nanos()
    }
}

impl Eq for TimeValue {}

impl PartialOrd for TimeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_nanos().cmp(&other.as_nanos())
    }
}

impl FromStr for TimeValue {
    type Err = TypeFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.abbreviation())
    }
}

impl From<TimeValue> for Duration {
    fn from(value: TimeValue) -> Self {
        value.to_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_and_without_space() {
        let a = TimeValue::parse("15 s").unwrap();
        let b = TimeValue::parse("15s").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.unit(), TimeUnit::Seconds);
        assert_eq!(a.value(), 15);
        assert_eq!(a.to_duration(), Duration::from_secs(15));
        assert_eq!(TimeValue::parse("  2 MS ").unwrap().to_millis(), 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TimeValue::parse("fifteen seconds").is_err());
        assert!(TimeValue::parse("15").is_err());
        assert!(TimeValue::parse("15 parsecs").is_err());
        assert!(TimeValue::parse("-3 s").is_err());
        assert!(TimeValue::parse("1.5 s").is_err());
    }

    #[test]
    fn test_cross_unit_comparison() {
        assert_eq!(TimeValue::parse("1 m").unwrap(), TimeValue::parse("60 s").unwrap());
        assert!(TimeValue::parse("1 d").unwrap() > TimeValue::parse("23 h").unwrap());
        assert!(TimeValue::parse("999 us").unwrap() < TimeValue::parse("1 ms").unwrap());

        // Would overflow a 64-bit count of nanoseconds.
        let huge = TimeValue::new(u64::MAX, TimeUnit::Days);
        assert!(huge > TimeValue::new(u64::MAX, TimeUnit::Nanoseconds));
        assert_eq!(huge.to_duration(), Duration::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(TimeValue::parse("15s").unwrap().to_string(), "15 s");
        assert_eq!(TimeValue::new(3, TimeUnit::Microseconds).to_string(), "3 us");
    }
}
