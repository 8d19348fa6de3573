use super::{split_quantity, TypeFormatError};
use std::fmt;
use std::str::FromStr;

/// Binary byte units. Every abbreviation matches case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ByteUnit {
    Byte,
    Kibibyte,
    Mebibyte,
    Gibibyte,
}

impl ByteUnit {
    const ALL: [ByteUnit; 4] = [
        ByteUnit::Byte,
        ByteUnit::Kibibyte,
        ByteUnit::Mebibyte,
        ByteUnit::Gibibyte,
    ];

    pub fn multiplier(&self) -> u64 {
        match self {
            ByteUnit::Byte => 1,
            ByteUnit::Kibibyte => 1 << 10,
            ByteUnit::Mebibyte => 1 << 20,
            ByteUnit::Gibibyte => 1 << 30,
        }
    }

    fn abbreviations(&self) -> &'static [&'static str] {
        match self {
            ByteUnit::Byte => &["B", "bytes"],
            ByteUnit::Kibibyte => &["KB", "KiB"],
            ByteUnit::Mebibyte => &["MB", "MiB"],
            ByteUnit::Gibibyte => &["GB", "GiB"],
        }
    }

    pub fn from_abbreviation(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|unit| {
            unit.abbreviations()
                .iter()
                .any(|abbrev| abbrev.eq_ignore_ascii_case(token))
        })
    }

    /// Converts `value` expressed in `from` into this unit, truncating.
    pub fn convert(&self, value: u64, from: ByteUnit) -> u64 {
        from.to_bytes(value) / self.multiplier()
    }

    pub fn to_bytes(&self, value: u64) -> u64 {
        value.saturating_mul(self.multiplier())
    }
}

impl fmt::Display for ByteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviations()[0])
    }
}

/// A size written as `NUMBER UNIT`, e.g. `64 KiB` or `512b`.
#[derive(Debug, Clone, Copy)]
pub struct ByteValue {
    value: u64,
    unit: ByteUnit,
}

impl ByteValue {
    pub const fn new(value: u64, unit: ByteUnit) -> Self {
        Self { value, unit }
    }

    pub fn parse(input: &str) -> Result<Self, TypeFormatError> {
        let (value, token) = split_quantity(input).ok_or_else(|| {
            TypeFormatError::new(format!(
                "unable to parse byte 'NUMBER B|KiB|MiB|GiB' from '{}'",
                input
            ))
        })?;
        let unit = ByteUnit::from_abbreviation(token).ok_or_else(|| {
            TypeFormatError::new(format!("byte units [B,KiB,MiB,GiB] missing from '{}'", input))
        })?;
        Ok(Self::new(value, unit))
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn unit(&self) -> ByteUnit {
        self.unit
    }

    pub fn to_bytes(&self) -> u64 {
        self.unit.to_bytes(self.value)
    }

    pub fn to_kibibytes(&self) -> u64 {
        ByteUnit::Kibibyte.convert(self.value, self.unit)
    }

    pub fn to_mebibytes(&self) -> u64 {
        ByteUnit::Mebibyte.convert(self.value, self.unit)
    }
}

impl PartialEq for ByteValue {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for ByteValue {}

impl FromStr for ByteValue {
    type Err = TypeFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ByteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}
