//! Physical-quantity datatypes parsed from configuration strings.

mod bytes;
mod time;

pub use bytes::{ByteUnit, ByteValue};
pub use time::{TimeUnit, TimeValue};

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// A configuration string could not be converted to the requested datatype.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TypeFormatError(pub String);

impl TypeFormatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Whole number followed by a unit word, surrounding whitespace allowed.
static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*([a-zA-Z]+)\s*$").expect("quantity pattern is valid")
});

/// Splits `input` into its magnitude and unit token.
fn split_quantity(input: &str) -> Option<(u64, &str)> {
    let caps = QUANTITY.captures(input)?;
    let magnitude = caps.get(1)?.as_str().parse().ok()?;
    Some((magnitude, caps.get(2)?.as_str()))
}
