//! Common types and utilities shared across farmconf components.

pub mod context;
pub mod datatype;
pub mod error;
pub mod format;

pub use context::ConfigContext;
pub use datatype::{ByteUnit, ByteValue, TimeUnit, TimeValue, TypeFormatError};
pub use error::{Error, Result};
