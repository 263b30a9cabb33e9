//! Fixed-capacity field codes.
//!
//! A field code identifies one physical quantity in the registry and in
//! attribute vectors. Codes are case-sensitive and at most
//! [`FIELD_CODE_LEN`] bytes long, so they are stored inline without heap
//! allocation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::FIELD_CODE_LEN;

/// Error produced when a string cannot be used as a field code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldCodeError {
    /// Empty code.
    #[error("field code cannot be empty")]
    Empty,

    /// Code longer than `FIELD_CODE_LEN` bytes.
    #[error("field code '{code}' exceeds {max} bytes")]
    TooLong {
        /// Offending code.
        code: String,
        /// Capacity.
        max: usize,
    },

    /// Code contains whitespace.
    #[error("field code '{0}' contains whitespace")]
    Whitespace(String),
}

/// Case-sensitive field code (`"SST"`, `"UOCN"`, `"FRZMLT"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldCode(heapless::String<FIELD_CODE_LEN>);

impl FieldCode {
    /// Build a code, rejecting empty, over-long or whitespace-bearing input.
    pub fn new(code: &str) -> Result<Self, FieldCodeError> {
        if code.is_empty() {
            return Err(FieldCodeError::Empty);
        }
        if code.chars().any(char::is_whitespace) {
            return Err(FieldCodeError::Whitespace(code.to_string()));
        }
        let mut inner = heapless::String::new();
        inner.push_str(code).map_err(|_| FieldCodeError::TooLong {
            code: code.to_string(),
            max: FIELD_CODE_LEN,
        })?;
        Ok(Self(inner))
    }

    /// Borrow the code as `&str`.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for FieldCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for FieldCode {
    type Error = FieldCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl TryFrom<&str> for FieldCode {
    type Error = FieldCodeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FieldCode> for String {
    fn from(code: FieldCode) -> Self {
        code.as_str().to_string()
    }
}

impl PartialEq<str> for FieldCode {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for FieldCode {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}
