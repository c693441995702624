//! Instrument identity.
//!
//! Codes arrive from hand-edited lists and spreadsheets, so the same fund can
//! show up as `1`, `000001` or ` 000001 `. Everything downstream works on the
//! normalized six-digit form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Width of a normalized instrument code.
pub const CODE_WIDTH: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("empty instrument code")]
    Empty,

    #[error("instrument code '{0}' contains non-digit characters")]
    NonDigit(String),

    #[error("instrument code '{0}' is longer than {CODE_WIDTH} digits")]
    TooLong(String),
}

/// A normalized, zero-padded six-digit instrument code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrumentCode(String);

impl InstrumentCode {
    /// Normalize a raw code: trim, require digits only, left-pad with zeros.
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CodeError::Empty);
        }
        if !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(CodeError::NonDigit(trimmed.to_string()));
        }
        if trimmed.len() > CODE_WIDTH {
            return Err(CodeError::TooLong(trimmed.to_string()));
        }
        Ok(Self(format!("{trimmed:0>width$}", width = CODE_WIDTH)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exchange prefix used by the Eastmoney `secid` parameter.
    ///
    /// Shanghai listings (5xxxxx funds, 6xxxxx shares) are market `1`,
    /// everything else is Shenzhen market `0`.
    pub fn market_id(&self) -> u8 {
        match self.0.as_bytes()[0] {
            b'5' | b'6' => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InstrumentCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for InstrumentCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for InstrumentCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A deduplicated, ascending list of instrument codes.
///
/// Sorting gives batch runs a fixed processing order, so repeated runs under
/// the same quota work through the list predictably.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InstrumentList {
    codes: Vec<InstrumentCode>,
}

impl InstrumentList {
    pub fn new(codes: impl IntoIterator<Item = InstrumentCode>) -> Self {
        let set: BTreeSet<InstrumentCode> = codes.into_iter().collect();
        Self {
            codes: set.into_iter().collect(),
        }
    }

    /// Parse and normalize every raw code.
    pub fn parse<'a>(raw: impl IntoIterator<Item = &'a str>) -> Result<Self, CodeError> {
        let codes = raw
            .into_iter()
            .map(InstrumentCode::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(codes))
    }

    pub fn as_slice(&self) -> &[InstrumentCode] {
        &self.codes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InstrumentCode> {
        self.codes.iter()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn contains(&self, code: &InstrumentCode) -> bool {
        self.codes.binary_search(code).is_ok()
    }
}

impl<'a> IntoIterator for &'a InstrumentList {
    type Item = &'a InstrumentCode;
    type IntoIter = std::slice::Iter<'a, InstrumentCode>;

    fn into_iter(self) -> Self::IntoIter {
        self.codes.iter()
    }
}
