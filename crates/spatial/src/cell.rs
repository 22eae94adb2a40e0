use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque 64-bit hierarchical cell identifier.
///
/// The value is only interpreted by a [`crate::codec::CellCodec`]; the type
/// itself just orders, hashes and prints (lowercase hex, the usual H3 form).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellId(u64);

impl CellId {
    pub const fn from_raw(raw: u64) -> Self {
        CellId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cell id text: {0:?}")]
pub struct ParseCellIdError(pub String);

impl FromStr for CellId {
    type Err = ParseCellIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        u64::from_str_radix(digits, 16)
            .map(CellId)
            .map_err(|_| ParseCellIdError(s.to_string()))
    }
}

impl TryFrom<String> for CellId {
    type Error = ParseCellIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CellId> for String {
    fn from(value: CellId) -> Self {
        value.to_string()
    }
}
