//! Element data types understood by the accelerator

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Element type of a feature map, kernel or result tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// IEEE single precision
    #[serde(rename = "float32", alias = "fp32")]
    Fp32,
    /// IEEE half precision
    #[serde(rename = "float16", alias = "fp16")]
    Fp16,
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit integer
    Uint8,
    /// Signed 4-bit integer, two per byte
    Int4,
    /// Unsigned 4-bit integer, two per byte
    Uint4,
}

impl DataType {
    /// All variants, in table order
    pub const ALL: [DataType; 6] = [
        Self::Fp32,
        Self::Fp16,
        Self::Int8,
        Self::Uint8,
        Self::Int4,
        Self::Uint4,
    ];

    /// Canonical table key
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Fp32 => "float32",
            Self::Fp16 => "float16",
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int4 => "int4",
            Self::Uint4 => "uint4",
        }
    }

    /// Integer type narrower than fp16.
    ///
    /// Narrow results pack two logical sub-results into one physical
    /// accumulate slot and realign output channels to the MAC K width.
    #[must_use]
    pub fn is_narrow_int(self) -> bool {
        matches!(self, Self::Int8 | Self::Uint8 | Self::Int4 | Self::Uint4)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "float32" | "fp32" => Ok(Self::Fp32),
            "float16" | "fp16" => Ok(Self::Fp16),
            "int8" => Ok(Self::Int8),
            "uint8" => Ok(Self::Uint8),
            "int4" => Ok(Self::Int4),
            "uint4" => Ok(Self::Uint4),
            _ => Err(ConfigError::UnknownDtype(s.to_string())),
        }
    }
}
