//! Hardware Limit Table
//!
//! Static description of the accelerator: per-dtype bit widths, byte ratios
//! and cube MAC shapes, plus the byte capacity of the three on-chip buffers
//! the convolution pipeline stages data through.
//!
//! A [`HardwareLimits`] is built once, either from the reference profile
//! ([`HardwareLimits::default`]) or from a TOML file, and is then only read.
//! Every check takes it by shared reference, so any number of validations can
//! run against the same table concurrently.
//!
//! ## TOML format
//!
//! ```toml
//! [buffers]
//! staging = 1048576
//! accumulate = 262144
//! final_copy = 262144
//!
//! [dtypes.float16]
//! bit_width = 16
//! byte_ratio = 2.0
//! mac = { m = 16, k = 16, n = 16 }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dtype::DataType;
use crate::error::ConfigError;

/// Reference staging (L1) buffer capacity: 1 MiB
pub const DEFAULT_STAGING_BYTES: u64 = 1024 * 1024;

/// Reference accumulate (L0C) buffer capacity: 256 KiB
pub const DEFAULT_ACCUMULATE_BYTES: u64 = 256 * 1024;

/// Reference final-copy (unified) buffer capacity: 256 KiB
pub const DEFAULT_FINAL_COPY_BYTES: u64 = 256 * 1024;

/// On-chip buffers the validator budgets against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    /// Holds the input feature-map window for one M-tile
    Staging,
    /// Holds partial sums before copy-out
    Accumulate,
    /// Receives accumulated results for the final copy to memory
    FinalCopy,
}

impl BufferKind {
    /// Human-readable name used in diagnostics
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Staging => "staging buffer",
            Self::Accumulate => "accumulate buffer",
            Self::FinalCopy => "final-copy buffer",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cube unit matrix shape (M x K x N) for one dtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacShape {
    /// Rows per fractal
    pub m: u32,
    /// Reduction width; the input channel block size
    pub k: u32,
    /// Output columns per fractal
    pub n: u32,
}

/// Table entry for one dtype
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DtypeLimits {
    /// Bits per element
    pub bit_width: u32,
    /// Bytes per element; 0.5 for 4-bit types
    pub byte_ratio: f64,
    /// Cube MAC shape when this dtype feeds the cube
    pub mac: MacShape,
}

impl DtypeLimits {
    const fn new(bit_width: u32, byte_ratio: f64, k: u32) -> Self {
        Self {
            bit_width,
            byte_ratio,
            mac: MacShape { m: 16, k, n: 16 },
        }
    }
}

/// Byte capacity of each on-chip buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferCapacities {
    /// Input-stage buffer
    pub staging: u64,
    /// Accumulate buffer
    pub accumulate: u64,
    /// Final-copy buffer
    pub final_copy: u64,
}

impl Default for BufferCapacities {
    fn default() -> Self {
        Self {
            staging: DEFAULT_STAGING_BYTES,
            accumulate: DEFAULT_ACCUMULATE_BYTES,
            final_copy: DEFAULT_FINAL_COPY_BYTES,
        }
    }
}

/// On-disk shape of the table; dtype keys stay strings until validated
#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    buffers: BufferCapacities,
    dtypes: BTreeMap<String, DtypeLimits>,
}

/// Read-only hardware limit table
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareLimits {
    buffers: BufferCapacities,
    dtypes: BTreeMap<DataType, DtypeLimits>,
}

impl Default for HardwareLimits {
    /// Reference accelerator profile
    fn default() -> Self {
        let dtypes = BTreeMap::from([
            (DataType::Fp32, DtypeLimits::new(32, 4.0, 8)),
            (DataType::Fp16, DtypeLimits::new(16, 2.0, 16)),
            (DataType::Int8, DtypeLimits::new(8, 1.0, 32)),
            (DataType::Uint8, DtypeLimits::new(8, 1.0, 32)),
            (DataType::Int4, DtypeLimits::new(4, 0.5, 64)),
            (DataType::Uint4, DtypeLimits::new(4, 0.5, 64)),
        ]);
        Self {
            buffers: BufferCapacities::default(),
            dtypes,
        }
    }
}

impl HardwareLimits {
    /// Build a table from explicit entries.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if any entry fails [`Self::validate`].
    pub fn new(
        buffers: BufferCapacities,
        dtypes: impl IntoIterator<Item = (DataType, DtypeLimits)>,
    ) -> Result<Self, ConfigError> {
        let limits = Self {
            buffers,
            dtypes: dtypes.into_iter().collect(),
        };
        limits.validate()?;
        Ok(limits)
    }

    /// Parse a table from TOML text.
    ///
    /// # Errors
    ///
    /// `Parse` for malformed TOML, `UnknownDtype` for an unrecognised dtype
    /// key, `Invalid` if the parsed values fail validation.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: TableFile =
            toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut dtypes = BTreeMap::new();
        for (key, entry) in file.dtypes {
            let dtype: DataType = key.parse()?;
            if dtypes.insert(dtype, entry).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "dtype {dtype} listed more than once"
                )));
            }
        }
        Self::new(file.buffers, dtypes)
    }

    /// Load a table from a TOML file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, otherwise as [`Self::from_toml`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let limits = Self::from_toml(&contents)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(
            path = %path.display(),
            dtypes = limits.dtypes.len(),
            "loaded hardware limit table"
        );
        Ok(limits)
    }

    /// Serialize the table back to TOML.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let file = TableFile {
            buffers: self.buffers,
            dtypes: self
                .dtypes
                .iter()
                .map(|(dt, entry)| (dt.name().to_string(), *entry))
                .collect(),
        };
        toml::to_string_pretty(&file).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check every entry for usable values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first bad entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, bytes) in self.buffer_entries() {
            if bytes == 0 {
                return Err(ConfigError::Invalid(format!("{kind} capacity must be > 0")));
            }
        }
        for (dtype, entry) in &self.dtypes {
            if entry.bit_width == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{dtype}: bit_width must be > 0"
                )));
            }
            if !entry.byte_ratio.is_finite() || entry.byte_ratio <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{dtype}: byte_ratio must be a positive number, got {}",
                    entry.byte_ratio
                )));
            }
            let mac = entry.mac;
            if mac.m == 0 || mac.k == 0 || mac.n == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{dtype}: mac dimensions must be > 0, got {}x{}x{}",
                    mac.m, mac.k, mac.n
                )));
            }
        }
        Ok(())
    }

    /// Table entry for a dtype.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingDtype` if the table has no entry.
    pub fn dtype(&self, dtype: DataType) -> Result<&DtypeLimits, ConfigError> {
        self.dtypes
            .get(&dtype)
            .ok_or(ConfigError::MissingDtype(dtype))
    }

    /// Bits per element of `dtype`
    pub fn bit_width(&self, dtype: DataType) -> Result<u32, ConfigError> {
        self.dtype(dtype).map(|e| e.bit_width)
    }

    /// Bytes per element of `dtype`
    pub fn byte_ratio(&self, dtype: DataType) -> Result<f64, ConfigError> {
        self.dtype(dtype).map(|e| e.byte_ratio)
    }

    /// Cube MAC shape of `dtype`
    pub fn mac(&self, dtype: DataType) -> Result<MacShape, ConfigError> {
        self.dtype(dtype).map(|e| e.mac)
    }

    /// Input channel block size when `weight_dtype` feeds the cube
    pub fn block_size(&self, weight_dtype: DataType) -> Result<u32, ConfigError> {
        self.mac(weight_dtype).map(|mac| mac.k)
    }

    /// Byte capacity of one buffer
    #[must_use]
    pub fn capacity(&self, buffer: BufferKind) -> u64 {
        match buffer {
            BufferKind::Staging => self.buffers.staging,
            BufferKind::Accumulate => self.buffers.accumulate,
            BufferKind::FinalCopy => self.buffers.final_copy,
        }
    }

    /// All buffer capacities
    #[must_use]
    pub fn buffers(&self) -> &BufferCapacities {
        &self.buffers
    }

    /// Dtypes present in the table, in `DataType` order
    pub fn dtypes(&self) -> impl Iterator<Item = (DataType, &DtypeLimits)> {
        self.dtypes.iter().map(|(dt, entry)| (*dt, entry))
    }

    fn buffer_entries(&self) -> [(BufferKind, u64); 3] {
        [
            (BufferKind::Staging, self.buffers.staging),
            (BufferKind::Accumulate, self.buffers.accumulate),
            (BufferKind::FinalCopy, self.buffers.final_copy),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_DTYPE_TABLE: &str = r#"
[buffers]
staging = 524288
accumulate = 131072
final_copy = 196608

[dtypes.float16]
bit_width = 16
byte_ratio = 2.0
mac = { m = 16, k = 16, n = 16 }

[dtypes.int8]
bit_width = 8
byte_ratio = 1.0
mac = { m = 16, k = 32, n = 16 }
"#;

    #[test]
    fn test_default_profile_lookups() {
        let hw = HardwareLimits::default();
        assert_eq!(hw.bit_width(DataType::Fp16), Ok(16));
        assert_eq!(hw.byte_ratio(DataType::Int4), Ok(0.5));
        assert_eq!(hw.block_size(DataType::Fp16), Ok(16));
        assert_eq!(hw.block_size(DataType::Int8), Ok(32));
        assert_eq!(hw.capacity(BufferKind::Staging), 1024 * 1024);
        assert_eq!(hw.capacity(BufferKind::Accumulate), 256 * 1024);
        assert_eq!(hw.capacity(BufferKind::FinalCopy), 256 * 1024);
        assert!(hw.validate().is_ok());
    }

    #[test]
    fn test_default_profile_covers_every_dtype() {
        let hw = HardwareLimits::default();
        for dt in DataType::ALL {
            let entry = hw.dtype(dt).unwrap();
            assert!(entry.byte_ratio > 0.0, "{dt} has non-positive byte ratio");
        }
    }

    #[test]
    fn test_from_toml() {
        let hw = HardwareLimits::from_toml(TWO_DTYPE_TABLE).unwrap();
        assert_eq!(hw.capacity(BufferKind::Staging), 524_288);
        assert_eq!(hw.capacity(BufferKind::FinalCopy), 196_608);
        assert_eq!(hw.block_size(DataType::Int8), Ok(32));
        assert_eq!(hw.dtypes().count(), 2);
    }

    #[test]
    fn test_missing_dtype_is_config_error() {
        let hw = HardwareLimits::from_toml(TWO_DTYPE_TABLE).unwrap();
        assert_eq!(
            hw.bit_width(DataType::Int4),
            Err(ConfigError::MissingDtype(DataType::Int4))
        );
    }

    #[test]
    fn test_unknown_dtype_key_rejected() {
        let toml_str = TWO_DTYPE_TABLE.replace("[dtypes.int8]", "[dtypes.bf16]");
        assert_eq!(
            HardwareLimits::from_toml(&toml_str),
            Err(ConfigError::UnknownDtype("bf16".to_string()))
        );
    }

    #[test]
    fn test_duplicate_dtype_alias_rejected() {
        let toml_str = TWO_DTYPE_TABLE.replace("[dtypes.int8]", "[dtypes.fp16]");
        let err = HardwareLimits::from_toml(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("more than once")));
    }

    #[test]
    fn test_zero_byte_ratio_rejected() {
        let toml_str = TWO_DTYPE_TABLE.replace("byte_ratio = 1.0", "byte_ratio = 0.0");
        let err = HardwareLimits::from_toml(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("int8")));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let toml_str = TWO_DTYPE_TABLE.replace("accumulate = 131072", "accumulate = 0");
        let err = HardwareLimits::from_toml(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("accumulate")));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = HardwareLimits::from_toml("[buffers\nstaging = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_to_toml_reloads_identically() {
        let hw = HardwareLimits::default();
        let text = hw.to_toml().unwrap();
        assert!(text.contains("[buffers]"));
        assert!(text.contains("float16"));
        assert_eq!(HardwareLimits::from_toml(&text).unwrap(), hw);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_DTYPE_TABLE.as_bytes()).unwrap();
        let hw = HardwareLimits::load(file.path()).unwrap();
        assert_eq!(hw.capacity(BufferKind::Accumulate), 131_072);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = HardwareLimits::load(Path::new("/nonexistent/convtile/hw.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_new_validates() {
        let bad = DtypeLimits {
            bit_width: 16,
            byte_ratio: 2.0,
            mac: MacShape { m: 16, k: 0, n: 16 },
        };
        let err = HardwareLimits::new(BufferCapacities::default(), [(DataType::Fp16, bad)]);
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }
}
