//! Error types for convolution tiling validation
//!
//! Every check is fail-fast: the first violation is returned as one of the
//! variants below, carrying the offending value and the bound it broke.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dtype::DataType;
use crate::hardware::BufferKind;
use crate::shape::Axis;

/// Result type for convtile operations
pub type Result<T> = std::result::Result<T, TilingError>;

/// Coarse failure category, one per class of rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Non-integer or non-positive derived geometry, malformed shapes
    Shape,
    /// Pad/stride/kernel outside legal bounds, or padding exceeding kernel extent
    Range,
    /// Flattened index space exceeds the 32-bit signed bound
    Overflow,
    /// Staging or accumulate buffer budget exceeded
    BufferOverflow,
    /// No M-tile factor survives enumeration
    InfeasibleTiling,
    /// Hardware limit table lookup or load failure
    Config,
}

/// Errors produced while validating a convolution mapping
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TilingError {
    /// Derived geometry or the shape record itself is unusable
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    /// A pad, stride or kernel extent is outside its legal range
    #[error("{quantity} out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        /// Which parameter
        quantity: Quantity,
        /// Value supplied
        value: u32,
        /// Inclusive lower bound
        min: u32,
        /// Inclusive upper bound
        max: u32,
    },

    /// Padding larger than the kernel on the same axis
    #[error("pad exceeds kernel: pad_{axis} = {pad} > kernel_{axis} = {kernel}")]
    PadExceedsKernel {
        /// Spatial axis
        axis: Axis,
        /// Padding on that axis
        pad: u32,
        /// Kernel extent on that axis
        kernel: u32,
    },

    /// Flattened index space does not fit a signed 32-bit counter
    #[error("{space} index overflow: {value} >= {bound}")]
    IndexOverflow {
        /// Which index space overflowed
        space: IndexSpace,
        /// Product that was computed (saturated at `u64::MAX`)
        value: u64,
        /// Exclusive bound
        bound: u64,
    },

    /// Required bytes/elements exceed a buffer budget
    #[error("{} overflow: {what} needs {required}, budget is {budget}", .buffer.label())]
    BufferOverflow {
        /// Buffer whose budget was exceeded
        buffer: BufferKind,
        /// Requirement being checked
        what: BudgetCheck,
        /// Required amount
        required: u64,
        /// Available amount
        budget: u64,
    },

    /// The M-tile enumerator produced no survivor
    #[error("no feasible tiling: {stage} ({blocks} blocks of 16 rows, max tile factor {max_factor})")]
    InfeasibleTiling {
        /// Number of 16-row blocks covering the output plane
        blocks: u64,
        /// Hardware maximum tile factor
        max_factor: u64,
        /// Filter that eliminated the last candidate
        stage: InfeasibleStage,
    },

    /// Hardware limit table problem
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl TilingError {
    /// Category of this failure
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Shape(_) => ErrorKind::Shape,
            Self::OutOfRange { .. } | Self::PadExceedsKernel { .. } => ErrorKind::Range,
            Self::IndexOverflow { .. } => ErrorKind::Overflow,
            Self::BufferOverflow { .. } => ErrorKind::BufferOverflow,
            Self::InfeasibleTiling { .. } => ErrorKind::InfeasibleTiling,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

/// Shape-level failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// Shape slice does not have the expected rank
    #[error("expected rank {expected} but found {found}")]
    Rank {
        /// Required rank
        expected: usize,
        /// Supplied rank
        found: usize,
    },

    /// A dimension of the feature map or kernel is zero
    #[error("{tensor} dimension {index} must be positive")]
    EmptyDimension {
        /// "input" or "kernel"
        tensor: &'static str,
        /// Position in (N, C, H, W)
        index: usize,
    },

    /// `(in + 2*pad - kernel)` is not a multiple of the stride
    #[error("output {axis} is not an integer: ({span}) / {stride} + 1 has remainder {remainder}")]
    NonIntegerOutput {
        /// Spatial axis
        axis: Axis,
        /// `in + 2*pad - kernel`
        span: i64,
        /// Stride on that axis
        stride: u32,
        /// `span mod stride`
        remainder: i64,
    },

    /// Derived output extent is zero or negative
    #[error("output {axis} must be > 0, got {value} = ({span}) / {stride} + 1")]
    NonPositiveOutput {
        /// Spatial axis
        axis: Axis,
        /// Derived extent
        value: i64,
        /// `in + 2*pad - kernel`
        span: i64,
        /// Stride on that axis
        stride: u32,
    },
}

/// Hardware table failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Dtype name does not parse
    #[error("unknown dtype `{0}`")]
    UnknownDtype(String),

    /// Dtype parses but the loaded table has no entry for it
    #[error("dtype {0} missing from hardware table")]
    MissingDtype(DataType),

    /// Table failed validation
    #[error("invalid hardware table: {0}")]
    Invalid(String),

    /// Table file could not be read
    #[error("failed to read hardware table: {0}")]
    Io(String),

    /// Table file is not valid TOML for the schema
    #[error("failed to parse hardware table: {0}")]
    Parse(String),
}

/// Parameters subject to range checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    /// Padding along H
    PadH,
    /// Padding along W
    PadW,
    /// Stride along H
    StrideH,
    /// Stride along W
    StrideW,
    /// Kernel extent along H
    KernelH,
    /// Kernel extent along W
    KernelW,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PadH => "pad_h",
            Self::PadW => "pad_w",
            Self::StrideH => "stride_h",
            Self::StrideW => "stride_w",
            Self::KernelH => "kernel_h",
            Self::KernelW => "kernel_w",
        };
        f.write_str(name)
    }
}

/// Flattened index spaces guarded against 32-bit overflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexSpace {
    /// `batch * W_out * H_out * H_k * W_k * mac_width`
    Im2col,
    /// `batch * H_in * W_in * C_blocks * block_size`
    Input,
    /// `batch * W_out * H_out * C_out`
    Output,
}

impl fmt::Display for IndexSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Im2col => "im2col",
            Self::Input => "input",
            Self::Output => "output",
        };
        f.write_str(name)
    }
}

/// Which budget computation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetCheck {
    /// Feature-map window for one row block, in bytes
    FeatureWindow,
    /// One kernel-height slab of the aligned input vs half the staging buffer, in bytes
    MinimumCut,
    /// Final-copy slots for the smallest tile vs a quarter of the buffer, in elements
    AccumulateCopy,
}

impl fmt::Display for BudgetCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FeatureWindow => "feature-map window",
            Self::MinimumCut => "minimum cut (half of staging buffer)",
            Self::AccumulateCopy => "accumulate copy-out (quarter of final-copy buffer)",
        };
        f.write_str(name)
    }
}

/// Enumerator filter that emptied the candidate set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfeasibleStage {
    /// Hardware maximum is zero, so no divisor qualifies
    NoDivisor,
    /// Every window would start inside the padding
    PaddingOnlyWindow,
    /// Every candidate leaves a tail tile with only padding rows
    TailWithoutData,
}

impl fmt::Display for InfeasibleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoDivisor => "buffer limits admit no tile factor",
            Self::PaddingOnlyWindow => "every input window starts inside the padding",
            Self::TailWithoutData => "tail tile contains no real data",
        };
        f.write_str(name)
    }
}
