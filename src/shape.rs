//! Convolution parameter record

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dtype::DataType;
use crate::error::ShapeError;

/// Spatial axis of a feature map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Height
    H,
    /// Width
    W,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::H => "h",
            Self::W => "w",
        })
    }
}

/// NCHW shape.
///
/// For a kernel the `n` slot holds the output channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape4D {
    /// Batch (or output channels for a kernel)
    pub n: u32,
    /// Channels
    pub c: u32,
    /// Height
    pub h: u32,
    /// Width
    pub w: u32,
}

impl TensorShape4D {
    /// Create a shape from its four extents
    #[must_use]
    pub const fn new(n: u32, c: u32, h: u32, w: u32) -> Self {
        Self { n, c, h, w }
    }

    /// Create a shape from a slice that must have exactly four entries.
    ///
    /// # Errors
    ///
    /// Returns `ShapeError::Rank` for any other length.
    pub fn from_slice(dims: &[u32]) -> Result<Self, ShapeError> {
        match *dims {
            [n, c, h, w] => Ok(Self { n, c, h, w }),
            _ => Err(ShapeError::Rank {
                expected: 4,
                found: dims.len(),
            }),
        }
    }

    /// Extents in (N, C, H, W) order
    #[must_use]
    pub const fn dims(&self) -> [u32; 4] {
        [self.n, self.c, self.h, self.w]
    }

    /// Extent along a spatial axis
    #[must_use]
    pub const fn spatial(&self, axis: Axis) -> u32 {
        match axis {
            Axis::H => self.h,
            Axis::W => self.w,
        }
    }

    fn first_zero(&self) -> Option<usize> {
        self.dims().iter().position(|&d| d == 0)
    }
}

impl fmt::Display for TensorShape4D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.n, self.c, self.h, self.w)
    }
}

/// Everything the validator needs to know about one convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvParams {
    /// Feature map shape (N, C_in, H_in, W_in)
    pub input: TensorShape4D,
    /// Kernel shape (C_out, C_in, H_k, W_k)
    pub kernel: TensorShape4D,
    /// Feature map element type
    pub in_dtype: DataType,
    /// Kernel element type
    pub weight_dtype: DataType,
    /// Result element type
    pub result_dtype: DataType,
    /// Padding applied to top and bottom
    pub pad_h: u32,
    /// Padding applied to left and right
    pub pad_w: u32,
    /// Vertical stride
    pub stride_h: u32,
    /// Horizontal stride
    pub stride_w: u32,
    /// Whether a bias vector is added
    pub bias: bool,
}

impl ConvParams {
    /// Padding along an axis
    #[must_use]
    pub const fn pad(&self, axis: Axis) -> u32 {
        match axis {
            Axis::H => self.pad_h,
            Axis::W => self.pad_w,
        }
    }

    /// Stride along an axis
    #[must_use]
    pub const fn stride(&self, axis: Axis) -> u32 {
        match axis {
            Axis::H => self.stride_h,
            Axis::W => self.stride_w,
        }
    }

    /// Reject feature maps or kernels with a zero extent.
    ///
    /// # Errors
    ///
    /// Returns `ShapeError::EmptyDimension` for the first zero found.
    pub fn check_dims(&self) -> Result<(), ShapeError> {
        if let Some(index) = self.input.first_zero() {
            return Err(ShapeError::EmptyDimension {
                tensor: "input",
                index,
            });
        }
        if let Some(index) = self.kernel.first_zero() {
            return Err(ShapeError::EmptyDimension {
                tensor: "kernel",
                index,
            });
        }
        Ok(())
    }
}
