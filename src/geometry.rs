//! Geometry Calculator
//!
//! Output extents and channel blocking for a convolution:
//!
//! ```text
//! H_out = (H_in + 2*pad_h - H_k) / stride_h + 1
//! W_out = (W_in + 2*pad_w - W_k) / stride_w + 1
//! ```
//!
//! The accelerator walks a whole-number output grid, so both divisions must be
//! exact and both extents strictly positive.

#[cfg(feature = "tracing")]
use tracing::instrument;

use serde::{Deserialize, Serialize};

use crate::error::{Quantity, Result, ShapeError, TilingError};
use crate::guard::{STRIDE_MAX, STRIDE_MIN};
use crate::hardware::HardwareLimits;
use crate::shape::{Axis, ConvParams};

/// Output rows covered by one M-tile block
pub const TILE_ROWS: u64 = 16;

/// Derived convolution geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivedGeometry {
    /// Output height
    pub h_out: u64,
    /// Output width
    pub w_out: u64,
    /// Output plane size `M = h_out * w_out`
    pub plane: u64,
    /// Number of 16-row blocks covering the plane, `ceil(M / 16)`
    pub blocks: u64,
    /// Input channel block width (MAC K of the weight dtype)
    pub block_size: u32,
    /// `ceil(C_in / block_size)`
    pub c_in_blocks: u32,
    /// Output channel block width
    pub c_out_block: u32,
    /// `ceil(C_out / c_out_block)`
    pub c_out_blocks: u32,
}

impl DerivedGeometry {
    /// Input channels after padding to whole blocks
    #[must_use]
    pub fn c_in_aligned(&self) -> u64 {
        u64::from(self.c_in_blocks) * u64::from(self.block_size)
    }

    /// Output channels after padding to whole blocks
    #[must_use]
    pub fn c_out_aligned(&self) -> u64 {
        u64::from(self.c_out_blocks) * u64::from(self.c_out_block)
    }
}

/// Output extent along one axis.
///
/// # Errors
///
/// - `OutOfRange` if `stride` is zero
/// - `ShapeError::NonPositiveOutput` if the extent would be `<= 0`
/// - `ShapeError::NonIntegerOutput` if the stride does not divide the span
pub fn output_extent(input: u32, kernel: u32, pad: u32, stride: u32, axis: Axis) -> Result<u64> {
    if stride == 0 {
        let quantity = match axis {
            Axis::H => Quantity::StrideH,
            Axis::W => Quantity::StrideW,
        };
        return Err(TilingError::OutOfRange {
            quantity,
            value: stride,
            min: STRIDE_MIN,
            max: STRIDE_MAX,
        });
    }

    let span = i64::from(input) + 2 * i64::from(pad) - i64::from(kernel);
    let stride_i = i64::from(stride);

    // Negative spans are reported as non-positive even when they divide evenly
    let value = span.div_euclid(stride_i) + 1;
    if span < 0 || value <= 0 {
        return Err(ShapeError::NonPositiveOutput {
            axis,
            value,
            span,
            stride,
        }
        .into());
    }

    let remainder = span % stride_i;
    if remainder != 0 {
        return Err(ShapeError::NonIntegerOutput {
            axis,
            span,
            stride,
            remainder,
        }
        .into());
    }

    Ok(value as u64)
}

/// Derive output geometry and channel blocking.
///
/// # Errors
///
/// Shape errors from [`ConvParams::check_dims`] and [`output_extent`], or
/// `Config` if a dtype is missing from `limits`.
#[cfg_attr(
    feature = "tracing",
    instrument(skip_all, fields(input = %params.input, kernel = %params.kernel))
)]
pub fn derive(params: &ConvParams, limits: &HardwareLimits) -> Result<DerivedGeometry> {
    params.check_dims()?;

    let h_out = output_extent(
        params.input.h,
        params.kernel.h,
        params.pad_h,
        params.stride_h,
        Axis::H,
    )?;
    let w_out = output_extent(
        params.input.w,
        params.kernel.w,
        params.pad_w,
        params.stride_w,
        Axis::W,
    )?;

    let mac = limits.mac(params.weight_dtype)?;
    let block_size = mac.k;
    let c_out_block = if params.result_dtype.is_narrow_int() {
        mac.k
    } else {
        mac.n
    };

    let plane = h_out.saturating_mul(w_out);
    let geometry = DerivedGeometry {
        h_out,
        w_out,
        plane,
        blocks: plane.div_ceil(TILE_ROWS),
        block_size,
        c_in_blocks: params.input.c.div_ceil(block_size),
        c_out_block,
        c_out_blocks: params.kernel.n.div_ceil(c_out_block),
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        h_out = geometry.h_out,
        w_out = geometry.w_out,
        blocks = geometry.blocks,
        c_in_blocks = geometry.c_in_blocks,
        "derived geometry"
    );

    Ok(geometry)
}
