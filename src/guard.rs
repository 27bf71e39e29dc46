//! Numeric Range Guard
//!
//! Legal-range checks on pads, strides and kernel extents, followed by the
//! 32-bit index-space guards. The accelerator's address arithmetic and loop
//! counters are signed 32-bit, so a tensor whose flattened index space
//! reaches `2^31 - 1` cannot be lowered no matter how much memory is free.
//!
//! ## Order
//!
//! 1. pad in [0, 255] (H then W)
//! 2. stride in [1, 63]
//! 3. kernel extent in [1, 255]
//! 4. pad <= kernel extent
//! 5. im2col index space
//! 6. input index space
//! 7. output index space
//!
//! Checks 1-4 need only the parameters; 5-7 need the derived geometry.

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::{IndexSpace, Quantity, Result, TilingError};
use crate::geometry::DerivedGeometry;
use crate::shape::{Axis, ConvParams};

/// Smallest legal padding
pub const PAD_MIN: u32 = 0;
/// Largest legal padding
pub const PAD_MAX: u32 = 255;
/// Smallest legal stride
pub const STRIDE_MIN: u32 = 1;
/// Largest legal stride
pub const STRIDE_MAX: u32 = 63;
/// Smallest legal kernel extent
pub const KERNEL_MIN: u32 = 1;
/// Largest legal kernel extent
pub const KERNEL_MAX: u32 = 255;

/// Exclusive bound on every flattened index space: `2^31 - 1`
pub const INDEX_BOUND: u64 = i32::MAX as u64;

fn check_bounds(quantity: Quantity, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(TilingError::OutOfRange {
            quantity,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Checks 1-4: legal ranges and pad-versus-kernel.
///
/// # Errors
///
/// `OutOfRange` or `PadExceedsKernel` for the first violation.
#[cfg_attr(feature = "tracing", instrument(skip_all))]
pub fn check_ranges(params: &ConvParams) -> Result<()> {
    check_bounds(Quantity::PadH, params.pad_h, PAD_MIN, PAD_MAX)?;
    check_bounds(Quantity::PadW, params.pad_w, PAD_MIN, PAD_MAX)?;
    check_bounds(Quantity::StrideH, params.stride_h, STRIDE_MIN, STRIDE_MAX)?;
    check_bounds(Quantity::StrideW, params.stride_w, STRIDE_MIN, STRIDE_MAX)?;
    check_bounds(Quantity::KernelH, params.kernel.h, KERNEL_MIN, KERNEL_MAX)?;
    check_bounds(Quantity::KernelW, params.kernel.w, KERNEL_MIN, KERNEL_MAX)?;

    for axis in [Axis::H, Axis::W] {
        let pad = params.pad(axis);
        let kernel = params.kernel.spatial(axis);
        if pad > kernel {
            return Err(TilingError::PadExceedsKernel { axis, pad, kernel });
        }
    }
    Ok(())
}

/// Saturating product of index-space factors
#[must_use]
pub fn index_product(factors: &[u64]) -> u64 {
    factors.iter().fold(1u64, |acc, &f| acc.saturating_mul(f))
}

fn check_index(space: IndexSpace, value: u64) -> Result<()> {
    if value >= INDEX_BOUND {
        return Err(TilingError::IndexOverflow {
            space,
            value,
            bound: INDEX_BOUND,
        });
    }
    Ok(())
}

/// The three flattened index spaces, in check order
#[must_use]
pub fn index_spaces(params: &ConvParams, geom: &DerivedGeometry) -> [(IndexSpace, u64); 3] {
    let batch = u64::from(params.input.n);
    let mac_width = u64::from(geom.block_size);
    [
        (
            IndexSpace::Im2col,
            index_product(&[
                batch,
                geom.w_out,
                geom.h_out,
                u64::from(params.kernel.h),
                u64::from(params.kernel.w),
                mac_width,
            ]),
        ),
        (
            IndexSpace::Input,
            index_product(&[
                batch,
                u64::from(params.input.h),
                u64::from(params.input.w),
                u64::from(geom.c_in_blocks),
                mac_width,
            ]),
        ),
        (
            IndexSpace::Output,
            index_product(&[batch, geom.w_out, geom.h_out, u64::from(params.kernel.n)]),
        ),
    ]
}

/// Checks 5-7: every index space strictly below `2^31 - 1`.
///
/// # Errors
///
/// `IndexOverflow` for the first space that reaches the bound.
#[cfg_attr(feature = "tracing", instrument(skip_all))]
pub fn check_index_spaces(params: &ConvParams, geom: &DerivedGeometry) -> Result<()> {
    for (space, value) in index_spaces(params, geom) {
        check_index(space, value)?;
    }
    Ok(())
}
