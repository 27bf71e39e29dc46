//! Buffer Budget Checker
//!
//! Worst-case buffer requirements for a single row-block load, compared
//! against the [`HardwareLimits`] capacities.
//!
//! - **Feature window**: `block_size * (ceil(16 / W_out) * stride_h + H_k) *
//!   (W_in + 2 * pad_w) * byte_ratio(in) * 2` bytes must fit the staging buffer.
//! - **Minimum cut**: one kernel-height slab of the channel-aligned input,
//!   `H_k * C_in_aligned * W_in * byte_ratio(in)` bytes, must fit in half of
//!   the staging buffer. `C_in` is rounded up to the input dtype's MAC `k`,
//!   which differs from the weight block when the dtypes are mixed.
//! - **Accumulate copy-out**: `min_factor * n_part * bit_width(fp16)^2` slots
//!   must stay strictly under a quarter of the final-copy buffer, measured in
//!   fp16 elements. Narrow integer results pack two sub-results per slot, so
//!   `n_part = 2` for them.
//!
//! Byte sizes always come from the table's byte ratios.

#[cfg(feature = "tracing")]
use tracing::instrument;

use serde::{Deserialize, Serialize};

use crate::dtype::DataType;
use crate::error::{BudgetCheck, Result, TilingError};
use crate::geometry::{DerivedGeometry, TILE_ROWS};
use crate::hardware::{BufferKind, HardwareLimits};
use crate::shape::ConvParams;

/// One requirement measured against one budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferUsage {
    /// Buffer the requirement is charged to
    pub buffer: BufferKind,
    /// Which computation produced it
    pub check: BudgetCheck,
    /// Required bytes (or elements for the accumulate check)
    pub required: u64,
    /// Available bytes (or elements)
    pub budget: u64,
    /// Whether the requirement is within budget
    pub fits: bool,
}

impl BufferUsage {
    /// Turn an over-budget usage into a `BufferOverflow` error
    pub fn ensure_fits(self) -> Result<Self> {
        if self.fits {
            Ok(self)
        } else {
            Err(TilingError::BufferOverflow {
                buffer: self.buffer,
                what: self.check,
                required: self.required,
                budget: self.budget,
            })
        }
    }

    /// Fraction of the budget consumed
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.budget == 0 {
            return f64::INFINITY;
        }
        self.required as f64 / self.budget as f64
    }
}

fn bytes(elements: u64, byte_ratio: f64) -> u64 {
    (elements as f64 * byte_ratio).ceil() as u64
}

/// Staging bytes for the feature-map window of one 16-row block.
pub fn feature_window(
    params: &ConvParams,
    geom: &DerivedGeometry,
    limits: &HardwareLimits,
) -> Result<BufferUsage> {
    let ratio = limits.byte_ratio(params.in_dtype)?;
    let out_rows = TILE_ROWS.div_ceil(geom.w_out);
    let in_rows = out_rows * u64::from(params.stride_h) + u64::from(params.kernel.h);
    let in_cols = u64::from(params.input.w) + 2 * u64::from(params.pad_w);
    let elements = u64::from(geom.block_size)
        .saturating_mul(in_rows)
        .saturating_mul(in_cols);
    // Double-buffered
    let required = bytes(elements, ratio).saturating_mul(2);
    let budget = limits.capacity(BufferKind::Staging);
    Ok(BufferUsage {
        buffer: BufferKind::Staging,
        check: BudgetCheck::FeatureWindow,
        required,
        budget,
        fits: required <= budget,
    })
}

/// Staging bytes for one kernel-height slab of the channel-aligned input.
pub fn minimum_cut(params: &ConvParams, limits: &HardwareLimits) -> Result<BufferUsage> {
    let ratio = limits.byte_ratio(params.in_dtype)?;
    let in_block = limits.mac(params.in_dtype)?.k;
    let c_in_aligned = u64::from(params.input.c.div_ceil(in_block)) * u64::from(in_block);
    let elements = u64::from(params.kernel.h)
        .saturating_mul(c_in_aligned)
        .saturating_mul(u64::from(params.input.w));
    let required = bytes(elements, ratio);
    let budget = limits.capacity(BufferKind::Staging) / 2;
    Ok(BufferUsage {
        buffer: BufferKind::Staging,
        check: BudgetCheck::MinimumCut,
        required,
        budget,
        fits: required <= budget,
    })
}

/// Copy-out slots for the smallest tile factor against a quarter of the
/// final-copy buffer.
pub fn accumulate_copy(
    min_factor: u64,
    params: &ConvParams,
    limits: &HardwareLimits,
) -> Result<BufferUsage> {
    let fp16_bits = u64::from(limits.bit_width(DataType::Fp16)?);
    let fp16_ratio = limits.byte_ratio(DataType::Fp16)?;
    let n_part: u64 = if params.result_dtype.is_narrow_int() { 2 } else { 1 };

    let required = min_factor
        .saturating_mul(n_part)
        .saturating_mul(fp16_bits * fp16_bits);
    // Whole slots: required < ceil(b) holds exactly when required < b
    let slots = limits.capacity(BufferKind::FinalCopy) as f64 / 4.0 / fp16_ratio;
    let budget = slots.ceil() as u64;
    Ok(BufferUsage {
        buffer: BufferKind::Accumulate,
        check: BudgetCheck::AccumulateCopy,
        required,
        budget,
        fits: required < budget,
    })
}

/// Feature-window then minimum-cut checks against the staging buffer.
///
/// # Errors
///
/// `BufferOverflow` for the first check that does not fit, `Config` for a
/// dtype missing from the table.
#[cfg_attr(feature = "tracing", instrument(skip_all))]
pub fn check_staging(
    params: &ConvParams,
    geom: &DerivedGeometry,
    limits: &HardwareLimits,
) -> Result<[BufferUsage; 2]> {
    let window = feature_window(params, geom, limits)?.ensure_fits()?;
    let cut = minimum_cut(params, limits)?.ensure_fits()?;
    #[cfg(feature = "tracing")]
    tracing::debug!(
        window = window.required,
        cut = cut.required,
        capacity = window.budget,
        "staging budget ok"
    );
    Ok([window, cut])
}

/// Accumulate copy-out check for the smallest feasible tile factor.
///
/// The requirement grows with the factor, so failing here means every
/// candidate fails.
///
/// # Errors
///
/// `BufferOverflow` if the requirement reaches the budget.
#[cfg_attr(feature = "tracing", instrument(skip(params, limits)))]
pub fn check_accumulate(
    min_factor: u64,
    params: &ConvParams,
    limits: &HardwareLimits,
) -> Result<BufferUsage> {
    accumulate_copy(min_factor, params, limits)?.ensure_fits()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::geometry;
    use crate::hardware::BufferCapacities;
    use crate::shape::TensorShape4D;

    fn params(input: [u32; 4], kernel: [u32; 4], pad: u32, stride: u32) -> ConvParams {
        ConvParams {
            input: TensorShape4D::from_slice(&input).unwrap(),
            kernel: TensorShape4D::from_slice(&kernel).unwrap(),
            in_dtype: DataType::Fp16,
            weight_dtype: DataType::Fp16,
            result_dtype: DataType::Fp16,
            pad_h: pad,
            pad_w: pad,
            stride_h: stride,
            stride_w: stride,
            bias: false,
        }
    }

    fn limits_with(buffers: BufferCapacities) -> HardwareLimits {
        let hw = HardwareLimits::default();
        let dtypes: Vec<_> = hw.dtypes().map(|(dt, e)| (dt, *e)).collect();
        HardwareLimits::new(buffers, dtypes).unwrap()
    }

    #[test]
    fn test_feature_window_bytes() {
        let hw = HardwareLimits::default();
        let p = params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1);
        let geom = geometry::derive(&p, &hw).unwrap();
        let usage = feature_window(&p, &geom, &hw).unwrap();
        // 16 * ((1 * 1 + 3) * 64) * 2 bytes * 2
        assert_eq!(usage.required, 16_384);
        assert_eq!(usage.budget, 1024 * 1024);
        assert!(usage.fits);
    }

    #[test]
    fn test_feature_window_narrow_output_needs_more_rows() {
        let hw = HardwareLimits::default();
        // W_out = 4, so one block spans 4 output rows
        let p = params([1, 16, 6, 6], [1, 16, 3, 3], 0, 1);
        let geom = geometry::derive(&p, &hw).unwrap();
        assert_eq!(geom.w_out, 4);
        let usage = feature_window(&p, &geom, &hw).unwrap();
        // 16 * ((4 * 1 + 3) * 6) * 2 * 2
        assert_eq!(usage.required, 2_688);
    }

    #[test]
    fn test_feature_window_int4_halves_bytes() {
        let hw = HardwareLimits::default();
        let p = ConvParams {
            in_dtype: DataType::Int4,
            ..params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1)
        };
        let geom = geometry::derive(&p, &hw).unwrap();
        assert_eq!(feature_window(&p, &geom, &hw).unwrap().required, 4_096);
    }

    #[test]
    fn test_staging_overflow() {
        let hw = limits_with(BufferCapacities {
            staging: 16_383,
            ..BufferCapacities::default()
        });
        let p = params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1);
        let geom = geometry::derive(&p, &hw).unwrap();
        let err = check_staging(&p, &geom, &hw).unwrap_err();
        assert_eq!(
            err,
            TilingError::BufferOverflow {
                buffer: BufferKind::Staging,
                what: BudgetCheck::FeatureWindow,
                required: 16_384,
                budget: 16_383,
            }
        );
        assert!(err.to_string().starts_with("staging buffer overflow"));
    }

    #[test]
    fn test_staging_exact_fit_accepted() {
        let hw = limits_with(BufferCapacities {
            staging: 16_384,
            ..BufferCapacities::default()
        });
        let p = params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1);
        let geom = geometry::derive(&p, &hw).unwrap();
        assert!(check_staging(&p, &geom, &hw).is_ok());
    }

    #[test]
    fn test_minimum_cut_against_half_staging() {
        let hw = HardwareLimits::default();
        // 255 * 2048 channels * 4096 wide * 2 bytes is far beyond 512 KiB
        let p = params([1, 2048, 4096, 4096], [1, 2048, 255, 1], 0, 1);
        let cut = minimum_cut(&p, &hw).unwrap();
        assert_eq!(cut.budget, 512 * 1024);
        assert!(!cut.fits);
        assert!(matches!(
            cut.ensure_fits(),
            Err(TilingError::BufferOverflow {
                what: BudgetCheck::MinimumCut,
                ..
            })
        ));
    }

    #[test]
    fn test_minimum_cut_aligns_to_input_dtype() {
        let hw = HardwareLimits::default();
        // fp16 input, int8 weights: channels round to 16, not to the weight block of 32
        let p = ConvParams {
            weight_dtype: DataType::Int8,
            ..params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1)
        };
        let geom = geometry::derive(&p, &hw).unwrap();
        assert_eq!(geom.c_in_aligned(), 32);
        // 3 * 16 * 64 * 2 bytes
        assert_eq!(minimum_cut(&p, &hw).unwrap().required, 6_144);
    }

    #[test]
    fn test_accumulate_budget() {
        let hw = HardwareLimits::default();
        let p = params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1);
        let usage = check_accumulate(1, &p, &hw).unwrap();
        assert_eq!(usage.required, 256);
        // 256 KiB / 4 / 2 bytes
        assert_eq!(usage.budget, 32_768);
    }

    #[test]
    fn test_accumulate_narrow_result_doubles() {
        let hw = HardwareLimits::default();
        let p = ConvParams {
            result_dtype: DataType::Int8,
            ..params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1)
        };
        assert_eq!(accumulate_copy(3, &p, &hw).unwrap().required, 3 * 2 * 256);
    }

    #[test]
    fn test_accumulate_at_budget_rejected() {
        let hw = HardwareLimits::default();
        let p = params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1);
        // 128 * 256 == 32768: reaching the budget is an overflow
        let err = check_accumulate(128, &p, &hw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BufferOverflow);
        assert!(err.to_string().starts_with("accumulate buffer overflow"));
        assert!(check_accumulate(127, &p, &hw).is_ok());
    }

    #[test]
    fn test_accumulate_fractional_budget_rounds_up() {
        let p = params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1);
        // 2050 / 4 / 2 = 256.25 slots
        let hw = limits_with(BufferCapacities {
            final_copy: 2_050,
            ..BufferCapacities::default()
        });
        let usage = accumulate_copy(1, &p, &hw).unwrap();
        assert_eq!((usage.required, usage.budget), (256, 257));
        assert!(usage.fits);

        // 2048 / 4 / 2 = 256 exactly
        let hw = limits_with(BufferCapacities {
            final_copy: 2_048,
            ..BufferCapacities::default()
        });
        let usage = accumulate_copy(1, &p, &hw).unwrap();
        assert_eq!((usage.required, usage.budget), (256, 256));
        assert!(!usage.fits);
    }

    #[test]
    fn test_utilization() {
        let usage = BufferUsage {
            buffer: BufferKind::Staging,
            check: BudgetCheck::FeatureWindow,
            required: 256,
            budget: 1024,
            fits: true,
        };
        assert!((usage.utilization() - 0.25).abs() < f64::EPSILON);
    }
}
