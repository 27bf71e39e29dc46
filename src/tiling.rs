//! M-Tile Feasibility Enumerator
//!
//! The output plane is processed in blocks of `m * 16` output positions. A
//! tile factor `m` is feasible when:
//!
//! 1. `m` divides `M = ceil(H_out * W_out / 16)` exactly, so no block is split
//! 2. `m <= max_factor`, the smaller of the staging and accumulate limits
//! 3. the input window `AL_Hi = ceil(16m / W_out) * stride_h + H_k` reaches
//!    past the top padding (`AL_Hi >= pad_h + 1`)
//! 4. the tail of the padded input column, `(H_in + 2*pad_h) mod
//!    (AL_Hi + stride_h - H_k)`, is either zero or longer than the padding;
//!    a shorter tail would load only padding rows
//!
//! Candidates are produced lazily, largest first, since larger tiles amortise
//! per-pass overhead best.

use std::fmt;

#[cfg(feature = "tracing")]
use tracing::instrument;

use serde::{Deserialize, Serialize};

use crate::dtype::DataType;
use crate::error::{InfeasibleStage, Result, TilingError};
use crate::geometry::{DerivedGeometry, TILE_ROWS};
use crate::hardware::{BufferKind, HardwareLimits};
use crate::shape::ConvParams;

/// One feasible tile factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilePlan {
    /// Number of 16-row blocks per pass
    pub factor: u64,
    /// Input rows loaded per pass, `AL_Hi`
    pub input_rows: u64,
}

impl fmt::Display for TilePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={} (input rows {})", self.factor, self.input_rows)
    }
}

fn isqrt(n: u64) -> u64 {
    let mut r = (n as f64).sqrt() as u64;
    while r.checked_mul(r).map_or(true, |sq| sq > n) {
        r -= 1;
    }
    while (r + 1).checked_mul(r + 1).is_some_and(|sq| sq <= n) {
        r += 1;
    }
    r
}

/// Positive divisors of `n` in strictly descending order.
///
/// Walks `d = 1..=sqrt(n)` yielding the cofactors `n / d` (large to small),
/// then walks back down yielding `d` itself. Nothing is buffered.
#[derive(Debug, Clone)]
pub struct Divisors {
    n: u64,
    root: u64,
    d: u64,
    ascending: bool,
}

impl Divisors {
    /// Divisors of `n`; empty for `n == 0`
    #[must_use]
    pub fn new(n: u64) -> Self {
        Self {
            n,
            root: isqrt(n),
            d: 1,
            ascending: true,
        }
    }
}

impl Iterator for Divisors {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if self.ascending {
                if self.d > self.root {
                    self.ascending = false;
                    self.d = self.root;
                    continue;
                }
                let d = self.d;
                self.d += 1;
                if self.n % d == 0 {
                    return Some(self.n / d);
                }
            } else {
                if self.d == 0 {
                    return None;
                }
                let d = self.d;
                self.d -= 1;
                if self.n % d == 0 && d != self.n / d {
                    return Some(d);
                }
            }
        }
    }
}

/// Largest tile factor the buffers admit.
///
/// `floor(min(staging / byte_ratio(in) / 16 / block_size,
///            accumulate / byte_ratio(fp16) / 16 / 16))`
pub fn max_factor(
    params: &ConvParams,
    geom: &DerivedGeometry,
    limits: &HardwareLimits,
) -> Result<u64> {
    let rows = TILE_ROWS as f64;
    let staging = limits.capacity(BufferKind::Staging) as f64
        / limits.byte_ratio(params.in_dtype)?
        / rows
        / f64::from(geom.block_size);
    let accumulate = limits.capacity(BufferKind::Accumulate) as f64
        / limits.byte_ratio(DataType::Fp16)?
        / rows
        / rows;
    Ok(staging.min(accumulate).floor() as u64)
}

/// Enumerates feasible tile factors for one convolution
#[derive(Debug, Clone)]
pub struct TileEnumerator {
    blocks: u64,
    max_factor: u64,
    w_out: u64,
    stride_h: u64,
    kernel_h: u64,
    pad_h: u64,
    padded_h: u64,
}

impl TileEnumerator {
    /// Set up enumeration for validated parameters.
    ///
    /// # Errors
    ///
    /// `Config` if a dtype is missing from `limits`.
    pub fn new(
        params: &ConvParams,
        geom: &DerivedGeometry,
        limits: &HardwareLimits,
    ) -> Result<Self> {
        Ok(Self {
            blocks: geom.blocks,
            max_factor: max_factor(params, geom, limits)?,
            w_out: geom.w_out,
            stride_h: u64::from(params.stride_h),
            kernel_h: u64::from(params.kernel.h),
            pad_h: u64::from(params.pad_h),
            padded_h: u64::from(params.input.h) + 2 * u64::from(params.pad_h),
        })
    }

    /// Number of 16-row blocks covering the output plane
    #[must_use]
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Hardware maximum tile factor
    #[must_use]
    pub fn max_factor(&self) -> u64 {
        self.max_factor
    }

    /// Divisors of the block count not above the hardware maximum, descending
    pub fn divisors(&self) -> impl Iterator<Item = u64> + Clone {
        let max = self.max_factor;
        Divisors::new(self.blocks).filter(move |&m| m <= max)
    }

    /// Plan for a factor, before filtering
    #[must_use]
    pub fn plan(&self, factor: u64) -> TilePlan {
        let out_rows = (factor * TILE_ROWS).div_ceil(self.w_out);
        TilePlan {
            factor,
            input_rows: out_rows * self.stride_h + self.kernel_h,
        }
    }

    /// Input window reaches past the top padding
    #[must_use]
    pub fn reaches_data(&self, plan: &TilePlan) -> bool {
        plan.input_rows >= self.pad_h + 1
    }

    /// Tail tile is empty or holds at least one real input row
    #[must_use]
    pub fn tail_has_data(&self, plan: &TilePlan) -> bool {
        // input_rows >= stride + kernel, so the step is at least 2 * stride
        let step = plan.input_rows + self.stride_h - self.kernel_h;
        let tail = self.padded_h % step;
        tail == 0 || tail > self.pad_h
    }

    /// Feasible plans, lazily, largest factor first
    pub fn candidates(&self) -> impl Iterator<Item = TilePlan> + '_ {
        self.divisors()
            .map(|m| self.plan(m))
            .filter(|plan| self.reaches_data(plan))
            .filter(|plan| self.tail_has_data(plan))
    }

    /// Collect every feasible plan.
    ///
    /// # Errors
    ///
    /// `InfeasibleTiling`, naming the filter that removed the last candidate.
    #[cfg_attr(
        feature = "tracing",
        instrument(skip(self), fields(blocks = self.blocks, max_factor = self.max_factor))
    )]
    pub fn feasible(&self) -> Result<Vec<TilePlan>> {
        let plans: Vec<TilePlan> = self.candidates().collect();
        if !plans.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::debug!(count = plans.len(), largest = plans[0].factor, "feasible tiles");
            return Ok(plans);
        }

        let stage = if self.divisors().next().is_none() {
            InfeasibleStage::NoDivisor
        } else if !self
            .divisors()
            .map(|m| self.plan(m))
            .any(|plan| self.reaches_data(&plan))
        {
            InfeasibleStage::PaddingOnlyWindow
        } else {
            InfeasibleStage::TailWithoutData
        };
        Err(TilingError::InfeasibleTiling {
            blocks: self.blocks,
            max_factor: self.max_factor,
            stage,
        })
    }
}

/// Feasible tile plans for validated parameters, largest first.
///
/// # Errors
///
/// `InfeasibleTiling` if nothing survives, `Config` for a missing dtype.
pub fn enumerate(
    params: &ConvParams,
    geom: &DerivedGeometry,
    limits: &HardwareLimits,
) -> Result<Vec<TilePlan>> {
    TileEnumerator::new(params, geom, limits)?.feasible()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry;
    use crate::hardware::BufferCapacities;
    use crate::shape::TensorShape4D;
    use proptest::prelude::*;

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

    fn enumerator(p: &ConvParams, hw: &HardwareLimits) -> TileEnumerator {
        let geom = geometry::derive(p, hw).unwrap();
        TileEnumerator::new(p, &geom, hw).unwrap()
    }

    #[test]
    fn test_divisors_descending() {
        assert_eq!(Divisors::new(12).collect::<Vec<_>>(), vec![12, 6, 4, 3, 2, 1]);
        assert_eq!(Divisors::new(16).collect::<Vec<_>>(), vec![16, 8, 4, 2, 1]);
        assert_eq!(Divisors::new(241).collect::<Vec<_>>(), vec![241, 1]);
        assert_eq!(Divisors::new(1).collect::<Vec<_>>(), vec![1]);
        assert_eq!(Divisors::new(0).count(), 0);
    }

    #[test]
    fn test_divisors_restartable() {
        let divs = Divisors::new(36);
        let first: Vec<_> = divs.clone().collect();
        let second: Vec<_> = divs.collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![36, 18, 12, 9, 6, 4, 3, 2, 1]);
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(u64::MAX), 4_294_967_295);
    }

    #[test]
    fn test_max_factor_default_profile() {
        let hw = HardwareLimits::default();
        let p = params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1);
        let geom = geometry::derive(&p, &hw).unwrap();
        // staging: 1 MiB / 2 / 16 / 16 = 2048, accumulate: 256 KiB / 2 / 16 / 16 = 512
        assert_eq!(max_factor(&p, &geom, &hw), Ok(512));
    }

    #[test]
    fn test_max_factor_staging_bound() {
        let hw = limits_with(BufferCapacities {
            staging: 64 * 1024,
            ..BufferCapacities::default()
        });
        let p = params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1);
        let geom = geometry::derive(&p, &hw).unwrap();
        assert_eq!(max_factor(&p, &geom, &hw), Ok(128));
    }

    #[test]
    fn test_scenario_a_plans() {
        let hw = HardwareLimits::default();
        let e = enumerator(&params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1), &hw);
        assert_eq!(e.blocks(), 241);
        let plans = e.feasible().unwrap();
        assert_eq!(
            plans,
            vec![
                TilePlan {
                    factor: 241,
                    input_rows: 66
                },
                TilePlan {
                    factor: 1,
                    input_rows: 4
                },
            ]
        );
    }

    #[test]
    fn test_divisors_capped_by_max_factor() {
        let hw = limits_with(BufferCapacities {
            accumulate: 16 * 1024,
            ..BufferCapacities::default()
        });
        // 16 KiB / 2 / 16 / 16 = 32
        let e = enumerator(&params([1, 16, 64, 64], [16, 16, 1, 1], 0, 1), &hw);
        assert_eq!(e.max_factor(), 32);
        assert_eq!(e.blocks(), 256);
        assert_eq!(e.divisors().collect::<Vec<_>>(), vec![32, 16, 8, 4, 2, 1]);
    }

    #[test]
    fn test_tail_filter_drops_padding_only_tails() {
        let hw = HardwareLimits::default();
        // 8x8 output, 4 blocks; padded height 10
        let e = enumerator(&params([1, 16, 8, 8], [16, 16, 3, 3], 1, 1), &hw);
        assert_eq!(e.divisors().collect::<Vec<_>>(), vec![4, 2, 1]);
        // m=4: rows 11, step 9, tail 1 <= pad
        assert!(!e.tail_has_data(&e.plan(4)));
        // m=2: rows 7, step 5, tail 0
        assert!(e.tail_has_data(&e.plan(2)));
        // m=1: rows 5, step 3, tail 1 <= pad
        assert!(!e.tail_has_data(&e.plan(1)));
        assert_eq!(
            e.feasible().unwrap(),
            vec![TilePlan {
                factor: 2,
                input_rows: 7
            }]
        );
    }

    #[test]
    fn test_tail_filter_stride_beyond_kernel() {
        let hw = HardwareLimits::default();
        // 3x16 output, 3 blocks; padded height 8
        let p = ConvParams {
            pad_w: 0,
            stride_h: 3,
            stride_w: 1,
            ..params([1, 16, 4, 16], [16, 16, 2, 1], 2, 3)
        };
        let e = enumerator(&p, &hw);
        assert_eq!(e.blocks(), 3);
        assert_eq!(e.divisors().collect::<Vec<_>>(), vec![3, 1]);
        // m=3: rows 11, step 11 + (3 - 2) = 12, tail 8 > pad
        assert_eq!(e.plan(3).input_rows, 11);
        assert!(e.tail_has_data(&e.plan(3)));
        // m=1: rows 5, step 6, tail 2 <= pad
        assert_eq!(e.plan(1).input_rows, 5);
        assert!(!e.tail_has_data(&e.plan(1)));
        assert_eq!(
            e.feasible().unwrap(),
            vec![TilePlan {
                factor: 3,
                input_rows: 11
            }]
        );
    }

    #[test]
    fn test_all_tails_without_data() {
        let hw = HardwareLimits::default();
        // 4x4 output is a single block: rows 7, step 5, padded 6, tail 1
        let e = enumerator(&params([1, 16, 4, 4], [16, 16, 3, 3], 1, 1), &hw);
        assert_eq!(
            e.feasible(),
            Err(TilingError::InfeasibleTiling {
                blocks: 1,
                max_factor: 512,
                stage: InfeasibleStage::TailWithoutData,
            })
        );
    }

    #[test]
    fn test_window_inside_padding_rejected() {
        let hw = HardwareLimits::default();
        // pad_h beyond the kernel is normally caught by the range guard
        let p = ConvParams {
            pad_h: 10,
            pad_w: 0,
            ..params([1, 16, 1, 64], [16, 16, 3, 1], 0, 1)
        };
        let e = enumerator(&p, &hw);
        assert_eq!(e.blocks(), 76);
        assert!(!e.reaches_data(&e.plan(1)));
        assert!(e.reaches_data(&e.plan(76)));
        let factors: Vec<u64> = e.candidates().map(|plan| plan.factor).collect();
        assert!(!factors.contains(&1));
    }

    #[test]
    fn test_zero_max_factor_has_no_divisor() {
        let hw = limits_with(BufferCapacities {
            accumulate: 256,
            ..BufferCapacities::default()
        });
        let e = enumerator(&params([1, 3, 64, 64], [1, 3, 3, 3], 0, 1), &hw);
        assert_eq!(e.max_factor(), 0);
        assert!(matches!(
            e.feasible(),
            Err(TilingError::InfeasibleTiling {
                stage: InfeasibleStage::NoDivisor,
                ..
            })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_divisors_exact_and_descending(n in 1u64..50_000) {
            let divs: Vec<u64> = Divisors::new(n).collect();
            for pair in divs.windows(2) {
                prop_assert!(pair[0] > pair[1]);
            }
            for &m in &divs {
                prop_assert_eq!(n % m, 0);
            }
            let brute = (1..=n).filter(|d| n % d == 0).count();
            prop_assert_eq!(divs.len(), brute);
            prop_assert_eq!(divs.first().copied(), Some(n));
            prop_assert_eq!(divs.last().copied(), Some(1));
        }
    }
}
