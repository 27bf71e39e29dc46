//! Validator Orchestrator
//!
//! Runs every check against one [`ConvParams`] in a fixed order and stops at
//! the first failure:
//!
//! 1. geometry (shape record, output extents, channel blocking)
//! 2. legal ranges and pad-versus-kernel
//! 3. 32-bit index spaces
//! 4. staging buffer (feature window, then minimum cut)
//! 5. M-tile enumeration
//! 6. accumulate copy-out for the smallest surviving tile factor
//!
//! # Example
//!
//! ```rust
//! use convtile::{validate, ConvParams, DataType, HardwareLimits, TensorShape4D};
//!
//! let params = ConvParams {
//!     input: TensorShape4D::new(1, 3, 64, 64),
//!     kernel: TensorShape4D::new(1, 3, 3, 3),
//!     in_dtype: DataType::Fp16,
//!     weight_dtype: DataType::Fp16,
//!     result_dtype: DataType::Fp16,
//!     pad_h: 0,
//!     pad_w: 0,
//!     stride_h: 1,
//!     stride_w: 1,
//!     bias: false,
//! };
//! let plan = validate(&params, &HardwareLimits::default()).unwrap();
//! assert_eq!(plan.geometry.h_out, 62);
//! assert_eq!(plan.best().map(|t| t.factor), Some(241));
//! ```

use std::fmt;

#[cfg(feature = "tracing")]
use tracing::instrument;

use serde::{Deserialize, Serialize};

use crate::budget::{self, BufferUsage};
use crate::dtype::DataType;
use crate::error::Result;
use crate::geometry::{self, DerivedGeometry};
use crate::guard;
use crate::hardware::HardwareLimits;
use crate::shape::ConvParams;
use crate::tiling::{TileEnumerator, TilePlan};

/// Validation stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Output extents and channel blocking
    Geometry,
    /// Pad, stride and kernel bounds
    Ranges,
    /// 32-bit index spaces
    IndexSpaces,
    /// Feature window and minimum cut
    Staging,
    /// M-tile enumeration
    Tiling,
    /// Accumulate copy-out
    Accumulate,
}

impl Stage {
    /// Every stage in execution order
    pub const ALL: [Stage; 6] = [
        Stage::Geometry,
        Stage::Ranges,
        Stage::IndexSpaces,
        Stage::Staging,
        Stage::Tiling,
        Stage::Accumulate,
    ];

    /// Short lowercase name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Geometry => "geometry",
            Self::Ranges => "ranges",
            Self::IndexSpaces => "index spaces",
            Self::Staging => "staging",
            Self::Tiling => "tiling",
            Self::Accumulate => "accumulate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bias vector layout when the convolution has one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiasLayout {
    /// Elements, one per aligned output channel
    pub len: u64,
    /// Element type
    pub dtype: DataType,
}

/// A convolution that maps onto the accelerator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvPlan {
    /// Parameters that were validated
    pub params: ConvParams,
    /// Output extents and channel blocking
    pub geometry: DerivedGeometry,
    /// Hardware maximum tile factor
    pub max_factor: u64,
    /// Feasible tiles, largest factor first; never empty
    pub tiles: Vec<TilePlan>,
    /// Feature window, minimum cut and accumulate usage, in check order
    pub buffers: Vec<BufferUsage>,
    /// Bias layout, if the convolution has a bias
    pub bias: Option<BiasLayout>,
}

impl ConvPlan {
    /// Largest feasible tile
    #[must_use]
    pub fn best(&self) -> Option<&TilePlan> {
        self.tiles.first()
    }

    /// Feasible tile factors, descending
    pub fn factors(&self) -> impl Iterator<Item = u64> + '_ {
        self.tiles.iter().map(|t| t.factor)
    }
}

/// Runs validations against one hardware table
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    limits: &'a HardwareLimits,
}

impl<'a> Validator<'a> {
    /// Validator over a shared table
    #[must_use]
    pub fn new(limits: &'a HardwareLimits) -> Self {
        Self { limits }
    }

    /// Table this validator checks against
    #[must_use]
    pub fn limits(&self) -> &'a HardwareLimits {
        self.limits
    }

    /// Validate a convolution.
    ///
    /// # Errors
    ///
    /// The first failing check's [`TilingError`](crate::TilingError).
    pub fn validate(&self, params: &ConvParams) -> Result<ConvPlan> {
        self.validate_with(params, |_| {})
    }

    /// Validate, calling `enter` as each stage starts.
    ///
    /// On failure the last stage passed to `enter` is the one that failed.
    ///
    /// # Errors
    ///
    /// The first failing check's [`TilingError`](crate::TilingError).
    #[cfg_attr(
        feature = "tracing",
        instrument(
            skip_all,
            fields(input = %params.input, kernel = %params.kernel, in_dtype = %params.in_dtype)
        )
    )]
    pub fn validate_with<F>(&self, params: &ConvParams, mut enter: F) -> Result<ConvPlan>
    where
        F: FnMut(Stage),
    {
        let limits = self.limits;

        enter(Stage::Geometry);
        let geom = geometry::derive(params, limits)?;

        enter(Stage::Ranges);
        guard::check_ranges(params)?;

        enter(Stage::IndexSpaces);
        guard::check_index_spaces(params, &geom)?;

        enter(Stage::Staging);
        let [window, cut] = budget::check_staging(params, &geom, limits)?;

        enter(Stage::Tiling);
        let enumerator = TileEnumerator::new(params, &geom, limits)?;
        let tiles = enumerator.feasible()?;

        enter(Stage::Accumulate);
        let min_factor = tiles.last().map_or(0, |t| t.factor);
        let accumulate = budget::check_accumulate(min_factor, params, limits)?;

        let bias = params.bias.then(|| BiasLayout {
            len: geom.c_out_aligned(),
            dtype: DataType::Fp16,
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(
            feasible = tiles.len(),
            best = tiles.first().map_or(0, |t| t.factor),
            "convolution validated"
        );

        Ok(ConvPlan {
            params: *params,
            geometry: geom,
            max_factor: enumerator.max_factor(),
            tiles,
            buffers: vec![window, cut, accumulate],
            bias,
        })
    }
}

/// Validate `params` against `limits`.
///
/// # Errors
///
/// The first failing check's [`TilingError`](crate::TilingError).
pub fn validate(params: &ConvParams, limits: &HardwareLimits) -> Result<ConvPlan> {
    Validator::new(limits).validate(params)
}
