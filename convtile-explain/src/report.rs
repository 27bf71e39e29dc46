//! Stage-by-stage validation report
//!
//! Runs the validator once with a stage observer, then records which stages
//! passed, which one failed and which never ran. Each stage that passed also
//! keeps its figures, so a late failure still shows the buffers and tiles
//! that were accepted before it.

use convtile::error::IndexSpace;
use convtile::guard::{self, INDEX_BOUND};
use convtile::{budget, geometry};
use convtile::{
    BufferUsage, ConvParams, ConvPlan, DerivedGeometry, ErrorKind, HardwareLimits, Stage,
    TensorShape4D, TileEnumerator, TilePlan, Validator,
};
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};

/// Outcome of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage ran and passed
    Ok,
    /// Stage ran and rejected the convolution
    Fail,
    /// An earlier stage failed
    Skipped,
}

/// One row of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// Which stage
    pub stage: Stage,
    /// How it went
    pub status: StageStatus,
}

/// Flattened index space with its bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexUsage {
    /// Which space
    pub space: IndexSpace,
    /// Flattened size
    pub value: u64,
    /// Exclusive bound
    pub bound: u64,
}

/// Failure summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Category
    pub kind: ErrorKind,
    /// Human-readable cause
    pub message: String,
}

/// Full report for one `check` invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    /// Parameters checked
    pub params: ConvParams,
    /// Per-stage status, in execution order
    pub stages: Vec<StageReport>,
    /// Geometry, when it could be derived
    pub geometry: Option<DerivedGeometry>,
    /// Index spaces, when geometry could be derived
    pub index_spaces: Vec<IndexUsage>,
    /// Feature-window and minimum-cut usage, once staging passed
    pub staging: Vec<BufferUsage>,
    /// Hardware maximum tile factor, once tiling passed
    pub max_factor: Option<u64>,
    /// Feasible tiles, largest first, once tiling passed
    pub tiles: Vec<TilePlan>,
    /// Copy-out usage for the smallest tile, once the accumulate check passed
    pub accumulate: Option<BufferUsage>,
    /// Plan on success
    pub plan: Option<ConvPlan>,
    /// Cause on failure
    pub failure: Option<FailureReport>,
}

impl CheckReport {
    /// Validate `params` and record every stage.
    #[must_use]
    pub fn build(params: &ConvParams, limits: &HardwareLimits) -> Self {
        let mut last = None;
        let result = Validator::new(limits).validate_with(params, |stage| last = Some(stage));

        let stages: Vec<StageReport> = Stage::ALL
            .iter()
            .map(|&stage| {
                let status = match (&result, last) {
                    (Ok(_), _) => StageStatus::Ok,
                    (Err(_), Some(failed)) if stage < failed => StageStatus::Ok,
                    (Err(_), Some(failed)) if stage == failed => StageStatus::Fail,
                    (Err(_), _) => StageStatus::Skipped,
                };
                StageReport { stage, status }
            })
            .collect();

        let geometry = geometry::derive(params, limits).ok();
        let index_spaces = geometry
            .map(|geom| {
                guard::index_spaces(params, &geom)
                    .into_iter()
                    .map(|(space, value)| IndexUsage {
                        space,
                        value,
                        bound: INDEX_BOUND,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let passed = |stage: Stage| {
            stages
                .iter()
                .any(|s| s.stage == stage && s.status == StageStatus::Ok)
        };

        let staging = match geometry {
            Some(geom) if passed(Stage::Staging) => [
                budget::feature_window(params, &geom, limits),
                budget::minimum_cut(params, limits),
            ]
            .into_iter()
            .filter_map(|usage| usage.ok())
            .collect(),
            _ => Vec::new(),
        };

        let enumerator = geometry
            .filter(|_| passed(Stage::Tiling))
            .and_then(|geom| TileEnumerator::new(params, &geom, limits).ok());
        let max_factor = enumerator.as_ref().map(TileEnumerator::max_factor);
        let tiles: Vec<TilePlan> = enumerator
            .as_ref()
            .map(|e| e.candidates().collect())
            .unwrap_or_default();

        let accumulate = tiles
            .last()
            .filter(|_| passed(Stage::Accumulate))
            .and_then(|smallest| budget::accumulate_copy(smallest.factor, params, limits).ok());

        let (plan, failure) = match result {
            Ok(plan) => (Some(plan), None),
            Err(err) => (
                None,
                Some(FailureReport {
                    kind: err.kind(),
                    message: err.to_string(),
                }),
            ),
        };

        Self {
            params: *params,
            stages,
            geometry,
            index_spaces,
            staging,
            max_factor,
            tiles,
            accumulate,
            plan,
            failure,
        }
    }

    /// Whether the convolution validated
    #[must_use]
    pub fn passed(&self) -> bool {
        self.plan.is_some()
    }

    /// Status of one stage
    #[must_use]
    pub fn status(&self, stage: Stage) -> Option<StageStatus> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.status)
    }
}

/// Parse `N,C,H,W` into a shape.
///
/// # Errors
///
/// `InvalidShape` for a non-numeric entry or a count other than four.
pub fn parse_shape(text: &str) -> Result<TensorShape4D> {
    let invalid = |reason: String| ExplainError::InvalidShape {
        input: text.to_string(),
        reason,
    };
    let dims = text
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| invalid(e.to_string()))?;
    TensorShape4D::from_slice(&dims).map_err(|e| invalid(e.to_string()))
}
