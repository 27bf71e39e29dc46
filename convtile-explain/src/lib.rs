//! convtile-explain: Conv2D Tiling Diagnostics CLI
//!
//! Runs the convtile validator on a convolution described on the command
//! line and shows what happened at every stage: derived geometry, index
//! spaces against the 32-bit bound, buffer usage against capacity, and the
//! feasible M-tile factors.
//!
//! # Example
//!
//! ```rust
//! use convtile::{ConvParams, DataType, HardwareLimits, Stage};
//! use convtile_explain::report::{parse_shape, CheckReport, StageStatus};
//!
//! let params = ConvParams {
//!     input: parse_shape("1,3,64,64").unwrap(),
//!     kernel: parse_shape("1,3,3,3").unwrap(),
//!     in_dtype: DataType::Fp16,
//!     weight_dtype: DataType::Fp16,
//!     result_dtype: DataType::Fp16,
//!     pad_h: 0,
//!     pad_w: 0,
//!     stride_h: 1,
//!     stride_w: 1,
//!     bias: false,
//! };
//! let report = CheckReport::build(&params, &HardwareLimits::default());
//! assert!(report.passed());
//! assert_eq!(report.status(Stage::Tiling), Some(StageStatus::Ok));
//! ```

#![allow(clippy::cast_precision_loss)] // Display percentages only
#![allow(clippy::format_push_string)] // Performance not critical for CLI

pub mod error;
pub mod output;
pub mod report;

pub use error::{ExplainError, Result};
pub use output::OutputFormat;
pub use report::CheckReport;
