//! convtile: Conv2D Tiling Feasibility Validator
//!
//! **convtile** decides whether a 2-D convolution (feature map, kernel,
//! padding, stride, dtypes) can be lowered onto a fixed-capacity accelerator,
//! and if so which M-tile split factors the code generator may pick from.
//!
//! # Pipeline
//!
//! 1. **Geometry** - output extents and channel blocking ([`geometry`])
//! 2. **Range guard** - legal pads/strides/kernels and 32-bit index spaces ([`guard`])
//! 3. **Buffer budget** - staging and accumulate capacity ([`budget`])
//! 4. **Tiling** - descending divisors of the block count, filtered ([`tiling`])
//!
//! The [`Validator`] runs them in that order and returns the first failure as a
//! [`TilingError`], or a [`ConvPlan`] on success.
//!
//! # Design Principles
//!
//! - **Fail fast**: no partial results, no clamping of bad parameters
//! - **Structured errors**: every rejection names the quantity and the bound
//! - **Read-only hardware table**: [`HardwareLimits`] is built once and shared
//!
//! # Quick Start
//!
//! ```rust
//! use convtile::{ConvParams, DataType, ErrorKind, HardwareLimits, TensorShape4D, Validator};
//!
//! let limits = HardwareLimits::default();
//! let validator = Validator::new(&limits);
//!
//! let mut params = ConvParams {
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
//! let plan = validator.validate(&params).unwrap();
//! assert!(plan.factors().all(|m| 241 % m == 0));
//!
//! params.pad_h = 200;
//! let err = validator.validate(&params).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::Range);
//! ```

pub mod budget;
pub mod dtype;
pub mod error;
pub mod geometry;
pub mod guard;
pub mod hardware;
pub mod shape;
pub mod tiling;
pub mod validator;

pub use budget::BufferUsage;
pub use dtype::DataType;
pub use error::{ConfigError, ErrorKind, Result, ShapeError, TilingError};
pub use geometry::DerivedGeometry;
pub use hardware::{BufferCapacities, BufferKind, DtypeLimits, HardwareLimits, MacShape};
pub use shape::{Axis, ConvParams, TensorShape4D};
pub use tiling::{TileEnumerator, TilePlan};
pub use validator::{validate, BiasLayout, ConvPlan, Stage, Validator};
