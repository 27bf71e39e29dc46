//! convtile-explain CLI
//!
//! Stage-by-stage diagnostics for conv2d tiling validation

use clap::{Parser, Subcommand};
use convtile::{ConvParams, DataType, HardwareLimits, TensorShape4D};
use convtile_explain::report::parse_shape;
use convtile_explain::{output, CheckReport, OutputFormat};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "convtile-explain")]
#[command(author, version, about = "Conv2D tiling feasibility diagnostics")]
#[command(long_about = "
Checks whether a 2-D convolution can be lowered onto the accelerator and
shows each validation stage:

  geometry -> ranges -> index spaces -> staging -> tiling -> accumulate

Exits with status 1 when the convolution is rejected.
")]
struct Cli {
    /// Log validation stages to stderr (filter with RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one convolution
    Check {
        /// Feature map shape as N,C,H,W
        #[arg(long, value_name = "N,C,H,W", value_parser = shape_arg)]
        input: TensorShape4D,

        /// Kernel shape as C_out,C_in,H,W
        #[arg(long, value_name = "N,C,H,W", value_parser = shape_arg)]
        kernel: TensorShape4D,

        /// Padding on top and bottom
        #[arg(long, default_value = "0")]
        pad_h: u32,

        /// Padding on left and right
        #[arg(long, default_value = "0")]
        pad_w: u32,

        /// Vertical stride
        #[arg(long, default_value = "1")]
        stride_h: u32,

        /// Horizontal stride
        #[arg(long, default_value = "1")]
        stride_w: u32,

        /// Feature map dtype (float32, float16, int8, uint8, int4, uint4)
        #[arg(long, default_value = "float16")]
        in_dtype: DataType,

        /// Kernel dtype
        #[arg(long, default_value = "float16")]
        weight_dtype: DataType,

        /// Result dtype
        #[arg(long, default_value = "float16")]
        result_dtype: DataType,

        /// Convolution has a bias vector
        #[arg(long)]
        bias: bool,

        /// Hardware limit table (TOML); reference profile if omitted
        #[arg(long, value_name = "FILE")]
        limits: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective hardware limit table
    Limits {
        /// Hardware limit table (TOML); reference profile if omitted
        #[arg(long, value_name = "FILE")]
        limits: Option<PathBuf>,

        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

fn shape_arg(text: &str) -> Result<TensorShape4D, String> {
    parse_shape(text).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        init_logging();
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("convtile=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_limits(path: Option<&Path>) -> convtile_explain::Result<HardwareLimits> {
    match path {
        Some(path) => Ok(HardwareLimits::load(path)?),
        None => Ok(HardwareLimits::default()),
    }
}

fn format_for(json: bool) -> OutputFormat {
    if json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    }
}

/// Returns whether the command succeeded
fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Check {
            input,
            kernel,
            pad_h,
            pad_w,
            stride_h,
            stride_w,
            in_dtype,
            weight_dtype,
            result_dtype,
            bias,
            limits,
            json,
        } => {
            let limits = load_limits(limits.as_deref())?;
            let params = ConvParams {
                input,
                kernel,
                in_dtype,
                weight_dtype,
                result_dtype,
                pad_h,
                pad_w,
                stride_h,
                stride_w,
                bias,
            };
            tracing::info!(input = %params.input, kernel = %params.kernel, "checking convolution");

            let report = CheckReport::build(&params, &limits);
            output::write_report(&report, format_for(json))?;
            Ok(report.passed())
        }

        Commands::Limits { limits, json } => {
            let limits = load_limits(limits.as_deref())?;
            output::write_limits(&limits, format_for(json))?;
            Ok(true)
        }
    }
}
