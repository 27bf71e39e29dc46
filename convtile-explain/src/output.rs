//! Output formatters for convtile-explain
//!
//! Supports colored text (terminal) and JSON.

use colored::{ColoredString, Colorize};
use convtile::{BufferUsage, HardwareLimits, Stage};
use std::io::{self, Write};

use crate::error::Result;
use crate::report::{CheckReport, StageStatus};

/// Output format options
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Colored text output for terminal
    #[default]
    Text,
    /// JSON output for tooling and CI
    Json,
}

fn status_tag(status: StageStatus) -> ColoredString {
    match status {
        StageStatus::Ok => "[OK]".green(),
        StageStatus::Fail => "[FAIL]".red().bold(),
        StageStatus::Skipped => "[SKIP]".dimmed(),
    }
}

fn usage_line(usage: &BufferUsage, last: bool) -> String {
    let branch = if last { "└──" } else { "├──" };
    format!(
        "  {} {} ({}): {} / {} ({:.1}%)\n",
        branch,
        usage.check,
        usage.buffer,
        usage.required,
        usage.budget,
        usage.utilization() * 100.0
    )
}

/// Format a check report as colored text for terminal
#[must_use]
pub fn format_text(report: &CheckReport) -> String {
    let mut output = String::new();
    let p = &report.params;

    // Header
    output.push_str(&format!(
        "{} input {} kernel {}\n",
        "Conv2D".cyan().bold(),
        p.input.to_string().white().bold(),
        p.kernel.to_string().white().bold()
    ));
    output.push_str(&format!(
        "  dtypes {}/{}/{}  pad {}x{}  stride {}x{}{}\n",
        p.in_dtype,
        p.weight_dtype,
        p.result_dtype,
        p.pad_h,
        p.pad_w,
        p.stride_h,
        p.stride_w,
        if p.bias { "  bias" } else { "" }
    ));
    output.push_str(&"═".repeat(60));
    output.push('\n');

    for stage_report in &report.stages {
        output.push_str(&format!(
            "\n{:<48} {}\n",
            format!("{}:", capitalize(stage_report.stage.name()))
                .white()
                .bold(),
            status_tag(stage_report.status)
        ));
        if stage_report.status != StageStatus::Ok {
            continue;
        }
        match stage_report.stage {
            Stage::Geometry => {
                if let Some(g) = &report.geometry {
                    output.push_str(&format!(
                        "  ├── Output: {} x {} ({} positions, {} blocks of 16)\n",
                        g.h_out, g.w_out, g.plane, g.blocks
                    ));
                    output.push_str(&format!(
                        "  ├── C_in blocks: {} x {} (aligned {})\n",
                        g.c_in_blocks,
                        g.block_size,
                        g.c_in_aligned()
                    ));
                    output.push_str(&format!(
                        "  └── C_out blocks: {} x {} (aligned {})\n",
                        g.c_out_blocks,
                        g.c_out_block,
                        g.c_out_aligned()
                    ));
                }
            }
            Stage::IndexSpaces => {
                let count = report.index_spaces.len();
                for (i, usage) in report.index_spaces.iter().enumerate() {
                    let branch = if i + 1 == count { "└──" } else { "├──" };
                    output.push_str(&format!(
                        "  {} {}: {} < {}\n",
                        branch, usage.space, usage.value, usage.bound
                    ));
                }
            }
            Stage::Staging => {
                let count = report.staging.len();
                for (i, usage) in report.staging.iter().enumerate() {
                    output.push_str(&usage_line(usage, i + 1 == count));
                }
            }
            Stage::Tiling => {
                if let Some(max_factor) = report.max_factor {
                    output.push_str(&format!("  ├── Max factor: {}\n", max_factor));
                }
                let factors: Vec<String> =
                    report.tiles.iter().map(|t| t.factor.to_string()).collect();
                output.push_str(&format!(
                    "  ├── Feasible: [{}]\n",
                    factors.join(", ")
                ));
                if let Some(best) = report.tiles.first() {
                    output.push_str(&format!(
                        "  └── {}: {}\n",
                        "Best".bold(),
                        best
                    ));
                }
            }
            Stage::Accumulate => {
                if let Some(usage) = &report.accumulate {
                    output.push_str(&usage_line(usage, true));
                }
            }
            Stage::Ranges => {}
        }
    }

    if let Some(bias) = report.plan.as_ref().and_then(|p| p.bias) {
        output.push_str(&format!(
            "\n{} {} x {}\n",
            "Bias:".white().bold(),
            bias.len,
            bias.dtype
        ));
    }

    match &report.failure {
        None => output.push_str(&format!("\n{} Convolution maps onto the accelerator\n", "✓".green())),
        Some(failure) => output.push_str(&format!(
            "\n{} {}\n",
            "✗".red(),
            failure.message.red()
        )),
    }

    output
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Format a check report as JSON
///
/// # Errors
///
/// Returns `serde_json::Error` if serialization fails.
pub fn format_json(report: &CheckReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// Write report to stdout in the specified format
///
/// # Errors
///
/// Returns `ExplainError::Io` if writing to stdout fails, `ExplainError::Json`
/// if serialization fails.
pub fn write_report(report: &CheckReport, format: OutputFormat) -> Result<()> {
    let mut stdout = io::stdout().lock();

    match format {
        OutputFormat::Text => {
            write!(stdout, "{}", format_text(report))?;
        }
        OutputFormat::Json => {
            let json = format_json(report)?;
            writeln!(stdout, "{}", json)?;
        }
    }

    Ok(())
}

/// Write the hardware table to stdout as TOML or JSON
///
/// # Errors
///
/// Returns `ExplainError::Config` if TOML serialization fails, `Json` or `Io`
/// for JSON serialization and stdout failures.
pub fn write_limits(limits: &HardwareLimits, format: OutputFormat) -> Result<()> {
    let mut stdout = io::stdout().lock();

    match format {
        OutputFormat::Text => {
            let text = limits.to_toml()?;
            write!(stdout, "{}", text)?;
        }
        OutputFormat::Json => {
            let table = serde_json::json!({
                "buffers": limits.buffers(),
                "dtypes": limits
                    .dtypes()
                    .map(|(dt, entry)| (dt.name().to_string(), *entry))
                    .collect::<std::collections::BTreeMap<_, _>>(),
            });
            let json = serde_json::to_string_pretty(&table)?;
            writeln!(stdout, "{}", json)?;
        }
    }

    Ok(())
}
