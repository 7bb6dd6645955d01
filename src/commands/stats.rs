//! Usage statistics command.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;

use crate::catalog::UsageTotals;
use crate::config::Config;

use super::open_catalog;

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    // Display only, precision loss is irrelevant at these magnitudes
    #[allow(clippy::cast_precision_loss)]
    let megabytes = bytes as f64 / 1_048_576.0;
    if megabytes >= 1024.0 {
        format!("{:.2} GB", megabytes / 1024.0)
    } else {
        format!("{megabytes:.2} MB")
    }
}

/// Format usage totals under `title`
pub fn format_usage(title: &str, totals: Option<UsageTotals>) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{}", "━".repeat(40).dimmed()).unwrap();
    writeln!(&mut out, "  {}", title.yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(40).dimmed()).unwrap();

    match totals {
        Some(totals) => {
            writeln!(&mut out, "  Executions:   {}", totals.executions.to_string().cyan()).unwrap();
            writeln!(&mut out, "  Time:         {}", format!("{} ms", totals.time_ms).cyan()).unwrap();
            writeln!(
                &mut out,
                "  Peak memory:  {}",
                format_bytes(totals.peak_memory_bytes).cyan()
            )
            .unwrap();
        }
        None => {
            writeln!(&mut out, "  {} No executions recorded.", "ℹ".blue()).unwrap();
        }
    }
    out
}

/// Entry point: prints global totals, or one identity's totals.
pub async fn run(config: &Config, identity: Option<String>) -> Result<()> {
    let catalog = open_catalog(config)?;

    let out = match identity {
        Some(identity) => format_usage(&format!("Usage of {identity}"), catalog.usage(&identity)?),
        None => {
            let global = catalog.global_usage()?;
            format_usage("Global usage", (global.executions > 0).then_some(global))
        }
    };

    print!("{out}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 MB");
        assert_eq!(format_bytes(42 * 1024 * 1024), "42.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_format_usage() {
        let out = format_usage(
            "Usage of alice",
            Some(UsageTotals {
                executions: 3,
                time_ms: 1200,
                peak_memory_bytes: 10 * 1024 * 1024,
            }),
        );
        assert!(out.contains("Usage of alice"));
        assert!(out.contains("1200 ms"));
        assert!(out.contains("10.00 MB"));
    }

    #[test]
    fn test_format_usage_empty() {
        assert!(format_usage("Global usage", None).contains("No executions recorded"));
    }
}
