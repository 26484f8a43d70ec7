use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::report::RunSummary;

/// Output format for the final run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary block
    #[default]
    Text,
    /// JSON - machine-parseable
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => bail!("Invalid format '{}'. Use: text or json", s),
        }
    }
}

impl OutputFormat {
    /// Serialize data as pretty JSON
    pub fn to_json<T: Serialize>(data: &T) -> Result<String> {
        serde_json::to_string_pretty(data).map_err(|e| anyhow::anyhow!("JSON serialization failed: {}", e))
    }

    /// Render a run summary in this format
    pub fn render(self, summary: &RunSummary) -> Result<String> {
        match self {
            Self::Json => Self::to_json(summary),
            Self::Text => Ok(render_text(summary)),
        }
    }
}

fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    let status = if summary.interrupted { " (interrupted)" } else { "" };
    let _ = writeln!(
        out,
        "{} of {} trials completed in {:.1}s{status}",
        summary.total,
        summary.planned,
        Duration::from_millis(summary.elapsed_ms).as_secs_f64()
    );
    let _ = writeln!(out, "  passed:  {}", summary.passed);
    let _ = write!(out, "  failed:  {}", summary.failed);
    write_breakdown(&mut out, summary.fail_reasons.iter().map(|(r, n)| (r.as_str(), *n)));
    let _ = write!(out, "  skipped: {}", summary.skipped);
    write_breakdown(&mut out, summary.skip_reasons.iter().map(|(r, n)| (r.as_str(), *n)));

    if !summary.retained.is_empty() {
        let ids: Vec<String> = summary.retained.iter().map(ToString::to_string).collect();
        let _ = writeln!(
            out,
            "  retained artifacts in {}: {}",
            summary.scratch_dir.display(),
            ids.join(", ")
        );
    }
    out
}

fn write_breakdown<'a>(out: &mut String, reasons: impl Iterator<Item = (&'a str, u64)>) {
    let parts: Vec<String> = reasons.map(|(r, n)| format!("{r}: {n}")).collect();
    if parts.is_empty() {
        out.push('\n');
    } else {
        let _ = writeln!(out, "  ({})", parts.join(", "));
    }
}
