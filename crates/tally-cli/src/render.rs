//! Report output.

use std::fmt::Write as _;
use std::process::ExitCode;

use clap::ValueEnum;
use tally_verify::{CheckStatus, Outcome, VerificationReport};

/// Output format for the report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    Text,
    /// The full report as JSON.
    Json,
}

/// Process exit status for a report: 0 passed, 1 failed, 2 inconclusive.
pub fn exit_status(report: &VerificationReport) -> u8 {
    match report.outcome {
        Outcome::Passed => 0,
        Outcome::Failed => 1,
        Outcome::Inconclusive { .. } => 2,
    }
}

/// Exit code for a report.
pub fn exit_code(report: &VerificationReport) -> ExitCode {
    ExitCode::from(exit_status(report))
}

/// Render a report in the requested format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render(report: &VerificationReport, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Json => serde_json::to_string_pretty(report),
    }
}

/// Human-readable summary.
pub fn render_text(report: &VerificationReport) -> String {
    let mut out = String::new();
    let verdict = match &report.outcome {
        Outcome::Passed => "PASSED".to_string(),
        Outcome::Failed => format!("FAILED ({} violations)", report.violations.len()),
        Outcome::Inconclusive { reason } => format!("INCONCLUSIVE: {reason}"),
    };
    let _ = writeln!(out, "outcome: {verdict}");
    if let Some(window) = report.window {
        let _ = write!(out, "window: {window}");
        if let Some(epoch) = report.epoch {
            let _ = write!(out, " (epoch {epoch})");
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "tolerance: absolute {} relative {}",
        report.tolerance.absolute, report.tolerance.relative
    );

    if report.inconclusive_reason().is_some() {
        return out;
    }

    out.push_str("\nchecks:\n");
    for (check, status) in &report.checks {
        let status = match status {
            CheckStatus::Passed => "passed".to_string(),
            CheckStatus::Failed { violations } => format!("FAILED ({violations})"),
            CheckStatus::Skipped { reason } => format!("skipped: {reason}"),
        };
        let _ = writeln!(out, "  {:<24} {status}", check.as_str());
    }

    if !report.providers.is_empty() {
        out.push_str("\nproviders:\n");
        for p in &report.providers {
            let _ = writeln!(
                out,
                "  {}:{} {} delta {} recorded {} block {} delegated {} kept {} pools {}",
                p.category,
                p.id,
                p.window,
                p.reward_delta,
                p.recorded,
                p.block_rewards,
                p.delegated,
                p.provider_cut,
                p.pool_reward_delta
            );
        }
    }

    if !report.violations.is_empty() {
        out.push_str("\nviolations:\n");
        for v in &report.violations {
            let _ = writeln!(out, "  {v}");
        }
    }
    out
}
