//! End-of-run reporting.

use std::fmt::Write as _;
use std::path::Path;

use console::style;

use crate::models::{MigrationResult, MigrationSummary};
use crate::utils::{format_duration, format_size};

/// Overall verdict for a run, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// No failures.
    Success,
    /// Some failures, but most records made it and no migrator gave up.
    Degraded,
    /// Most records failed, or a migrator hit the error ceiling.
    Failed,
}

impl RunStatus {
    pub fn classify(summary: &MigrationSummary) -> Self {
        let failed = summary.total_failed();
        let succeeded = summary.total_succeeded();
        if summary.results.iter().any(|r| r.aborted) || failed > succeeded {
            RunStatus::Failed
        } else if failed == 0 {
            RunStatus::Success
        } else {
            RunStatus::Degraded
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Degraded => 2,
            RunStatus::Failed => 1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Success => "completed successfully",
            RunStatus::Degraded => "completed with errors",
            RunStatus::Failed => "failed",
        }
    }
}

fn row(out: &mut String, result: &MigrationResult) {
    let name = if result.aborted {
        format!("{} (aborted)", result.collection)
    } else {
        result.collection.clone()
    };
    let _ = writeln!(
        out,
        "  {:<22} {:>7} {:>8} {:>8} {:>9} {:>8} {:>7} {:>8.1}%",
        name,
        result.total,
        result.created,
        result.updated,
        result.existing,
        result.skipped,
        result.failed,
        result.success_rate()
    );
}

/// Summary table as printed at the end of a run.
pub fn render_summary(summary: &MigrationSummary) -> String {
    let mut out = String::new();
    let title = if summary.dry_run {
        "Migration Summary (dry run)"
    } else {
        "Migration Summary"
    };
    let _ = writeln!(out, "\n{}", style(title).bold());
    let _ = writeln!(out, "{}", "-".repeat(92));
    let _ = writeln!(
        out,
        "  {:<22} {:>7} {:>8} {:>8} {:>9} {:>8} {:>7} {:>9}",
        "Collection", "Total", "Created", "Updated", "Existing", "Skipped", "Failed", "Success"
    );
    for result in &summary.results {
        row(&mut out, result);
    }
    let _ = writeln!(out, "{}", "-".repeat(92));

    let media = &summary.media;
    let _ = writeln!(
        out,
        "  {:<22} {} uploaded ({}), {} reused, {} failed, {} from cache",
        "Media:",
        media.uploaded,
        format_size(media.bytes),
        media.reused,
        media.failed,
        media.cache_hits
    );
    let _ = writeln!(
        out,
        "  {:<22} {}",
        "Duration:",
        format_duration(summary.duration())
    );

    let status = RunStatus::classify(summary);
    let line = format!(
        "Migration {}: {} succeeded, {} failed",
        status.label(),
        summary.total_succeeded(),
        summary.total_failed()
    );
    let styled = match status {
        RunStatus::Success => style(line).green(),
        RunStatus::Degraded => style(line).yellow(),
        RunStatus::Failed => style(line).red(),
    };
    let _ = writeln!(out, "\n{}", styled);
    out
}

pub fn print_summary(summary: &MigrationSummary) {
    print!("{}", render_summary(summary));
}

/// Print the first `limit` recorded errors per collection.
pub fn print_errors(summary: &MigrationSummary, limit: usize) {
    for result in summary.results.iter().filter(|r| !r.errors.is_empty()) {
        println!(
            "\n{} {} ({} errors)",
            style("!").yellow(),
            style(&result.collection).bold(),
            result.errors.len()
        );
        for error in result.errors.iter().take(limit) {
            match &error.field {
                Some(field) => println!("  row {:<6} {}: {}", error.row, field, error.message),
                None => println!("  row {:<6} {}", error.row, error.message),
            }
        }
        if result.errors.len() > limit {
            println!("  ... and {} more", result.errors.len() - limit);
        }
    }
}

/// Write the full summary, including failing rows, as JSON.
pub fn save_report(summary: &MigrationSummary, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}
