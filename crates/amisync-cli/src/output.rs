//! Run summary helpers.
//!
//! Provides human-readable duration formatting and the end-of-run report.

use std::time::Duration;

use amisync_template::patcher::PatchReport;

/// Formats a duration into a short human-readable string (e.g., "30m 0s").
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs >= 1 {
        format!("{secs}.{}s", duration.subsec_millis() / 100)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// One-line summary of a report.
#[must_use]
pub fn summary(report: &PatchReport) -> String {
    format!(
        "{} template(s) written, {} task(s) applied, {} skipped, {} missing image(s)",
        report.documents_written.len(),
        report.tasks_applied,
        report.tasks_skipped,
        report.missing_artifacts
    )
}

/// Logs the end-of-run report.
pub fn log_report(report: &PatchReport) {
    for path in &report.documents_written {
        tracing::debug!(path = %path.display(), "template written");
    }
    if report.missing_artifacts > 0 {
        tracing::warn!(
            missing = report.missing_artifacts,
            "some images were not found and were written as empty values"
        );
    }
    tracing::info!("{}", summary(report));
}
