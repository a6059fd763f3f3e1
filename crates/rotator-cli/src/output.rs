use std::fmt::Write as _;

use rotator_core::orchestrator::{RotationStatus, RotationSummary};

pub fn print_json(summary: &RotationSummary) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

pub fn print_summary(summary: &RotationSummary, dry_run: bool) {
    print!("{}", render_summary(summary, dry_run));
}

fn status_label(status: RotationStatus) -> &'static str {
    match status {
        RotationStatus::Success => "success",
        RotationStatus::Partial => "partial",
        RotationStatus::Failed => "failed",
    }
}

/// Render the pass report: count block, one row per outcome (service column
/// sized to the longest name, the rest fixed), then the not-yet-due services.
fn render_summary(summary: &RotationSummary, dry_run: bool) -> String {
    let mut out = String::new();
    let mode = if dry_run { " (dry run)" } else { "" };

    let _ = writeln!(out, "Certificate rotation summary{mode}");
    let _ = writeln!(out, "  total processed: {}", summary.total);
    let _ = writeln!(out, "  succeeded:       {}", summary.succeeded);
    let _ = writeln!(out, "  partial:         {}", summary.partial);
    let _ = writeln!(out, "  failed:          {}", summary.failed);
    let _ = writeln!(out, "  skipped:         {}", summary.skipped.len());

    if !summary.outcomes.is_empty() {
        let name_width = summary
            .outcomes
            .iter()
            .map(|o| o.service.len())
            .max()
            .unwrap_or(0)
            .max("SERVICE".len());

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:name_width$}  {:7}  {:>10}  DETAIL",
            "SERVICE", "STATUS", "DURATION"
        );
        for outcome in &summary.outcomes {
            let _ = writeln!(
                out,
                "{:name_width$}  {:7}  {:>8}ms  {}",
                outcome.service,
                status_label(outcome.status),
                outcome.duration_ms,
                outcome.error.as_deref().unwrap_or("-")
            );
        }
    }

    if !summary.skipped.is_empty() {
        let _ = writeln!(out);
        for s in &summary.skipped {
            let _ = writeln!(out, "skipped {} (expires in {} days)", s.service, s.days_left);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotator_core::orchestrator::{RotationOutcome, SkippedService};

    fn summary() -> RotationSummary {
        RotationSummary {
            total: 3,
            succeeded: 1,
            partial: 1,
            failed: 0,
            outcomes: vec![
                RotationOutcome {
                    service: "payments-api".into(),
                    status: RotationStatus::Success,
                    error: None,
                    duration_ms: 42,
                },
                RotationOutcome {
                    service: "auth".into(),
                    status: RotationStatus::Partial,
                    error: Some("certificate issued but reload failed: timeout".into()),
                    duration_ms: 5001,
                },
            ],
            skipped: vec![SkippedService {
                service: "orders-api".into(),
                days_left: 90,
            }],
        }
    }

    #[test]
    fn renders_counts_and_skipped_lines() {
        let text = render_summary(&summary(), false);
        assert!(text.starts_with("Certificate rotation summary\n"));
        assert!(text.contains("  total processed: 3"));
        assert!(text.contains("  succeeded:       1"));
        assert!(text.contains("  skipped:         1"));
        assert!(text.contains("skipped orders-api (expires in 90 days)"));
    }

    #[test]
    fn dry_run_is_marked_in_the_header() {
        let text = render_summary(&summary(), true);
        assert!(text.starts_with("Certificate rotation summary (dry run)\n"));
    }

    #[test]
    fn outcome_rows_align_on_longest_service_name() {
        let text = render_summary(&summary(), false);
        // Column width follows "payments-api" (12 chars).
        assert!(text.contains("payments-api  success"));
        assert!(text.contains("auth          partial"));
        assert!(text.contains("certificate issued but reload failed: timeout"));
    }

    #[test]
    fn successful_outcome_detail_is_a_dash() {
        let text = render_summary(&summary(), false);
        let row = text.lines().find(|l| l.starts_with("payments-api")).unwrap();
        assert!(row.trim_end().ends_with('-'));
    }

    #[test]
    fn empty_outcome_list_prints_no_table() {
        let empty = RotationSummary {
            total: 0,
            succeeded: 0,
            partial: 0,
            failed: 0,
            outcomes: vec![],
            skipped: vec![],
        };
        let text = render_summary(&empty, false);
        assert!(!text.contains("SERVICE"));
    }
}
