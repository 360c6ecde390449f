use std::fmt::Write;

use crate::models::{EntityStatus, Metric, ReportKind, ReportResult, Severity};
use crate::policy::percent;
use crate::store::StoredReport;

const WARNING_LIMIT: usize = 20;

/// Markdown for a stored report, with its history header.
pub fn render_stored(report: &StoredReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "<!-- report {} -->", report.id);
    let _ = writeln!(output, "Source file: {}", report.filename);
    if let Some(author) = &report.created_by {
        let _ = writeln!(output, "Created by: {author}");
    }
    let _ = writeln!(output);
    output.push_str(&render_markdown(&report.result));
    output
}

pub fn render_markdown(result: &ReportResult) -> String {
    let mut output = String::new();
    let kind = result.report_type;

    let _ = write!(output, "# {}", kind.label());
    if let Some(period) = result.period {
        let _ = write!(output, " ({})", period.label());
    }
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Generated {} · {}",
        result.generated_at.format("%Y-%m-%d %H:%M UTC"),
        result.headline()
    );
    let _ = writeln!(output);

    let _ = writeln!(output, "## Summary");
    let summary = &result.summary;
    let _ = writeln!(
        output,
        "- Rows processed: {} ({} summary rows skipped)",
        summary.rows_processed, summary.skipped_rows
    );
    let _ = writeln!(
        output,
        "- Entities: {} ({} measured, {} without data)",
        summary.entities, summary.measured, summary.insufficient
    );
    let _ = writeln!(
        output,
        "- Flagged: {}, passed: {}",
        summary.flagged, summary.passed
    );

    match kind {
        ReportKind::Schedule => render_schedule(&mut output, result),
        ReportKind::Topics => render_topics(&mut output, result),
        _ => render_flags(&mut output, result),
    }

    if !result.insufficient_data.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Insufficient Data");
        for name in &result.insufficient_data {
            let _ = writeln!(output, "- {name}");
        }
    }

    if !result.warnings.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Data Quality");
        for warning in result.warnings.iter().take(WARNING_LIMIT) {
            let _ = write!(output, "- ");
            if let Some(row) = warning.row {
                let _ = write!(output, "row {row}: ");
            }
            if let Some(column) = &warning.column {
                let _ = write!(output, "[{column}] ");
            }
            let _ = writeln!(output, "{}", warning.message);
        }
        let hidden = result.warnings.len().saturating_sub(WARNING_LIMIT);
        if hidden > 0 {
            let _ = writeln!(output, "- ... and {hidden} more");
        }
    }

    output
}

fn render_schedule(output: &mut String, result: &ReportResult) {
    if !result.summary.group_pairs.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Pairs per Group");
        for entry in &result.summary.group_pairs {
            let _ = writeln!(output, "- {}: {} pairs", entry.group, entry.pairs);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Disciplines");

    if result.entities.is_empty() {
        let _ = writeln!(output, "No pairs found.");
        return;
    }

    for entity in &result.entities {
        let pairs = entity.metric(Metric::PairCount).unwrap_or(0.0);
        let _ = writeln!(output, "- {}: {} pairs", entity.name, pairs);
        for occurrence in &entity.occurrences {
            let slot: Vec<&str> = [&occurrence.day, &occurrence.time, &occurrence.group]
                .into_iter()
                .filter_map(|part| part.as_deref())
                .collect();
            if !slot.is_empty() {
                let _ = writeln!(output, "  - {}", slot.join(", "));
            }
        }
    }
}

fn render_topics(output: &mut String, result: &ReportResult) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Topics Not Matching the Format");

    if result.flagged.is_empty() {
        let _ = writeln!(output, "All topics follow the format.");
        return;
    }

    for flag in &result.flagged {
        let text = flag.context.as_deref().unwrap_or(&flag.entity);
        let rows: Vec<String> = result
            .entities
            .iter()
            .find(|entity| entity.name == flag.entity)
            .map(|entity| {
                entity
                    .occurrences
                    .iter()
                    .map(|occurrence| occurrence.row.to_string())
                    .collect()
            })
            .unwrap_or_default();
        let _ = writeln!(output, "- {} (rows {})", text, rows.join(", "));
    }
}

fn render_flags(output: &mut String, result: &ReportResult) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Flagged");

    if result.flagged.is_empty() {
        let _ = writeln!(output, "Nobody crossed a threshold.");
        return;
    }

    for flag in &result.flagged {
        let marker = match flag.severity {
            Severity::Critical => "**critical**",
            Severity::Warning => "warning",
        };
        let value = match (flag.metric, flag.value) {
            (Some(metric), Some(value)) if metric.is_rate() => format!(" {}", percent(value)),
            _ => String::new(),
        };
        let _ = write!(output, "- {} ({marker}{value})", flag.entity);
        if let Some(context) = &flag.context {
            let _ = write!(output, ", {context}");
        }
        let _ = writeln!(output);
        for reason in &flag.reasons {
            let _ = writeln!(output, "  - {reason}");
        }
    }

    let passed: Vec<&str> = result
        .entities
        .iter()
        .filter(|entity| entity.status == EntityStatus::Measured)
        .filter(|entity| !result.flagged.iter().any(|flag| flag.entity == entity.name))
        .map(|entity| entity.name.as_str())
        .collect();
    if !passed.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Within thresholds: {}", passed.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::dataset::{Cell, Dataset};
    use crate::engine::{run, AnalysisOptions};
    use crate::models::{DataQualityWarning, ReportSummary, WarningKind};

    fn text(value: &str) -> Cell {
        Cell::Text(value.to_string())
    }

    fn attendance() -> ReportResult {
        let dataset = Dataset::new(
            vec!["ФИО".to_string(), "Посещаемость".to_string()],
            vec![
                vec![text("Петрова"), text("15%")],
                vec![text("Сидоров"), text("80%")],
                vec![text("Орлов"), Cell::Empty],
            ],
        );
        run(&dataset, ReportKind::Attendance, &AnalysisOptions::default()).unwrap()
    }

    #[test]
    fn flagged_report_lists_severity_and_passing_entities() {
        let markdown = render_markdown(&attendance());

        assert!(markdown.starts_with(&format!("# {}", ReportKind::Attendance.label())));
        assert!(markdown.contains("- Петрова (**critical** 15.0%)"));
        assert!(markdown.contains("Within thresholds: Сидоров"));
        assert!(markdown.contains("## Insufficient Data\n- Орлов"));
    }

    #[test]
    fn warnings_are_capped() {
        let mut result = attendance();
        result.warnings = (0..25)
            .map(|index| DataQualityWarning {
                kind: WarningKind::UnparseableCell,
                row: Some(index + 2),
                column: Some("Посещаемость".to_string()),
                message: "cannot read 'x' as a percentage".to_string(),
            })
            .collect();

        let markdown = render_markdown(&result);
        assert!(markdown.contains("- row 21: [Посещаемость]"));
        assert!(!markdown.contains("- row 22:"));
        assert!(markdown.contains("- ... and 5 more"));
    }

    #[test]
    fn stored_report_carries_its_source() {
        let stored = StoredReport {
            id: Uuid::new_v4(),
            filename: "topics.csv".to_string(),
            created_by: Some("методист".to_string()),
            result: ReportResult {
                report_type: ReportKind::Topics,
                generated_at: Utc::now(),
                period: None,
                columns: Vec::new(),
                summary: ReportSummary::default(),
                entities: Vec::new(),
                flagged: Vec::new(),
                insufficient_data: Vec::new(),
                warnings: Vec::new(),
            },
        };

        let markdown = render_stored(&stored);
        assert!(markdown.contains("Source file: topics.csv"));
        assert!(markdown.contains("Created by: методист"));
        assert!(markdown.contains("All topics follow the format."));
    }
}
