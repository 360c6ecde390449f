use thiserror::Error;
use tracing::{debug, info};

use crate::analyzers::{analyze, descriptor_for, Descriptor};
use crate::columns;
use crate::dataset::Dataset;
use crate::models::{DataQualityWarning, Period, ReportKind, ReportResult, WarningKind};
use crate::normalize::{normalize, ValueKind};
use crate::store::{NewReport, ReportStore, StoreError, StoredReport};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "unknown report type '{0}', expected one of: schedule, topics, students, attendance, \
         homework_check, homework_submission"
    )]
    UnknownReportType(String),
    #[error("unknown period '{0}', expected month, week or day")]
    UnknownPeriod(String),
    #[error("the dataset has no columns")]
    NoColumns,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub period: Period,
}

/// Runs one report over a dataset. Only structurally invalid requests fail;
/// everything wrong inside the data ends up in the result's warnings.
pub fn run(
    dataset: &Dataset,
    kind: ReportKind,
    options: &AnalysisOptions,
) -> Result<ReportResult, EngineError> {
    if dataset.columns().is_empty() {
        return Err(EngineError::NoColumns);
    }
    let descriptor =
        descriptor_for(kind).ok_or_else(|| EngineError::UnknownReportType(kind.tag().to_string()))?;

    debug!(report = %kind, columns = ?dataset.columns(), rows = dataset.row_count(), "analyzing dataset");

    if has_subheader(dataset, descriptor) {
        let merged = dataset.merge_subheader();
        info!(report = %kind, columns = ?merged.columns(), "merged sub-header row into column names");
        let mut result = analyze(&merged, descriptor, options);
        result.warnings.insert(
            0,
            DataQualityWarning {
                kind: WarningKind::SubheaderMerged,
                row: Some(dataset.source_row(0)),
                column: None,
                message: "first row read as part of the header".to_string(),
            },
        );
        return Ok(result);
    }

    Ok(analyze(dataset, descriptor, options))
}

/// Same as [`run`], for callers holding the report type as a string tag.
pub fn run_tag(
    dataset: &Dataset,
    tag: &str,
    options: &AnalysisOptions,
) -> Result<ReportResult, EngineError> {
    let kind: ReportKind = tag.parse()?;
    run(dataset, kind, options)
}

/// Runs a report and hands the result to the store, once.
pub async fn run_and_store(
    store: &dyn ReportStore,
    dataset: &Dataset,
    kind: ReportKind,
    options: &AnalysisOptions,
    filename: &str,
    created_by: Option<&str>,
) -> Result<StoredReport, EngineError> {
    let result = run(dataset, kind, options)?;
    let report = NewReport {
        filename: filename.to_string(),
        created_by: created_by.map(str::to_string),
        result,
    };
    let id = store.store(&report).await?;
    info!(%id, report = %kind, filename, "report stored");
    Ok(report.into_stored(id))
}

/// A first row made only of labels, at least one naming a measurement the
/// header itself lacks, is a second header line.
fn has_subheader(dataset: &Dataset, descriptor: &Descriptor) -> bool {
    let Some(first) = dataset.rows().first() else {
        return false;
    };

    let numeric = first
        .iter()
        .any(|cell| normalize(cell, ValueKind::Number).value.as_number().is_some());
    if numeric {
        return false;
    }

    descriptor.metric_roles().into_iter().any(|role| {
        columns::resolve(dataset, role).is_none()
            && first
                .iter()
                .filter_map(|cell| cell.raw_text())
                .any(|text| role.matches(&text))
    })
}
