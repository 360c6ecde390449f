//! Report history: the collaborator that keeps finished reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ReportKind, ReportResult};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("stored report is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unknown report type '{0}' in history")]
    UnknownReportType(String),
}

/// A finished report waiting for an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReport {
    pub filename: String,
    pub created_by: Option<String>,
    pub result: ReportResult,
}

impl NewReport {
    pub fn into_stored(self, id: Uuid) -> StoredReport {
        StoredReport {
            id,
            filename: self.filename,
            created_by: self.created_by,
            result: self.result,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub id: Uuid,
    pub filename: String,
    pub created_by: Option<String>,
    pub result: ReportResult,
}

/// History line for one stored report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub report_type: ReportKind,
    pub report_label: String,
    pub filename: String,
    pub generated_at: DateTime<Utc>,
    pub summary: String,
    pub created_by: Option<String>,
}

impl From<&StoredReport> for HistoryEntry {
    fn from(report: &StoredReport) -> Self {
        Self {
            id: report.id,
            report_type: report.result.report_type,
            report_label: report.result.report_type.label().to_string(),
            filename: report.filename.clone(),
            generated_at: report.result.generated_at,
            summary: report.result.headline(),
            created_by: report.created_by.clone(),
        }
    }
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persists a report and returns its new identifier.
    async fn store(&self, report: &NewReport) -> Result<Uuid, StoreError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<StoredReport>, StoreError>;

    /// Newest first.
    async fn list(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Returns whether a report with this id existed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn store(&self, report: &NewReport) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO college_reports.reports
            (id, report_type, filename, created_by, generated_at, summary, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(report.result.report_type.tag())
        .bind(&report.filename)
        .bind(&report.created_by)
        .bind(report.result.generated_at)
        .bind(report.result.headline())
        .bind(Json(&report.result))
        .execute(&self.pool)
        .await?;

        debug!(%id, "report row inserted");
        Ok(id)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<StoredReport>, StoreError> {
        let row = sqlx::query(
            "SELECT id, filename, created_by, document FROM college_reports.reports WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(StoredReport {
            id: row.try_get("id")?,
            filename: row.try_get("filename")?,
            created_by: row.try_get("created_by")?,
            result: decode_document(row.try_get("document")?)?,
        }))
    }

    async fn list(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, report_type, filename, created_by, generated_at, summary \
             FROM college_reports.reports \
             ORDER BY generated_at DESC \
             LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let tag: String = row.try_get("report_type")?;
            let report_type: ReportKind = tag
                .parse()
                .map_err(|_| StoreError::UnknownReportType(tag.clone()))?;
            summaries.push(HistoryEntry {
                id: row.try_get("id")?,
                report_type,
                report_label: report_type.label().to_string(),
                filename: row.try_get("filename")?,
                generated_at: row.try_get("generated_at")?,
                summary: row.try_get("summary")?,
                created_by: row.try_get("created_by")?,
            });
        }

        Ok(summaries)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM college_reports.reports WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Documents written by an older layout fail here instead of at use.
fn decode_document(document: serde_json::Value) -> Result<ReportResult, StoreError> {
    Ok(serde_json::from_value(document)?)
}

/// Keeps reports in process memory; history is lost on exit.
#[derive(Default)]
pub struct MemoryReportStore {
    reports: RwLock<Vec<StoredReport>>,
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn store(&self, report: &NewReport) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.reports.write().await.push(report.clone().into_stored(id));
        Ok(id)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<StoredReport>, StoreError> {
        let reports = self.reports.read().await;
        Ok(reports.iter().find(|report| report.id == id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let reports = self.reports.read().await;
        let mut newest_first: Vec<&StoredReport> = reports.iter().rev().collect();
        newest_first.sort_by(|a, b| b.result.generated_at.cmp(&a.result.generated_at));
        Ok(newest_first
            .into_iter()
            .take(limit)
            .map(HistoryEntry::from)
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut reports = self.reports.write().await;
        let before = reports.len();
        reports.retain(|report| report.id != id);
        Ok(reports.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::{Flag, ReportSummary, Severity};

    fn result(kind: ReportKind, flagged: usize, age_minutes: i64) -> ReportResult {
        ReportResult {
            report_type: kind,
            generated_at: Utc::now() - Duration::minutes(age_minutes),
            period: None,
            columns: Vec::new(),
            summary: ReportSummary {
                flagged,
                ..ReportSummary::default()
            },
            entities: Vec::new(),
            flagged: (0..flagged)
                .map(|index| Flag {
                    entity: format!("Преподаватель {index}"),
                    severity: Severity::Warning,
                    reasons: Vec::new(),
                    metric: None,
                    value: None,
                    context: None,
                })
                .collect(),
            insufficient_data: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn new_report(kind: ReportKind, flagged: usize, age_minutes: i64) -> NewReport {
        NewReport {
            filename: format!("{kind}.xlsx"),
            created_by: None,
            result: result(kind, flagged, age_minutes),
        }
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let store = MemoryReportStore::default();
        store.store(&new_report(ReportKind::Attendance, 2, 30)).await.unwrap();
        let newest = store.store(&new_report(ReportKind::HomeworkCheck, 1, 0)).await.unwrap();
        store.store(&new_report(ReportKind::Students, 0, 60)).await.unwrap();

        let history = store.list(2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, newest);
        assert_eq!(history[0].summary, "Найдено 1 преподавателей");
        assert_eq!(history[1].report_type, ReportKind::Attendance);
        assert_eq!(history[1].report_label, ReportKind::Attendance.label());
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let store = MemoryReportStore::default();
        let id = store.store(&new_report(ReportKind::Topics, 0, 0)).await.unwrap();

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(store.fetch(id).await.unwrap().is_none());
    }

    #[test]
    fn unreadable_document_is_an_error() {
        let document = serde_json::json!({ "report_type": "attendance", "teachers": [] });
        let err = decode_document(document).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn stored_documents_decode_back() {
        let report = new_report(ReportKind::HomeworkCheck, 2, 0);
        let document = serde_json::to_value(&report.result).unwrap();
        assert_eq!(decode_document(document).unwrap(), report.result);
    }

    #[test]
    fn stored_documents_survive_json() {
        let stored = new_report(ReportKind::Attendance, 1, 0).into_stored(Uuid::new_v4());
        let json = serde_json::to_string(&stored).unwrap();
        let back: StoredReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stored);
    }
}
