use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::columns::Role;
use crate::engine::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Schedule,
    Topics,
    Students,
    Attendance,
    HomeworkCheck,
    HomeworkSubmission,
}

impl ReportKind {
    pub const ALL: [ReportKind; 6] = [
        ReportKind::Schedule,
        ReportKind::Topics,
        ReportKind::Students,
        ReportKind::Attendance,
        ReportKind::HomeworkCheck,
        ReportKind::HomeworkSubmission,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            ReportKind::Schedule => "schedule",
            ReportKind::Topics => "topics",
            ReportKind::Students => "students",
            ReportKind::Attendance => "attendance",
            ReportKind::HomeworkCheck => "homework_check",
            ReportKind::HomeworkSubmission => "homework_submission",
        }
    }

    /// Label shown to staff in report history.
    pub fn label(self) -> &'static str {
        match self {
            ReportKind::Schedule => "Расписание: кол-во пар по дисциплинам",
            ReportKind::Topics => "Темы занятий: проверка формата",
            ReportKind::Students => "Студенты: ДЗ=1 или кл.работа<3",
            ReportKind::Attendance => "Посещаемость: преподаватели <40%",
            ReportKind::HomeworkCheck => "Проверка ДЗ: преподаватели <70%",
            ReportKind::HomeworkSubmission => "Сдача ДЗ: студенты <70%",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ReportKind::Schedule => "Отчет по расписанию групп",
            ReportKind::Topics => "Отчет по темам занятий",
            ReportKind::Students => "Отчет по студентам",
            ReportKind::Attendance => "Отчет по посещаемости",
            ReportKind::HomeworkCheck => "Отчет по проверке домашних заданий",
            ReportKind::HomeworkSubmission => "Отчет по сданным домашним заданиям студентами",
        }
    }

    fn flagged_noun(self) -> &'static str {
        match self {
            ReportKind::Schedule => "пар",
            ReportKind::Topics => "тем",
            ReportKind::Students | ReportKind::HomeworkSubmission => "студентов",
            ReportKind::Attendance | ReportKind::HomeworkCheck => "преподавателей",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ReportKind {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "schedule" => Ok(ReportKind::Schedule),
            "topics" => Ok(ReportKind::Topics),
            "students" => Ok(ReportKind::Students),
            "attendance" => Ok(ReportKind::Attendance),
            "homework_check" | "homework" => Ok(ReportKind::HomeworkCheck),
            "homework_submission" | "student_homework" => Ok(ReportKind::HomeworkSubmission),
            _ => Err(EngineError::UnknownReportType(value.to_string())),
        }
    }
}

/// Reporting window for the homework-check export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    #[default]
    Month,
    Week,
    Day,
}

impl Period {
    /// Name of the column that opens this period's block in the export.
    pub fn column_name(self) -> &'static str {
        match self {
            Period::Month => "Месяц",
            Period::Week => "Неделя",
            Period::Day => "День",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Month => "за месяц",
            Period::Week => "за неделю",
            Period::Day => "за день",
        }
    }
}

impl FromStr for Period {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "month" => Ok(Period::Month),
            "week" => Ok(Period::Week),
            "day" => Ok(Period::Day),
            _ => Err(EngineError::UnknownPeriod(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PairCount,
    TopicFormatValid,
    HomeworkAverage,
    ClassworkGrade,
    AttendanceRate,
    CheckRate,
    SubmissionRate,
    Issued,
    Checked,
}

impl Metric {
    pub fn is_rate(self) -> bool {
        matches!(
            self,
            Metric::AttendanceRate | Metric::CheckRate | Metric::SubmissionRate
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Measured,
    InsufficientData,
}

/// One place in the source where an entity was seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub row: usize,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAggregate {
    pub name: String,
    pub status: EntityStatus,
    pub metrics: BTreeMap<Metric, f64>,
    pub occurrences: Vec<Occurrence>,
}

impl EntityAggregate {
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(&metric).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub entity: String,
    pub severity: Severity,
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    EmptyDataset,
    UnresolvedColumn,
    UnparseableCell,
    ClampedValue,
    SubheaderMerged,
    ColumnInferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityWarning {
    pub kind: WarningKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
}

impl DataQualityWarning {
    pub fn unresolved(role: Role) -> Self {
        Self {
            kind: WarningKind::UnresolvedColumn,
            row: None,
            column: None,
            message: format!("no column found for {}", role.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedColumn {
    pub role: Role,
    pub column: Option<String>,
}

/// Pairs a study group has across the whole timetable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPairs {
    pub group: String,
    pub pairs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub rows_processed: usize,
    pub skipped_rows: usize,
    pub entities: usize,
    pub measured: usize,
    pub insufficient: usize,
    pub flagged: usize,
    pub passed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pairs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_topics: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_topics: Option<u64>,
    /// Schedule only, ordered by group name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_pairs: Vec<GroupPairs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    pub report_type: ReportKind,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    pub columns: Vec<ResolvedColumn>,
    pub summary: ReportSummary,
    pub entities: Vec<EntityAggregate>,
    pub flagged: Vec<Flag>,
    pub insufficient_data: Vec<String>,
    pub warnings: Vec<DataQualityWarning>,
}

impl ReportResult {
    /// One-line summary for history listings.
    pub fn headline(&self) -> String {
        match self.report_type {
            ReportKind::Schedule => {
                format!("Найдено {} пар", self.summary.total_pairs.unwrap_or(0))
            }
            ReportKind::Topics => format!(
                "Верных: {}, неверных: {}",
                self.summary.valid_topics.unwrap_or(0),
                self.summary.invalid_topics.unwrap_or(0)
            ),
            kind => format!("Найдено {} {}", self.summary.flagged, kind.flagged_noun()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tags_round_trip_through_from_str() {
        for kind in ReportKind::ALL {
            assert_eq!(kind.tag().parse::<ReportKind>().unwrap(), kind);
        }
        assert_eq!("homework".parse::<ReportKind>().unwrap(), ReportKind::HomeworkCheck);
    }

    #[test]
    fn unknown_report_tag_is_rejected() {
        let err = "grades".parse::<ReportKind>().unwrap_err();
        assert!(matches!(err, EngineError::UnknownReportType(tag) if tag == "grades"));
    }

    #[test]
    fn periods_parse_case_insensitively() {
        assert_eq!("Week".parse::<Period>().unwrap(), Period::Week);
        assert!("year".parse::<Period>().is_err());
    }
}
