use std::sync::OnceLock;

use regex::Regex;

use crate::columns::{ColumnResolver, Role};
use crate::dataset::{Cell, Dataset};
use crate::models::{DataQualityWarning, Metric, Occurrence, ReportResult, WarningKind};
use crate::normalize::collapse_whitespace;

use super::{entity_name, ReportBuilder};

const WEEKDAYS: [(&str, &str); 7] = [
    ("понедельник", "Понедельник"),
    ("вторник", "Вторник"),
    ("среда", "Среда"),
    ("четверг", "Четверг"),
    ("пятница", "Пятница"),
    ("суббота", "Суббота"),
    ("воскресенье", "Воскресенье"),
];

fn subject_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)предмет:\s*(.+?)\s*(?:\n|\\n|$)").expect("subject pattern is a valid regex")
    })
}

/// Timetable with one column per weekday, each non-empty cell being one pair.
pub(crate) struct WeekdayGrid {
    group: Option<usize>,
    /// (column, weekday index) in column order.
    days: Vec<(usize, usize)>,
}

struct Pair {
    weekday: usize,
    minutes: Option<u32>,
    subject: String,
    occurrence: Occurrence,
}

impl WeekdayGrid {
    pub(crate) fn detect(dataset: &Dataset, resolver: &mut ColumnResolver) -> Option<Self> {
        let days: Vec<(usize, usize)> = dataset
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(column, name)| {
                let lowered = name.to_lowercase();
                WEEKDAYS
                    .iter()
                    .position(|(day, _)| lowered.contains(day))
                    .map(|weekday| (column, weekday))
            })
            .collect();

        if days.is_empty() {
            return None;
        }

        Some(Self {
            group: resolver.resolve(Role::StudyGroup),
            days,
        })
    }

    pub(crate) fn analyze(self, dataset: &Dataset, mut report: ReportBuilder) -> ReportResult {
        report.warn(DataQualityWarning {
            kind: WarningKind::ColumnInferred,
            row: None,
            column: None,
            message: format!(
                "no discipline column, reading {} weekday columns as a timetable",
                self.days.len()
            ),
        });
        report.record_column(dataset, Role::StudyGroup, self.group);

        let mut pairs = Vec::new();
        for (index, row) in dataset.rows().iter().enumerate() {
            let group = match self.group {
                Some(column) => match entity_name(&row[column], 0) {
                    Some(group) => Some(group),
                    None => {
                        report.skip_row();
                        continue;
                    }
                },
                None => None,
            };

            for &(column, weekday) in &self.days {
                let Some(subject) = row[column].raw_text().and_then(|raw| subject_of(&raw)) else {
                    continue;
                };
                let time = self.time_before(row, column);
                pairs.push(Pair {
                    weekday,
                    minutes: time.as_deref().and_then(parse_time),
                    subject,
                    occurrence: Occurrence {
                        row: dataset.source_row(index),
                        column: dataset.columns()[column].clone(),
                        group: group.clone(),
                        day: Some(WEEKDAYS[weekday].1.to_string()),
                        time,
                    },
                });
            }
        }

        // Disciplines are listed in the order of their first pair in the week.
        pairs.sort_by_key(|pair| {
            (
                pair.weekday,
                pair.minutes.unwrap_or(u32::MAX),
                pair.occurrence.row,
            )
        });
        for pair in pairs {
            report
                .entity(&pair.subject, pair.occurrence)
                .count(Metric::PairCount);
        }

        report.finish()
    }

    /// Time of the pair: the nearest non-weekday column to the left that
    /// holds something like `09:00`.
    fn time_before(&self, row: &[Cell], column: usize) -> Option<String> {
        (0..column)
            .rev()
            .filter(|candidate| !self.days.iter().any(|(day, _)| day == candidate))
            .find_map(|candidate| {
                let text = row[candidate].raw_text()?;
                let text = text.trim();
                parse_time(text).map(|_| text.to_string())
            })
    }
}

/// The discipline named in a timetable cell: the `Предмет:` line when
/// present, otherwise the first line.
pub fn subject_of(cell: &str) -> Option<String> {
    let subject = match subject_pattern().captures(cell) {
        Some(captures) => captures.get(1).map(|m| m.as_str()).unwrap_or_default(),
        None => cell.lines().next().unwrap_or_default(),
    };
    let subject = collapse_whitespace(subject);
    (!subject.is_empty()).then_some(subject)
}

/// Minutes since midnight for `H:MM` or `HH:MM`, optionally followed by a
/// range end (`09:00-10:30`).
fn parse_time(text: &str) -> Option<u32> {
    let start = text.split(['-', '–', '—']).next()?.trim();
    let (hours, minutes) = start.split_once(':')?;
    let hours: u32 = hours.trim().parse().ok()?;
    let minutes: u32 = minutes.trim().get(..2)?.parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}
