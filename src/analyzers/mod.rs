//! One analyzer, parameterized per report type by a [`Descriptor`].

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use chrono::Utc;
use tracing::{debug, info};

use crate::columns::{ColumnResolver, Role};
use crate::dataset::{Cell, Dataset};
use crate::engine::AnalysisOptions;
use crate::models::{
    DataQualityWarning, EntityAggregate, EntityStatus, GroupPairs, Metric, Occurrence, Period,
    ReportKind, ReportResult, ReportSummary, ResolvedColumn, WarningKind,
};
use crate::normalize::{
    entity_key, normalize, normalize_percentage, CellIssue, Normalized, NormalizedValue,
    PercentScale, ValueKind,
};
use crate::policy::policy_for;

pub mod schedule;
pub mod topics;

/// Names that mark total lines rather than entities.
const SUMMARY_ROW_NAMES: [&str; 5] = ["всего", "итого", "total", "nan", "none"];
const MAX_NAME_CHARS: usize = 100;
/// How many columns after the period column may hold its counts. The period
/// column itself is searched too, for exports where a merged period heading
/// sits over its first count.
const PERIOD_BLOCK_WIDTH: usize = 4;

pub enum Source {
    /// Each row of the entity counts once.
    RowCount,
    /// Format validity of the entity text itself.
    TopicFormat,
    Direct { role: Role, kind: ValueKind },
    /// A direct rate column, or numerator/denominator counts when none resolves.
    RateOrCounts {
        rate: Role,
        numerator: Role,
        denominator: Role,
        totals: Option<(Metric, Metric)>,
    },
}

pub struct MetricSpec {
    pub metric: Metric,
    pub source: Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    None,
    /// Pick the topic column by its content.
    TopicContent,
    /// Read a timetable laid out with one column per weekday.
    WeekdayGrid,
}

pub struct Descriptor {
    pub kind: ReportKind,
    pub entity: Role,
    pub context: Option<Role>,
    pub metrics: &'static [MetricSpec],
    pub fallback: Fallback,
    /// Count columns are looked up after the period column first.
    pub period_scoped: bool,
    /// Entity texts this short are noise, not entities.
    pub min_name_chars: usize,
}

pub static DESCRIPTORS: &[Descriptor] = &[
    Descriptor {
        kind: ReportKind::Schedule,
        entity: Role::Discipline,
        context: Some(Role::StudyGroup),
        metrics: &[MetricSpec {
            metric: Metric::PairCount,
            source: Source::RowCount,
        }],
        fallback: Fallback::WeekdayGrid,
        period_scoped: false,
        min_name_chars: 0,
    },
    Descriptor {
        kind: ReportKind::Topics,
        entity: Role::Topic,
        context: None,
        metrics: &[MetricSpec {
            metric: Metric::TopicFormatValid,
            source: Source::TopicFormat,
        }],
        fallback: Fallback::TopicContent,
        period_scoped: false,
        min_name_chars: 4,
    },
    Descriptor {
        kind: ReportKind::Students,
        entity: Role::StudentName,
        context: None,
        metrics: &[
            MetricSpec {
                metric: Metric::HomeworkAverage,
                source: Source::Direct {
                    role: Role::HomeworkGrade,
                    kind: ValueKind::Number,
                },
            },
            MetricSpec {
                metric: Metric::ClassworkGrade,
                source: Source::Direct {
                    role: Role::ClassworkGrade,
                    kind: ValueKind::Number,
                },
            },
        ],
        fallback: Fallback::None,
        period_scoped: false,
        min_name_chars: 0,
    },
    Descriptor {
        kind: ReportKind::Attendance,
        entity: Role::TeacherName,
        context: None,
        metrics: &[MetricSpec {
            metric: Metric::AttendanceRate,
            source: Source::Direct {
                role: Role::AttendancePercent,
                kind: ValueKind::Percentage,
            },
        }],
        fallback: Fallback::None,
        period_scoped: false,
        min_name_chars: 0,
    },
    Descriptor {
        kind: ReportKind::HomeworkCheck,
        entity: Role::TeacherName,
        context: None,
        metrics: &[MetricSpec {
            metric: Metric::CheckRate,
            source: Source::RateOrCounts {
                rate: Role::CheckPercent,
                numerator: Role::CheckedCount,
                denominator: Role::IssuedCount,
                totals: Some((Metric::Checked, Metric::Issued)),
            },
        }],
        fallback: Fallback::None,
        period_scoped: true,
        min_name_chars: 0,
    },
    Descriptor {
        kind: ReportKind::HomeworkSubmission,
        entity: Role::StudentName,
        context: None,
        metrics: &[MetricSpec {
            metric: Metric::SubmissionRate,
            source: Source::RateOrCounts {
                rate: Role::SubmissionPercent,
                numerator: Role::SubmittedCount,
                denominator: Role::AssignedCount,
                totals: None,
            },
        }],
        fallback: Fallback::None,
        period_scoped: false,
        min_name_chars: 0,
    },
];

pub fn descriptor_for(kind: ReportKind) -> Option<&'static Descriptor> {
    DESCRIPTORS.iter().find(|descriptor| descriptor.kind == kind)
}

impl Descriptor {
    /// Roles whose columns carry measurements rather than names.
    pub fn metric_roles(&self) -> Vec<Role> {
        self.metrics
            .iter()
            .flat_map(|spec| match spec.source {
                Source::RowCount | Source::TopicFormat => Vec::new(),
                Source::Direct { role, .. } => vec![role],
                Source::RateOrCounts {
                    rate,
                    numerator,
                    denominator,
                    ..
                } => vec![rate, numerator, denominator],
            })
            .collect()
    }
}

/// Column-level plan for pulling one metric out of a row.
enum Extractor {
    RowCount,
    TopicFormat,
    Direct { column: usize, kind: ValueKind },
    Percent { column: usize, scale: PercentScale },
    Counts {
        numerator: usize,
        denominator: usize,
        totals: Option<(Metric, Metric)>,
    },
    Unresolved,
}

#[derive(Debug, Clone, Copy)]
enum Tally {
    Count(u64),
    Mean { sum: f64, count: usize },
    Ratio {
        numerator: f64,
        denominator: f64,
        totals: Option<(Metric, Metric)>,
    },
}

impl Tally {
    fn value(self) -> Option<f64> {
        match self {
            Tally::Count(count) => Some(count as f64),
            Tally::Mean { count: 0, .. } => None,
            Tally::Mean { sum, count } => Some(sum / count as f64),
            Tally::Ratio { denominator, .. } if denominator <= 0.0 => None,
            Tally::Ratio {
                numerator,
                denominator,
                ..
            } => Some(numerator / denominator),
        }
    }
}

pub(crate) struct EntityState {
    name: String,
    occurrences: Vec<Occurrence>,
    tallies: BTreeMap<Metric, Tally>,
}

/// Accumulates entities, warnings and statistics for one report run.
pub(crate) struct ReportBuilder {
    kind: ReportKind,
    period: Option<Period>,
    rows_processed: usize,
    skipped_rows: usize,
    columns: Vec<ResolvedColumn>,
    warnings: Vec<DataQualityWarning>,
    order: Vec<String>,
    entities: HashMap<String, EntityState>,
}

impl ReportBuilder {
    pub(crate) fn new(kind: ReportKind, rows_processed: usize) -> Self {
        Self {
            kind,
            period: None,
            rows_processed,
            skipped_rows: 0,
            columns: Vec::new(),
            warnings: Vec::new(),
            order: Vec::new(),
            entities: HashMap::new(),
        }
    }

    pub(crate) fn warn(&mut self, warning: DataQualityWarning) {
        self.warnings.push(warning);
    }

    pub(crate) fn record_column(&mut self, dataset: &Dataset, role: Role, column: Option<usize>) {
        let name = column.map(|index| dataset.columns()[index].clone());
        if name.is_none() {
            self.warn(DataQualityWarning::unresolved(role));
        }
        self.columns.push(ResolvedColumn { role, column: name });
    }

    pub(crate) fn skip_row(&mut self) {
        self.skipped_rows += 1;
    }

    fn cell_issue(&mut self, issue: CellIssue, row: usize, column: &str) {
        let (kind, message) = match issue {
            CellIssue::Unparseable(raw) => (
                WarningKind::UnparseableCell,
                format!("cannot read a value from '{raw}'"),
            ),
            CellIssue::Clamped { raw, to } => (
                WarningKind::ClampedValue,
                format!("value {raw} is out of range, clamped to {to}"),
            ),
        };
        self.warn(DataQualityWarning {
            kind,
            row: Some(row),
            column: Some(column.to_string()),
            message,
        });
    }

    /// Reads a numeric cell, turning any normalization caveat into a warning.
    fn read(&mut self, dataset: &Dataset, index: usize, column: usize, kind: ValueKind) -> Option<f64> {
        let normalized = normalize(dataset.cell(index, column), kind);
        self.accept(dataset, index, column, normalized)
    }

    fn read_percent(
        &mut self,
        dataset: &Dataset,
        index: usize,
        column: usize,
        scale: PercentScale,
    ) -> Option<f64> {
        let normalized = normalize_percentage(dataset.cell(index, column), scale);
        self.accept(dataset, index, column, normalized)
    }

    fn accept(&mut self, dataset: &Dataset, index: usize, column: usize, normalized: Normalized) -> Option<f64> {
        if let Some(issue) = normalized.issue {
            self.cell_issue(issue, dataset.source_row(index), &dataset.columns()[column]);
        }
        normalized.value.as_number()
    }

    /// Registers a sighting of an entity, merging names that differ only in
    /// case or spacing.
    pub(crate) fn entity(&mut self, name: &str, occurrence: Occurrence) -> &mut EntityState {
        let order = &mut self.order;
        let state = self
            .entities
            .entry(entity_key(name))
            .or_insert_with_key(|key| {
                order.push(key.clone());
                EntityState {
                    name: truncate(name),
                    occurrences: Vec::new(),
                    tallies: BTreeMap::new(),
                }
            });
        state.occurrences.push(occurrence);
        state
    }

    pub(crate) fn finish(self) -> ReportResult {
        let policy = policy_for(self.kind);
        let mut entities = Vec::with_capacity(self.order.len());
        let mut flagged = Vec::new();
        let mut insufficient_data = Vec::new();
        let mut total_pairs = None;
        let mut valid_topics = None;
        let mut invalid_topics = None;
        let mut group_pairs: BTreeMap<String, u64> = BTreeMap::new();

        let mut states = self.entities;
        for key in &self.order {
            let Some(state) = states.remove(key) else {
                continue;
            };

            let mut metrics = BTreeMap::new();
            for (metric, tally) in &state.tallies {
                if let Some(value) = tally.value() {
                    metrics.insert(*metric, value);
                }
                if let Tally::Ratio {
                    numerator,
                    denominator,
                    totals: Some((numerator_metric, denominator_metric)),
                } = *tally
                {
                    if denominator > 0.0 {
                        metrics.insert(numerator_metric, numerator);
                        metrics.insert(denominator_metric, denominator);
                    }
                }
            }

            if let Some(pairs) = metrics.get(&Metric::PairCount) {
                *total_pairs.get_or_insert(0) += *pairs as u64;
                for group in state.occurrences.iter().filter_map(|o| o.group.as_ref()) {
                    *group_pairs.entry(group.clone()).or_insert(0) += 1;
                }
            }
            if let Some(valid) = metrics.get(&Metric::TopicFormatValid) {
                let seen = state.occurrences.len() as u64;
                if *valid > 0.0 {
                    *valid_topics.get_or_insert(0) += seen;
                    invalid_topics.get_or_insert(0);
                } else {
                    *invalid_topics.get_or_insert(0) += seen;
                    valid_topics.get_or_insert(0);
                }
            }

            let measured = state.tallies.keys().any(|metric| metrics.contains_key(metric));
            let aggregate = EntityAggregate {
                name: state.name,
                status: if measured {
                    EntityStatus::Measured
                } else {
                    EntityStatus::InsufficientData
                },
                metrics,
                occurrences: state.occurrences,
            };

            if measured {
                if let Some(flag) = policy.and_then(|policy| policy.evaluate(&aggregate)) {
                    flagged.push(flag);
                }
            } else {
                insufficient_data.push(aggregate.name.clone());
            }
            entities.push(aggregate);
        }

        if let Some(metric) = policy.and_then(|policy| policy.order_by) {
            flagged.sort_by(|a, b| {
                let a = if a.metric == Some(metric) { a.value } else { None };
                let b = if b.metric == Some(metric) { b.value } else { None };
                a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let measured = entities.len() - insufficient_data.len();
        let summary = ReportSummary {
            rows_processed: self.rows_processed,
            skipped_rows: self.skipped_rows,
            entities: entities.len(),
            measured,
            insufficient: insufficient_data.len(),
            flagged: flagged.len(),
            passed: measured - flagged.len(),
            total_pairs,
            valid_topics,
            invalid_topics,
            group_pairs: group_pairs
                .into_iter()
                .map(|(group, pairs)| GroupPairs { group, pairs })
                .collect(),
        };

        info!(
            report = %self.kind,
            rows = summary.rows_processed,
            entities = summary.entities,
            flagged = summary.flagged,
            insufficient = summary.insufficient,
            warnings = self.warnings.len(),
            "report analyzed"
        );

        ReportResult {
            report_type: self.kind,
            generated_at: Utc::now(),
            period: self.period,
            columns: self.columns,
            summary,
            entities,
            flagged,
            insufficient_data,
            warnings: self.warnings,
        }
    }
}

impl EntityState {
    pub(crate) fn count(&mut self, metric: Metric) {
        let tally = self.tallies.entry(metric).or_insert(Tally::Count(0));
        if let Tally::Count(count) = tally {
            *count += 1;
        }
    }

    pub(crate) fn sample(&mut self, metric: Metric, value: Option<f64>) {
        let tally = self
            .tallies
            .entry(metric)
            .or_insert(Tally::Mean { sum: 0.0, count: 0 });
        if let (Tally::Mean { sum, count }, Some(value)) = (tally, value) {
            *sum += value;
            *count += 1;
        }
    }

    fn ratio(&mut self, metric: Metric, totals: Option<(Metric, Metric)>, part: Option<(f64, f64)>) {
        let tally = self.tallies.entry(metric).or_insert(Tally::Ratio {
            numerator: 0.0,
            denominator: 0.0,
            totals,
        });
        if let (
            Tally::Ratio {
                numerator,
                denominator,
                ..
            },
            Some((part_numerator, part_denominator)),
        ) = (tally, part)
        {
            *numerator += part_numerator;
            *denominator += part_denominator;
        }
    }
}

pub fn analyze(dataset: &Dataset, descriptor: &Descriptor, options: &AnalysisOptions) -> ReportResult {
    let mut report = ReportBuilder::new(descriptor.kind, dataset.row_count());
    if descriptor.period_scoped {
        report.period = Some(options.period);
    }

    if dataset.is_empty() {
        report.warn(DataQualityWarning {
            kind: WarningKind::EmptyDataset,
            row: None,
            column: None,
            message: "the dataset has no rows".to_string(),
        });
        return report.finish();
    }

    let mut resolver = ColumnResolver::new(dataset.columns());
    let mut entity_column = resolver.resolve(descriptor.entity);
    if entity_column.is_none() {
        match descriptor.fallback {
            Fallback::WeekdayGrid => {
                if let Some(grid) = schedule::WeekdayGrid::detect(dataset, &mut resolver) {
                    return grid.analyze(dataset, report);
                }
            }
            Fallback::TopicContent => {
                entity_column = topics::infer_column(dataset);
                if let Some(column) = entity_column {
                    report.warn(DataQualityWarning {
                        kind: WarningKind::ColumnInferred,
                        row: None,
                        column: Some(dataset.columns()[column].clone()),
                        message: "lesson topic column chosen by its content".to_string(),
                    });
                }
            }
            Fallback::None => {}
        }
    }

    report.record_column(dataset, descriptor.entity, entity_column);
    let Some(entity_column) = entity_column else {
        return report.finish();
    };

    let context_column = descriptor.context.and_then(|role| {
        let column = resolver.resolve(role);
        if column.is_some() {
            report.record_column(dataset, role, column);
        }
        column
    });

    let period_block = if descriptor.period_scoped {
        resolver
            .position_of(options.period.column_name())
            .map(|anchor| anchor..anchor + 1 + PERIOD_BLOCK_WIDTH)
    } else {
        None
    };

    let extractors: Vec<(Metric, Extractor)> = descriptor
        .metrics
        .iter()
        .map(|spec| {
            let extractor = plan(dataset, &mut resolver, &mut report, spec, period_block.clone());
            (spec.metric, extractor)
        })
        .collect();

    let entity_column_name = dataset.columns()[entity_column].clone();
    for (index, row) in dataset.rows().iter().enumerate() {
        let Some(name) = entity_name(&row[entity_column], descriptor.min_name_chars) else {
            report.skip_row();
            continue;
        };

        let group = context_column.and_then(|column| {
            normalize(&row[column], ValueKind::Text)
                .value
                .as_text()
                .map(str::to_string)
        });

        let mut samples = Vec::with_capacity(extractors.len());
        for (metric, extractor) in &extractors {
            let sample = match extractor {
                Extractor::RowCount => Sample::Count,
                Extractor::TopicFormat => Sample::Mean(Some(if topics::is_valid_topic(&name) {
                    1.0
                } else {
                    0.0
                })),
                Extractor::Direct { column, kind } => {
                    Sample::Mean(report.read(dataset, index, *column, *kind))
                }
                Extractor::Percent { column, scale } => {
                    Sample::Mean(report.read_percent(dataset, index, *column, *scale))
                }
                Extractor::Counts {
                    numerator,
                    denominator,
                    totals,
                } => Sample::Ratio(
                    read_counts(dataset, &mut report, index, *numerator, *denominator),
                    *totals,
                ),
                Extractor::Unresolved => Sample::Skip,
            };
            samples.push((*metric, sample));
        }

        let entity = report.entity(
            &name,
            Occurrence {
                row: dataset.source_row(index),
                column: entity_column_name.clone(),
                group,
                day: None,
                time: None,
            },
        );
        for (metric, sample) in samples {
            match sample {
                Sample::Count => entity.count(metric),
                Sample::Mean(value) => entity.sample(metric, value),
                Sample::Ratio(part, totals) => entity.ratio(metric, totals, part),
                Sample::Skip => {}
            }
        }
    }

    report.finish()
}

enum Sample {
    Count,
    Mean(Option<f64>),
    Ratio(Option<(f64, f64)>, Option<(Metric, Metric)>),
    Skip,
}

fn plan(
    dataset: &Dataset,
    resolver: &mut ColumnResolver,
    report: &mut ReportBuilder,
    spec: &MetricSpec,
    period_block: Option<Range<usize>>,
) -> Extractor {
    match spec.source {
        Source::RowCount => Extractor::RowCount,
        Source::TopicFormat => Extractor::TopicFormat,
        Source::Direct { role, kind } => {
            let column = resolver.resolve(role);
            report.record_column(dataset, role, column);
            column.map_or(Extractor::Unresolved, |column| direct(dataset, column, kind))
        }
        Source::RateOrCounts {
            rate,
            numerator,
            denominator,
            totals,
        } => {
            if let Some(column) = resolver.resolve(rate) {
                report.record_column(dataset, rate, Some(column));
                return direct(dataset, column, ValueKind::Percentage);
            }

            let mut find = |role: Role| {
                period_block
                    .clone()
                    .and_then(|block| resolver.resolve_within(role, block))
                    .or_else(|| resolver.resolve(role))
            };
            let denominator_column = find(denominator);
            let numerator_column = find(numerator);
            debug!(
                ?rate,
                ?numerator_column,
                ?denominator_column,
                "no direct rate column, deriving from counts"
            );

            if numerator_column.is_none() || denominator_column.is_none() {
                report.record_column(dataset, rate, None);
            }
            report.record_column(dataset, numerator, numerator_column);
            report.record_column(dataset, denominator, denominator_column);

            match (numerator_column, denominator_column) {
                (Some(numerator), Some(denominator)) => Extractor::Counts {
                    numerator,
                    denominator,
                    totals,
                },
                _ => Extractor::Unresolved,
            }
        }
    }
}

/// Percentage columns settle their scale once, from all of their cells.
fn direct(dataset: &Dataset, column: usize, kind: ValueKind) -> Extractor {
    match kind {
        ValueKind::Percentage => Extractor::Percent {
            column,
            scale: PercentScale::of_column(dataset.rows().iter().map(|row| &row[column])),
        },
        kind => Extractor::Direct { column, kind },
    }
}

/// Reads one row's numerator/denominator pair. Rows whose denominator is
/// absent or zero contribute nothing.
fn read_counts(
    dataset: &Dataset,
    report: &mut ReportBuilder,
    index: usize,
    numerator: usize,
    denominator: usize,
) -> Option<(f64, f64)> {
    let total = report.read(dataset, index, denominator, ValueKind::Number)?;
    let part = report.read(dataset, index, numerator, ValueKind::Number)?;
    if total <= 0.0 {
        return None;
    }

    let clamped = part.clamp(0.0, total);
    if clamped != part {
        report.cell_issue(
            CellIssue::Clamped { raw: part, to: clamped },
            dataset.source_row(index),
            &dataset.columns()[numerator],
        );
    }
    Some((clamped, total))
}

pub(crate) fn entity_name(cell: &Cell, min_chars: usize) -> Option<String> {
    let NormalizedValue::Text(name) = normalize(cell, ValueKind::Text).value else {
        return None;
    };
    let lowered = name.to_lowercase();
    if SUMMARY_ROW_NAMES.contains(&lowered.as_str()) || name.chars().count() < min_chars {
        return None;
    }
    Some(name)
}

fn truncate(name: &str) -> String {
    if name.chars().count() <= MAX_NAME_CHARS {
        return name.to_string();
    }
    let mut short: String = name.chars().take(MAX_NAME_CHARS).collect();
    short.push_str("...");
    short
}
