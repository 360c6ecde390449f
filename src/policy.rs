//! Thresholds that decide which aggregated entities need attention.
//!
//! Rates are ratios in [0, 1]; grades are on the 1..5 scale. Every
//! comparison is strict, so a value sitting exactly on a limit passes.

use crate::models::{EntityAggregate, Flag, Metric, ReportKind, Severity};

pub const ATTENDANCE_MIN_RATE: f64 = 0.40;
pub const ATTENDANCE_CRITICAL_RATE: f64 = 0.20;
pub const CHECK_MIN_RATE: f64 = 0.70;
pub const CHECK_CRITICAL_RATE: f64 = 0.50;
pub const SUBMISSION_MIN_RATE: f64 = 0.70;
pub const FAILING_HOMEWORK_AVERAGE: f64 = 1.0;
pub const CLASSWORK_MIN_GRADE: f64 = 3.0;

const EPSILON: f64 = 1e-9;

pub const TOPIC_FORMAT_HINT: &str = "Неверный формат. Ожидается: 'Урок № _. Тема: _'";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    Below(f64),
    Equals(f64),
}

impl Comparison {
    pub fn holds(self, value: f64) -> bool {
        match self {
            Comparison::Below(limit) => value < limit - EPSILON,
            Comparison::Equals(target) => (value - target).abs() <= EPSILON,
        }
    }
}

pub struct Rule {
    pub metric: Metric,
    pub comparison: Comparison,
    /// Band inside the violation that escalates the flag to critical.
    pub critical: Option<Comparison>,
    pub describe: fn(&EntityAggregate, f64) -> String,
}

pub struct Policy {
    pub kind: ReportKind,
    /// Any single rule firing flags the entity.
    pub rules: &'static [Rule],
    /// Flagged entities are listed worst first by this metric.
    pub order_by: Option<Metric>,
    pub name_is_context: bool,
}

pub static POLICIES: &[Policy] = &[
    Policy {
        kind: ReportKind::Schedule,
        rules: &[],
        order_by: None,
        name_is_context: false,
    },
    Policy {
        kind: ReportKind::Topics,
        rules: &[Rule {
            metric: Metric::TopicFormatValid,
            comparison: Comparison::Equals(0.0),
            critical: None,
            describe: |_, _| TOPIC_FORMAT_HINT.to_string(),
        }],
        order_by: None,
        name_is_context: true,
    },
    Policy {
        kind: ReportKind::Students,
        rules: &[
            Rule {
                metric: Metric::HomeworkAverage,
                comparison: Comparison::Equals(FAILING_HOMEWORK_AVERAGE),
                critical: None,
                describe: |_, value| format!("Средняя оценка за ДЗ = {}", grade(value)),
            },
            Rule {
                metric: Metric::ClassworkGrade,
                comparison: Comparison::Below(CLASSWORK_MIN_GRADE),
                critical: None,
                describe: |_, value| format!("Оценка за классную работу = {}", grade(value)),
            },
        ],
        order_by: None,
        name_is_context: false,
    },
    Policy {
        kind: ReportKind::Attendance,
        rules: &[Rule {
            metric: Metric::AttendanceRate,
            comparison: Comparison::Below(ATTENDANCE_MIN_RATE),
            critical: Some(Comparison::Below(ATTENDANCE_CRITICAL_RATE)),
            describe: |_, value| format!("Посещаемость {} при пороге 40%", percent(value)),
        }],
        order_by: Some(Metric::AttendanceRate),
        name_is_context: false,
    },
    Policy {
        kind: ReportKind::HomeworkCheck,
        rules: &[Rule {
            metric: Metric::CheckRate,
            comparison: Comparison::Below(CHECK_MIN_RATE),
            critical: Some(Comparison::Below(CHECK_CRITICAL_RATE)),
            describe: |entity, value| {
                match (entity.metric(Metric::Checked), entity.metric(Metric::Issued)) {
                    (Some(checked), Some(issued)) => format!(
                        "Проверено {} из {} заданий ({})",
                        grade(checked),
                        grade(issued),
                        percent(value)
                    ),
                    _ => format!("Проверено {} заданий", percent(value)),
                }
            },
        }],
        order_by: Some(Metric::CheckRate),
        name_is_context: false,
    },
    Policy {
        kind: ReportKind::HomeworkSubmission,
        rules: &[Rule {
            metric: Metric::SubmissionRate,
            comparison: Comparison::Below(SUBMISSION_MIN_RATE),
            critical: None,
            describe: |_, value| format!("Сдано {} заданий", percent(value)),
        }],
        order_by: Some(Metric::SubmissionRate),
        name_is_context: false,
    },
];

pub fn policy_for(kind: ReportKind) -> Option<&'static Policy> {
    POLICIES.iter().find(|policy| policy.kind == kind)
}

impl Policy {
    /// Flags the entity when any rule holds for a metric it actually has.
    pub fn evaluate(&self, entity: &EntityAggregate) -> Option<Flag> {
        let mut reasons = Vec::new();
        let mut first_hit = None;
        let mut severity = Severity::Warning;

        for rule in self.rules {
            let Some(value) = entity.metric(rule.metric) else {
                continue;
            };
            if !rule.comparison.holds(value) {
                continue;
            }

            if rule.critical.is_some_and(|band| band.holds(value)) {
                severity = Severity::Critical;
            }
            first_hit.get_or_insert((rule.metric, value));
            reasons.push((rule.describe)(entity, value));
        }

        let (metric, value) = first_hit?;
        Some(Flag {
            entity: entity.name.clone(),
            severity,
            reasons,
            metric: Some(metric),
            value: Some(value),
            context: self.name_is_context.then(|| entity.name.clone()),
        })
    }
}

pub fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

fn grade(value: f64) -> String {
    crate::dataset::format_number((value * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::models::EntityStatus;

    fn entity(metrics: &[(Metric, f64)]) -> EntityAggregate {
        EntityAggregate {
            name: "Иванов".to_string(),
            status: EntityStatus::Measured,
            metrics: metrics.iter().copied().collect::<BTreeMap<_, _>>(),
            occurrences: Vec::new(),
        }
    }

    fn flagged(kind: ReportKind, metrics: &[(Metric, f64)]) -> Option<Flag> {
        policy_for(kind).and_then(|policy| policy.evaluate(&entity(metrics)))
    }

    #[test]
    fn every_report_kind_has_a_policy() {
        for kind in ReportKind::ALL {
            assert!(policy_for(kind).is_some(), "{kind}");
        }
    }

    #[test]
    fn attendance_boundary_is_not_flagged() {
        assert!(flagged(ReportKind::Attendance, &[(Metric::AttendanceRate, 0.40)]).is_none());
        assert!(flagged(ReportKind::Attendance, &[(Metric::AttendanceRate, 0.3999)]).is_some());
    }

    #[test]
    fn attendance_below_twenty_percent_is_critical() {
        let flag = flagged(ReportKind::Attendance, &[(Metric::AttendanceRate, 0.15)]).unwrap();
        assert_eq!(flag.severity, Severity::Critical);
        let flag = flagged(ReportKind::Attendance, &[(Metric::AttendanceRate, 0.30)]).unwrap();
        assert_eq!(flag.severity, Severity::Warning);
    }

    #[test]
    fn student_conditions_are_independent() {
        let homework_only = flagged(
            ReportKind::Students,
            &[(Metric::HomeworkAverage, 1.0), (Metric::ClassworkGrade, 4.0)],
        )
        .unwrap();
        assert_eq!(homework_only.reasons.len(), 1);
        assert!(homework_only.reasons[0].contains("ДЗ"));

        assert!(flagged(
            ReportKind::Students,
            &[(Metric::HomeworkAverage, 2.0), (Metric::ClassworkGrade, 3.0)],
        )
        .is_none());

        let both = flagged(
            ReportKind::Students,
            &[(Metric::HomeworkAverage, 1.0), (Metric::ClassworkGrade, 2.0)],
        )
        .unwrap();
        assert_eq!(both.reasons.len(), 2);
    }

    #[test]
    fn missing_metric_never_fires_its_rule() {
        assert!(flagged(ReportKind::Students, &[(Metric::ClassworkGrade, 5.0)]).is_none());
        assert!(flagged(ReportKind::HomeworkCheck, &[]).is_none());
    }

    #[test]
    fn check_rate_message_uses_counts() {
        let flag = flagged(
            ReportKind::HomeworkCheck,
            &[
                (Metric::CheckRate, 0.5),
                (Metric::Checked, 5.0),
                (Metric::Issued, 10.0),
            ],
        )
        .unwrap();
        assert_eq!(flag.reasons, vec!["Проверено 5 из 10 заданий (50.0%)".to_string()]);
        assert_eq!(flag.severity, Severity::Warning);
        assert!(flagged(ReportKind::HomeworkCheck, &[(Metric::CheckRate, 0.70)]).is_none());
    }

    #[test]
    fn schedule_is_descriptive() {
        assert!(flagged(ReportKind::Schedule, &[(Metric::PairCount, 1.0)]).is_none());
    }
}
