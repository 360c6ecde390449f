use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;

/// Semantic meaning of a column, independent of how an export names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Discipline,
    StudyGroup,
    Topic,
    StudentName,
    TeacherName,
    HomeworkGrade,
    ClassworkGrade,
    AttendancePercent,
    CheckPercent,
    IssuedCount,
    CheckedCount,
    SubmissionPercent,
    SubmittedCount,
    AssignedCount,
}

/// Candidate name fragments per role, lowercase, highest priority first.
static CANDIDATES: &[(Role, &[&str])] = &[
    (Role::Discipline, &["дисциплин", "предмет", "discipline", "subject"]),
    (Role::StudyGroup, &["группа", "group"]),
    (Role::Topic, &["тема", "темы", "topic", "урок", "занятие"]),
    (
        Role::StudentName,
        &["фио", "студент", "ученик", "fio", "student", "имя", "name"],
    ),
    (
        Role::TeacherName,
        &["фио", "преподаватель", "учитель", "педагог", "teacher", "name"],
    ),
    (Role::HomeworkGrade, &["домашн", "дз", "homework", "hw"]),
    (
        Role::ClassworkGrade,
        &["классн", "classwork", "class", "на уроке", "работа"],
    ),
    (
        Role::AttendancePercent,
        &["посещаемость", "attendance", "процент", "%"],
    ),
    (
        Role::CheckPercent,
        &[
            "процент проверки",
            "% проверки",
            "check rate",
            "check percent",
            "процент",
        ],
    ),
    (Role::IssuedCount, &["выдано", "выдан", "задано", "issued"]),
    (Role::CheckedCount, &["проверено", "проверен", "оценено", "checked"]),
    (
        Role::SubmissionPercent,
        &[
            "процент выполнения",
            "% дз",
            "процент",
            "percent hw",
            "completion",
            "percentage",
        ],
    ),
    (Role::SubmittedCount, &["сдано", "выполнено", "submitted"]),
    (
        Role::AssignedCount,
        &["задано", "выдано", "всего заданий", "assigned"],
    ),
];

impl Role {
    pub fn patterns(self) -> &'static [&'static str] {
        CANDIDATES
            .iter()
            .find(|(role, _)| *role == self)
            .map(|(_, patterns)| *patterns)
            .unwrap_or(&[])
    }

    /// Whether some candidate pattern occurs in `text`.
    pub fn matches(self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.patterns()
            .iter()
            .any(|pattern| lowered.contains(pattern))
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Discipline => "discipline",
            Role::StudyGroup => "study group",
            Role::Topic => "lesson topic",
            Role::StudentName => "student name",
            Role::TeacherName => "teacher name",
            Role::HomeworkGrade => "homework grade",
            Role::ClassworkGrade => "classwork grade",
            Role::AttendancePercent => "attendance percentage",
            Role::CheckPercent => "homework check percentage",
            Role::IssuedCount => "issued assignments",
            Role::CheckedCount => "checked assignments",
            Role::SubmissionPercent => "homework submission percentage",
            Role::SubmittedCount => "submitted assignments",
            Role::AssignedCount => "assigned assignments",
        }
    }
}

/// Resolves roles against one dataset's header. A column claimed by one
/// role is not offered to the next, so "Домашняя работа" cannot serve as
/// both the homework and the classwork column.
#[derive(Debug, Clone)]
pub struct ColumnResolver {
    lowered: Vec<String>,
    taken: Vec<usize>,
}

impl ColumnResolver {
    pub fn new(columns: &[String]) -> Self {
        Self {
            lowered: columns.iter().map(|name| name.to_lowercase()).collect(),
            taken: Vec::new(),
        }
    }

    pub fn resolve(&mut self, role: Role) -> Option<usize> {
        self.resolve_within(role, 0..self.lowered.len())
    }

    /// Pattern priority first, then column order inside `range`.
    pub fn resolve_within(&mut self, role: Role, range: Range<usize>) -> Option<usize> {
        let end = range.end.min(self.lowered.len());
        let start = range.start.min(end);

        let found = role.patterns().iter().find_map(|pattern| {
            (start..end).find(|index| {
                !self.taken.contains(index) && self.lowered[*index].contains(pattern)
            })
        })?;

        self.taken.push(found);
        Some(found)
    }

    /// Index of the column named `name`, ignoring case. A column whose name
    /// is `name` followed by a merged sub-header label also counts.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        let wanted = name.to_lowercase();
        let exact = self
            .lowered
            .iter()
            .position(|column| column.trim() == wanted);
        exact.or_else(|| {
            self.lowered.iter().position(|column| {
                column
                    .trim()
                    .strip_prefix(wanted.as_str())
                    .is_some_and(|rest| rest.starts_with(char::is_whitespace))
            })
        })
    }
}

pub fn resolve(dataset: &Dataset, role: Role) -> Option<usize> {
    ColumnResolver::new(dataset.columns()).resolve(role)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn pattern_priority_beats_column_position() {
        let dataset = Dataset::new(columns(&["Студент", "ФИО", "ДЗ"]), Vec::new());
        assert_eq!(resolve(&dataset, Role::StudentName), Some(1));
        assert_eq!(resolve(&dataset, Role::StudentName), Some(1));
    }

    #[test]
    fn matching_ignores_case() {
        let dataset = Dataset::new(columns(&["НОМЕР", "посещаемость, %"]), Vec::new());
        assert_eq!(resolve(&dataset, Role::AttendancePercent), Some(1));
    }

    #[test]
    fn missing_role_is_unresolved() {
        let dataset = Dataset::new(columns(&["Номер", "Дата"]), Vec::new());
        assert_eq!(resolve(&dataset, Role::TeacherName), None);
    }

    #[test]
    fn claimed_columns_are_not_reused() {
        let mut resolver = ColumnResolver::new(&columns(&["ФИО", "Домашняя работа"]));
        assert_eq!(resolver.resolve(Role::HomeworkGrade), Some(1));
        assert_eq!(resolver.resolve(Role::ClassworkGrade), None);
    }

    #[test]
    fn resolution_can_be_limited_to_a_window() {
        let mut resolver = ColumnResolver::new(&columns(&[
            "ФИО",
            "Неделя",
            "Выдано",
            "Проверено",
            "Месяц",
            "Выдано",
            "Проверено",
        ]));
        let anchor = resolver.position_of("месяц").unwrap();
        assert_eq!(anchor, 4);
        assert_eq!(resolver.resolve_within(Role::IssuedCount, anchor + 1..anchor + 5), Some(5));
        assert_eq!(resolver.resolve_within(Role::CheckedCount, anchor + 1..anchor + 5), Some(6));
    }

    #[test]
    fn period_column_is_found_under_a_merged_label() {
        let resolver = ColumnResolver::new(&columns(&["ФИО", "Месяцы", "Месяц Выдано", "Проверено"]));
        assert_eq!(resolver.position_of("Месяц"), Some(2));
        assert_eq!(resolver.position_of("Неделя"), None);
    }
}
