use std::sync::OnceLock;

use regex::Regex;

use crate::dataset::Dataset;

/// Words that mark a cell as a lesson topic when no header says so.
const TOPIC_KEYWORDS: [&str; 19] = [
    "урок",
    "тема",
    "занятие",
    "лекция",
    "практика",
    "лабораторная",
    "семинар",
    "контрольная",
    "самостоятельная",
    "работа",
    "задание",
    "повторение",
    "изучение",
    "введение",
    "основы",
    "понятие",
    "определение",
    "раздел",
    "глава",
];

fn topic_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)^\s*урок\s*№\s*\d+\s*\.\s*тема\s*:\s*\S.*$")
            .expect("topic pattern is a valid regex")
    })
}

/// `Урок № <number>. Тема: <text>` with a non-empty number and text.
pub fn is_valid_topic(text: &str) -> bool {
    topic_pattern().is_match(text)
}

/// Column holding the most topic-like cells, if any cell looks like a topic.
pub fn infer_column(dataset: &Dataset) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;

    for column in 0..dataset.columns().len() {
        let hits = dataset
            .rows()
            .iter()
            .filter_map(|row| row[column].raw_text())
            .filter(|text| text.trim().chars().count() > 3)
            .filter(|text| {
                let lowered = text.to_lowercase();
                TOPIC_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
            })
            .count();

        if hits > 0 && best.map_or(true, |(_, most)| hits > most) {
            best = Some((column, hits));
        }
    }

    best.map(|(column, _)| column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{analyze, descriptor_for};
    use crate::dataset::Cell;
    use crate::engine::AnalysisOptions;
    use crate::models::{Metric, ReportKind, WarningKind};

    fn text(value: &str) -> Cell {
        Cell::Text(value.to_string())
    }

    #[test]
    fn topic_format_examples() {
        assert!(is_valid_topic("Урок № 5. Тема: Линейные уравнения"));
        assert!(is_valid_topic("урок №12.Тема:Дроби"));
        assert!(!is_valid_topic("Тема: Линейные уравнения"));
        assert!(!is_valid_topic("Урок № . Тема: X"));
        assert!(!is_valid_topic("Урок № 3. Тема:   "));
    }

    #[test]
    fn topic_column_is_found_by_content() {
        let dataset = Dataset::new(
            vec!["Дата".to_string(), "Запись".to_string()],
            vec![
                vec![text("01.09"), text("Урок № 1. Тема: Введение")],
                vec![text("02.09"), text("Лекция о дробях")],
            ],
        );
        assert_eq!(infer_column(&dataset), Some(1));
    }

    #[test]
    fn invalid_topics_are_flagged_with_their_text() {
        let dataset = Dataset::new(
            vec!["Темы".to_string()],
            vec![
                vec![text("Урок № 1. Тема: Введение")],
                vec![text("Тема лекции")],
                vec![text("Тема лекции")],
                vec![text("—")],
            ],
        );

        let descriptor = descriptor_for(ReportKind::Topics).unwrap();
        let result = analyze(&dataset, descriptor, &AnalysisOptions::default());

        assert_eq!(result.summary.valid_topics, Some(1));
        assert_eq!(result.summary.invalid_topics, Some(2));
        assert_eq!(result.flagged.len(), 1);
        assert_eq!(result.flagged[0].context.as_deref(), Some("Тема лекции"));
        assert_eq!(result.entities[0].metric(Metric::TopicFormatValid), Some(1.0));
        assert_eq!(result.entities[1].occurrences.len(), 2);
    }

    #[test]
    fn inferred_topic_column_is_reported() {
        let dataset = Dataset::new(
            vec!["Колонка".to_string()],
            vec![vec![text("Урок № 2. Тема: Дроби")]],
        );

        let descriptor = descriptor_for(ReportKind::Topics).unwrap();
        let result = analyze(&dataset, descriptor, &AnalysisOptions::default());

        assert!(result
            .warnings
            .iter()
            .any(|warning| warning.kind == WarningKind::ColumnInferred));
        assert_eq!(result.summary.valid_topics, Some(1));
        assert!(result.flagged.is_empty());
    }
}
