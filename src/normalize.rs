use crate::dataset::Cell;

const PLACEHOLDERS: [&str; 7] = ["-", "—", "–", "n/a", "nan", "none", "null"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    /// Stored as a ratio in [0, 1].
    Percentage,
    Text,
}

/// How bare percentage numbers (no `%` sign) are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentScale {
    /// `0.4` means 40%.
    Ratio,
    /// `40` means 40%, and so does `0.4%`.
    Percent,
}

impl PercentScale {
    /// One scale for a whole column: percents as soon as any cell carries a
    /// `%` sign or a value above 1, ratios otherwise.
    pub fn of_column<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> Self {
        let percent = cells.into_iter().any(|cell| match cell {
            Cell::Empty => false,
            Cell::Number(value) => *value > 1.0,
            Cell::Text(text) => {
                text.contains('%') || parse_number(text).is_some_and(|value| value > 1.0)
            }
        });
        if percent {
            PercentScale::Percent
        } else {
            PercentScale::Ratio
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    Number(f64),
    Percentage(f64),
    Text(String),
    Missing,
}

impl NormalizedValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            NormalizedValue::Number(value) | NormalizedValue::Percentage(value) => Some(*value),
            NormalizedValue::Text(_) | NormalizedValue::Missing => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            NormalizedValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, NormalizedValue::Missing)
    }
}

/// A cell that normalized with a data-quality caveat.
#[derive(Debug, Clone, PartialEq)]
pub enum CellIssue {
    Unparseable(String),
    Clamped { raw: f64, to: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub value: NormalizedValue,
    pub issue: Option<CellIssue>,
}

impl Normalized {
    fn clean(value: NormalizedValue) -> Self {
        Self { value, issue: None }
    }

    fn missing() -> Self {
        Self::clean(NormalizedValue::Missing)
    }

    fn unparseable(raw: &str) -> Self {
        Self {
            value: NormalizedValue::Missing,
            issue: Some(CellIssue::Unparseable(raw.trim().to_string())),
        }
    }
}

pub fn normalize(cell: &Cell, kind: ValueKind) -> Normalized {
    match kind {
        ValueKind::Text => normalize_text(cell),
        ValueKind::Number => normalize_number(cell),
        ValueKind::Percentage => {
            normalize_percentage(cell, PercentScale::of_column(std::iter::once(cell)))
        }
    }
}

fn normalize_text(cell: &Cell) -> Normalized {
    match cell.raw_text() {
        Some(text) => {
            let collapsed = collapse_whitespace(&text);
            if collapsed.is_empty() {
                Normalized::missing()
            } else {
                Normalized::clean(NormalizedValue::Text(collapsed))
            }
        }
        None => Normalized::missing(),
    }
}

fn normalize_number(cell: &Cell) -> Normalized {
    match cell {
        Cell::Empty => Normalized::missing(),
        Cell::Number(value) if value.is_finite() => Normalized::clean(NormalizedValue::Number(*value)),
        Cell::Number(value) => Normalized::unparseable(&value.to_string()),
        Cell::Text(text) => {
            if is_blank_or_placeholder(text) {
                return Normalized::missing();
            }
            match parse_number(text) {
                Some(value) => Normalized::clean(NormalizedValue::Number(value)),
                None => Normalized::unparseable(text),
            }
        }
    }
}

/// Percentage as a ratio in [0, 1], reading bare numbers on `scale`.
pub fn normalize_percentage(cell: &Cell, scale: PercentScale) -> Normalized {
    let (raw, explicit_percent) = match cell {
        Cell::Empty => return Normalized::missing(),
        Cell::Number(value) if value.is_finite() => (*value, false),
        Cell::Number(value) => return Normalized::unparseable(&value.to_string()),
        Cell::Text(text) => {
            if is_blank_or_placeholder(text) {
                return Normalized::missing();
            }
            let trimmed = text.trim();
            let explicit_percent = trimmed.contains('%');
            match parse_number(&trimmed.replace('%', "")) {
                Some(value) => (value, explicit_percent),
                None => return Normalized::unparseable(text),
            }
        }
    };

    let ratio = if explicit_percent || scale == PercentScale::Percent {
        raw / 100.0
    } else {
        raw
    };

    let clamped = ratio.clamp(0.0, 1.0);
    Normalized {
        value: NormalizedValue::Percentage(clamped),
        issue: (clamped != ratio).then_some(CellIssue::Clamped { raw, to: clamped }),
    }
}

/// Parses numbers written with decimal comma or point and with space,
/// apostrophe or repeated separators as thousands grouping.
pub fn parse_number(text: &str) -> Option<f64> {
    let compact: String = text
        .trim()
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '\'')
        .collect();
    if compact.is_empty() {
        return None;
    }

    let last_comma = compact.rfind(',');
    let last_point = compact.rfind('.');
    let canonical = match (last_comma, last_point) {
        (Some(comma), Some(point)) if comma > point => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(_), None) if compact.matches(',').count() == 1 => compact.replace(',', "."),
        (Some(_), None) => compact.replace(',', ""),
        (None, Some(_)) if compact.matches('.').count() > 1 => compact.replace('.', ""),
        _ => compact,
    };

    canonical
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Key under which entity names are merged: whitespace-collapsed, lowercase.
pub fn entity_key(name: &str) -> String {
    collapse_whitespace(name).to_lowercase()
}

fn is_blank_or_placeholder(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || PLACEHOLDERS.contains(&trimmed.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Cell {
        Cell::Text(value.to_string())
    }

    #[test]
    fn numbers_accept_decimal_comma_and_grouping() {
        assert_eq!(parse_number("4,5"), Some(4.5));
        assert_eq!(parse_number(" 1 234,5 "), Some(1234.5));
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("1.234,5"), Some(1234.5));
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn empty_cells_are_missing_without_issue() {
        let normalized = normalize(&text("   "), ValueKind::Number);
        assert_eq!(normalized.value, NormalizedValue::Missing);
        assert_eq!(normalized.issue, None);

        let dash = normalize(&text("—"), ValueKind::Percentage);
        assert!(dash.value.is_missing());
        assert_eq!(dash.issue, None);
    }

    #[test]
    fn unparseable_text_is_missing_with_issue() {
        let normalized = normalize(&text("н/я"), ValueKind::Number);
        assert!(normalized.value.is_missing());
        assert_eq!(normalized.issue, Some(CellIssue::Unparseable("н/я".to_string())));
        assert_ne!(normalized.value, NormalizedValue::Number(0.0));
    }

    #[test]
    fn percentages_share_one_ratio_scale() {
        for raw in ["73", "73%", "0.73", "0,73", "73 %"] {
            let normalized = normalize(&text(raw), ValueKind::Percentage);
            let ratio = normalized.value.as_number().unwrap();
            assert!((ratio - 0.73).abs() < 1e-9, "{raw} -> {ratio}");
        }
        assert_eq!(
            normalize(&Cell::Number(40.0), ValueKind::Percentage).value,
            NormalizedValue::Percentage(0.4)
        );
    }

    #[test]
    fn column_scale_applies_to_every_bare_value() {
        let column = [Cell::Number(55.0), Cell::Number(1.0), text("0,5"), Cell::Empty];
        let scale = PercentScale::of_column(&column);
        assert_eq!(scale, PercentScale::Percent);

        let ratios: Vec<Option<f64>> = column
            .iter()
            .map(|cell| normalize_percentage(cell, scale).value.as_number())
            .collect();
        assert_eq!(ratios, vec![Some(0.55), Some(0.01), Some(0.005), None]);
    }

    #[test]
    fn columns_of_small_values_are_ratios() {
        let column = [text("0,4"), Cell::Number(1.0), text("н/д")];
        assert_eq!(PercentScale::of_column(&column), PercentScale::Ratio);
        assert_eq!(PercentScale::of_column(&[text("0,5%")]), PercentScale::Percent);
        assert_eq!(
            normalize_percentage(&text("0,5%"), PercentScale::Ratio).value,
            NormalizedValue::Percentage(0.005)
        );
    }

    #[test]
    fn out_of_range_percentages_are_clamped() {
        let normalized = normalize(&text("140%"), ValueKind::Percentage);
        assert_eq!(normalized.value, NormalizedValue::Percentage(1.0));
        assert_eq!(normalized.issue, Some(CellIssue::Clamped { raw: 140.0, to: 1.0 }));

        let negative = normalize(&Cell::Number(-5.0), ValueKind::Percentage);
        assert_eq!(negative.value, NormalizedValue::Percentage(0.0));
        assert!(negative.issue.is_some());
    }

    #[test]
    fn text_is_trimmed_and_collapsed() {
        let normalized = normalize(&text("  Иванов \n  Иван  "), ValueKind::Text);
        assert_eq!(normalized.value, NormalizedValue::Text("Иванов Иван".to_string()));
        assert!(normalize(&text(" "), ValueKind::Text).value.is_missing());
        assert_eq!(
            normalize(&Cell::Number(5.0), ValueKind::Text).value,
            NormalizedValue::Text("5".to_string())
        );
    }

    #[test]
    fn entity_keys_ignore_case_and_spacing() {
        assert_eq!(entity_key("Иванов  И.И."), entity_key(" иванов и.и. "));
    }
}
