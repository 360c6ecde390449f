use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Spreadsheet row number of the first data row (the header is row 1).
pub const FIRST_DATA_ROW: usize = 2;

const DELIMITER_CANDIDATES: [u8; 3] = [b';', b',', b'\t'];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed JSON dataset: {0}")]
    Json(#[from] serde_json::Error),
}

/// A raw spreadsheet cell as handed over by the parsing adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    /// Raw text of the cell, without any normalization.
    pub fn raw_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(text) => Some(text.clone()),
            Cell::Number(value) => Some(format_number(*value)),
        }
    }
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Deserialize)]
struct RawDataset {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Cell>>,
}

impl From<RawDataset> for Dataset {
    fn from(raw: RawDataset) -> Self {
        Dataset::new(raw.columns, raw.rows)
    }
}

/// Column names plus rows of cells. Every row holds exactly one cell per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawDataset")]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
    #[serde(skip_serializing)]
    first_row_number: usize,
}

impl Default for Dataset {
    fn default() -> Self {
        Dataset::new(Vec::new(), Vec::new())
    }
}

impl Dataset {
    pub fn new(mut columns: Vec<String>, mut rows: Vec<Vec<Cell>>) -> Self {
        let width = rows
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(columns.len());
        columns.resize(width, String::new());
        for row in rows.iter_mut() {
            row.resize(width, Cell::Empty);
        }

        Self {
            columns,
            rows,
            first_row_number: FIRST_DATA_ROW,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        &self.rows[row][column]
    }

    /// Spreadsheet row number for a data row index.
    pub fn source_row(&self, index: usize) -> usize {
        self.first_row_number + index
    }

    /// Folds the first data row into the column names, for exports whose
    /// real labels sit one row below a generic header.
    pub fn merge_subheader(&self) -> Dataset {
        let Some((subheader, rest)) = self.rows.split_first() else {
            return self.clone();
        };

        let columns = self
            .columns
            .iter()
            .zip(subheader)
            .map(|(header, cell)| {
                let header = header.trim();
                let below = cell.raw_text().unwrap_or_default();
                let below = below.trim();
                match (header.is_empty(), below.is_empty()) {
                    (_, true) => header.to_string(),
                    (true, false) => below.to_string(),
                    (false, false) => format!("{header} {below}"),
                }
            })
            .collect();

        Dataset {
            columns,
            rows: rest.to_vec(),
            first_row_number: self.first_row_number + 1,
        }
    }

    pub fn from_path(path: &Path, delimiter: Option<u8>) -> Result<Dataset, DatasetError> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let file = std::fs::File::open(path)?;
        if is_json {
            Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
        } else {
            Dataset::from_csv_reader(file, delimiter)
        }
    }

    pub fn from_csv_reader<R: Read>(
        mut reader: R,
        delimiter: Option<u8>,
    ) -> Result<Dataset, DatasetError> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        let content = content.trim_start_matches('\u{feff}');
        let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(content));

        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(content.as_bytes());

        let columns: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let row = record
                .iter()
                .map(|value| {
                    if value.trim().is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(value.to_string())
                    }
                })
                .collect();
            rows.push(row);
        }

        Ok(Dataset::new(columns, rows))
    }
}

fn detect_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or_default();
    DELIMITER_CANDIDATES
        .iter()
        .copied()
        .max_by_key(|candidate| header.bytes().filter(|byte| byte == candidate).count())
        .filter(|candidate| header.as_bytes().contains(candidate))
        .unwrap_or(b',')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_rows_are_padded_to_header_width() {
        let dataset = Dataset::new(
            vec!["ФИО".to_string(), "ДЗ".to_string()],
            vec![vec![Cell::Text("Иванов".to_string())]],
        );
        assert_eq!(dataset.cell(0, 1), &Cell::Empty);
    }

    #[test]
    fn long_rows_extend_the_header() {
        let dataset = Dataset::new(
            vec!["ФИО".to_string()],
            vec![vec![Cell::Text("Иванов".to_string()), Cell::Number(4.0)]],
        );
        assert_eq!(dataset.columns().len(), 2);
        assert_eq!(dataset.columns()[1], "");
    }

    #[test]
    fn json_files_are_loaded_by_extension() {
        let path = std::env::temp_dir().join(format!("college-reports-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"columns": ["ФИО", "ДЗ"], "rows": [["Иванов", 4], ["Петров"]]}"#)
            .unwrap();

        let dataset = Dataset::from_path(&path, None).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(dataset.columns(), &["ФИО", "ДЗ"]);
        assert_eq!(dataset.cell(0, 1), &Cell::Number(4.0));
        assert_eq!(dataset.cell(1, 1), &Cell::Empty);
    }

    #[test]
    fn csv_with_semicolons_is_detected() {
        let input = "\u{feff}ФИО;Посещаемость\nПетрова А.А.;35%\nСидоров;\n";
        let dataset = Dataset::from_csv_reader(input.as_bytes(), None).unwrap();
        assert_eq!(dataset.columns(), &["ФИО", "Посещаемость"]);
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.cell(0, 1), &Cell::Text("35%".to_string()));
        assert_eq!(dataset.cell(1, 1), &Cell::Empty);
    }

    #[test]
    fn json_dataset_accepts_mixed_cells() {
        let json = r#"{"columns": ["ФИО", "ДЗ"], "rows": [["Иванов", 4], ["Петров", null]]}"#;
        let dataset: Dataset = serde_json::from_str(json).unwrap();
        assert_eq!(dataset.cell(0, 1), &Cell::Number(4.0));
        assert_eq!(dataset.cell(1, 1), &Cell::Empty);
        assert_eq!(dataset.source_row(1), 3);
    }

    #[test]
    fn subheader_is_merged_into_column_names() {
        let dataset = Dataset::new(
            vec!["ФИО".to_string(), "Кол1".to_string(), "Кол2".to_string()],
            vec![
                vec![
                    Cell::Empty,
                    Cell::Text("Выдано".to_string()),
                    Cell::Text("Проверено".to_string()),
                ],
                vec![
                    Cell::Text("Орлова".to_string()),
                    Cell::Number(10.0),
                    Cell::Number(5.0),
                ],
            ],
        );

        let merged = dataset.merge_subheader();
        assert_eq!(merged.columns(), &["ФИО", "Кол1 Выдано", "Кол2 Проверено"]);
        assert_eq!(merged.row_count(), 1);
        assert_eq!(merged.source_row(0), 3);
    }
}
