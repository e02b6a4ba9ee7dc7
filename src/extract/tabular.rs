//! CSV and spreadsheet extraction.
//!
//! Tables are rendered as text that a language model can answer questions
//! from without doing arithmetic itself: each rendering leads with row and
//! column counts, per-column totals/averages for numeric columns, value
//! frequencies for categorical columns, and then every data row.
//!
//! On top of the full rendering, CSVs get per-category documents (when
//! large) and a compact financial summary; large Excel sheets are also
//! emitted in fixed row windows so individual rows stay retrievable.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use tracing::{error, info};

use super::ExtractError;
use crate::config::ExtractionConfig;
use crate::models::{DocumentKind, DocumentMetadata, FileKind, SourceDocument, UploadedFile};

/// Categorical columns with at least this many distinct values are not
/// used for grouping.
const MAX_GROUP_CARDINALITY: usize = 20;
/// Values listed per categorical column.
const TOP_VALUES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Numeric,
    Categorical,
}

/// A header row plus string cells. Missing cells are empty strings.
///
/// Column types are decided once for the whole table and carried into
/// row subsets, so a window of a numeric column stays numeric.
#[derive(Debug, Clone)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub column_types: Vec<ColumnType>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows: Vec<Vec<String>> = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .collect();
        let column_types = (0..width)
            .map(|col| infer_column_type(rows.iter().map(|r| r[col].as_str())))
            .collect();
        Self {
            headers,
            rows,
            column_types,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.headers.is_empty()
    }

    /// Rows `[start, end)` with the parent's column types.
    pub fn slice(&self, start: usize, end: usize) -> Table {
        let end = end.min(self.rows.len());
        let start = start.min(end);
        Table {
            headers: self.headers.clone(),
            rows: self.rows[start..end].to_vec(),
            column_types: self.column_types.clone(),
        }
    }

    fn select(&self, indices: &[usize]) -> Table {
        Table {
            headers: self.headers.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            column_types: self.column_types.clone(),
        }
    }

    fn numeric_columns(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.headers.len()).filter(|&c| self.column_types[c] == ColumnType::Numeric)
    }

    fn categorical_columns(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.headers.len()).filter(|&c| self.column_types[c] == ColumnType::Categorical)
    }

    fn column_stats(&self, col: usize) -> Option<NumericStats> {
        NumericStats::collect(self.rows.iter().filter_map(|r| parse_number(&r[col])))
    }

    /// Distinct values with counts, most frequent first; ties keep
    /// first-seen order.
    fn value_counts(&self, col: usize) -> Vec<(String, usize)> {
        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for row in &self.rows {
            let value = row[col].as_str();
            let count = counts.entry(value).or_insert(0);
            if *count == 0 {
                order.push(value.to_string());
            }
            *count += 1;
        }
        let mut out: Vec<(String, usize)> = order
            .into_iter()
            .map(|v| {
                let c = counts[v.as_str()];
                (v, c)
            })
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct NumericStats {
    total: f64,
    count: usize,
    min: f64,
    max: f64,
}

impl NumericStats {
    fn collect(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut stats: Option<NumericStats> = None;
        for v in values {
            stats = Some(match stats {
                None => NumericStats {
                    total: v,
                    count: 1,
                    min: v,
                    max: v,
                },
                Some(s) => NumericStats {
                    total: s.total + v,
                    count: s.count + 1,
                    min: s.min.min(v),
                    max: s.max.max(v),
                },
            });
        }
        stats
    }

    fn mean(&self) -> f64 {
        self.total / self.count as f64
    }
}

/// Parse a cell as a number, tolerating currency symbols, thousands
/// separators, and accounting-style negatives `(1,200.00)`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let mut cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.starts_with('(') && cleaned.ends_with(')') && cleaned.len() > 2 {
        cleaned = format!("-{}", &cleaned[1..cleaned.len() - 1]);
    }
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn infer_column_type<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut saw_value = false;
    for v in values {
        if v.trim().is_empty() {
            continue;
        }
        if parse_number(v).is_none() {
            return ColumnType::Categorical;
        }
        saw_value = true;
    }
    if saw_value {
        ColumnType::Numeric
    } else {
        ColumnType::Categorical
    }
}

/// Render a table in full. Returns an empty string for an empty table.
pub fn table_to_text(table: &Table, title: &str) -> String {
    if table.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        format!("=== {} ===", title),
        format!("Total Rows: {}", table.rows.len()),
        format!("Total Columns: {}", table.headers.len()),
        String::new(),
        format!("COLUMN HEADERS: {}", table.headers.join(" | ")),
        String::new(),
    ];

    let numeric: Vec<usize> = table.numeric_columns().collect();
    if !numeric.is_empty() {
        lines.push("=== NUMERICAL SUMMARY ===".to_string());
        for col in numeric {
            if let Some(s) = table.column_stats(col) {
                lines.push(format!(
                    "{}: TOTAL={:.2}, AVERAGE={:.2}, COUNT={}, MIN={:.2}, MAX={:.2}",
                    table.headers[col],
                    s.total,
                    s.mean(),
                    s.count,
                    s.min,
                    s.max
                ));
            }
        }
        lines.push(String::new());
    }

    let categorical: Vec<usize> = table.categorical_columns().collect();
    if !categorical.is_empty() {
        lines.push("=== CATEGORICAL SUMMARY ===".to_string());
        for col in categorical {
            let counts = table.value_counts(col);
            lines.push(format!("{}: {} unique values", table.headers[col], counts.len()));
            for (value, count) in counts.iter().take(TOP_VALUES) {
                lines.push(format!("  {}: {} occurrences", value, count));
            }
        }
        lines.push(String::new());
    }

    lines.push("=== ALL DATA ROWS ===".to_string());
    for (i, row) in table.rows.iter().enumerate() {
        let cells: Vec<String> = table
            .headers
            .iter()
            .zip(row.iter())
            .map(|(h, v)| format!("{}:{}", h, v))
            .collect();
        lines.push(format!("Row {}: {}", i + 1, cells.join(" | ")));
    }

    lines.join("\n")
}

/// Compact per-column totals for numeric columns, or `None` if there are none.
pub fn financial_summary(table: &Table) -> Option<String> {
    let numeric: Vec<usize> = table.numeric_columns().collect();
    if numeric.is_empty() {
        return None;
    }
    let mut lines = vec!["=== FINANCIAL SUMMARY ===".to_string()];
    for col in numeric {
        if let Some(s) = table.column_stats(col) {
            let name = &table.headers[col];
            lines.push(format!("{} TOTAL: {:.2}", name, s.total));
            lines.push(format!("{} AVERAGE: {:.2}", name, s.mean()));
            lines.push(format!("{} COUNT: {}", name, s.count));
        }
    }
    Some(lines.join("\n"))
}

/// Extract documents from a CSV or Excel upload. Failures become a single
/// error document.
pub fn extract_tabular(file: &UploadedFile, config: &ExtractionConfig) -> Vec<SourceDocument> {
    let result = match file.kind {
        FileKind::Csv => extract_csv(file, config),
        _ => extract_excel(file, config),
    };

    match result {
        Ok(docs) => {
            info!(file = %file.name, documents = docs.len(), "tabular extraction completed");
            docs
        }
        Err(e) => {
            error!(file = %file.name, error = %e, "tabular extraction failed");
            vec![SourceDocument::error(
                &file.name,
                format!("Error extracting Excel/CSV data: {}", e),
                e.to_string(),
            )]
        }
    }
}

fn extract_csv(
    file: &UploadedFile,
    config: &ExtractionConfig,
) -> Result<Vec<SourceDocument>, ExtractError> {
    let table = read_csv(&file.bytes)?;
    info!(
        file = %file.name,
        rows = table.rows.len(),
        columns = table.headers.len(),
        "CSV loaded"
    );

    let mut docs = Vec::new();

    let mut metadata = DocumentMetadata::new(&file.name, DocumentKind::CsvComplete);
    metadata.rows = Some(table.rows.len());
    metadata.columns = Some(table.headers.len());
    docs.push(SourceDocument::new(
        table_to_text(&table, "Complete CSV Dataset"),
        metadata,
    ));

    if table.rows.len() > config.csv_group_threshold {
        docs.extend(group_documents(&file.name, &table));
    }

    if let Some(summary) = financial_summary(&table) {
        docs.push(SourceDocument::new(
            summary,
            DocumentMetadata::new(&file.name, DocumentKind::FinancialSummary),
        ));
    }

    Ok(docs)
}

/// One document per category of the first low-cardinality categorical
/// column, in sorted category order. Singleton groups are skipped.
fn group_documents(source: &str, table: &Table) -> Vec<SourceDocument> {
    let Some((col, groups)) = table.categorical_columns().find_map(|col| {
        let groups = group_rows(table, col);
        (groups.len() < MAX_GROUP_CARDINALITY).then_some((col, groups))
    }) else {
        return Vec::new();
    };

    let column = &table.headers[col];
    groups
        .into_iter()
        .filter(|(_, rows)| rows.len() > 1)
        .map(|(value, rows)| {
            let subset = table.select(&rows);
            let mut metadata = DocumentMetadata::new(source, DocumentKind::CsvGroup);
            metadata.group_column = Some(column.clone());
            metadata.group_value = Some(value.clone());
            metadata.rows = Some(rows.len());
            SourceDocument::new(
                table_to_text(&subset, &format!("Category Group - {}: {}", column, value)),
                metadata,
            )
        })
        .collect()
}

fn group_rows(table: &Table, col: usize) -> Vec<(String, Vec<usize>)> {
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        groups.entry(row[col].as_str()).or_default().push(i);
    }
    let mut groups: Vec<(String, Vec<usize>)> = groups
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));
    groups
}

/// Parse CSV bytes. Records that fail to parse are skipped.
pub fn read_csv(bytes: &[u8]) -> Result<Table, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| header_name(i, h.trim_start_matches('\u{feff}')))
        .collect();

    let width = headers.len();
    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        match record {
            Ok(record) if record.len() <= width => {
                rows.push(record.iter().map(|s| s.trim().to_string()).collect());
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!(skipped, "skipped malformed CSV lines");
    }

    Ok(Table::new(headers, rows))
}

fn extract_excel(
    file: &UploadedFile,
    config: &ExtractionConfig,
) -> Result<Vec<SourceDocument>, ExtractError> {
    let sheets = read_workbook(&file.bytes)?;
    let mut docs = Vec::new();

    for (sheet, table) in sheets {
        info!(
            file = %file.name,
            sheet = %sheet,
            rows = table.rows.len(),
            columns = table.headers.len(),
            "Excel sheet loaded"
        );

        let mut metadata = DocumentMetadata::new(&file.name, DocumentKind::ExcelSheetComplete);
        metadata.sheet = Some(sheet.clone());
        metadata.rows = Some(table.rows.len());
        metadata.columns = Some(table.headers.len());
        docs.push(SourceDocument::new(
            table_to_text(&table, &format!("Excel Sheet: {}", sheet)),
            metadata,
        ));

        if table.rows.len() > config.excel_window_threshold {
            docs.extend(window_documents(&file.name, &sheet, &table, config.excel_window_rows));
        }
    }

    Ok(docs)
}

fn window_documents(source: &str, sheet: &str, table: &Table, window: usize) -> Vec<SourceDocument> {
    (0..table.rows.len())
        .step_by(window)
        .map(|start| {
            let subset = table.slice(start, start + window);
            let first = start + 1;
            let last = start + subset.rows.len();
            let mut metadata = DocumentMetadata::new(source, DocumentKind::ExcelChunk);
            metadata.sheet = Some(sheet.to_string());
            metadata.chunk_start = Some(first);
            metadata.chunk_end = Some(last);
            metadata.rows = Some(subset.rows.len());
            SourceDocument::new(
                table_to_text(&subset, &format!("Sheet {} - Rows {} to {}", sheet, first, last)),
                metadata,
            )
        })
        .collect()
}

/// Read every sheet of a workbook. The first row of each sheet is its header.
pub fn read_workbook(bytes: &[u8]) -> Result<Vec<(String, Table)>, ExtractError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names().to_vec() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ExtractError::Spreadsheet(format!("sheet '{}': {}", name, e)))?;

        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(i, cell)| header_name(i, &cell_to_string(cell)))
                    .collect()
            })
            .unwrap_or_default();
        let data: Vec<Vec<String>> = rows
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();

        sheets.push((name, Table::new(headers, data)));
    }
    Ok(sheets)
}

fn header_name(index: usize, raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        format!("Unnamed: {}", index)
    } else {
        trimmed.to_string()
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{:.0}", f)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{:?}", e),
    }
}
