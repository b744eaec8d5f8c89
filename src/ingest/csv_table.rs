//! Column-oriented rendering of uploaded CSV files.
//!
//! The output has the shape `{column: {row_index: value}}`. Values are typed
//! per column: integers when every cell is an integer, floats when every
//! non-missing cell is numeric, booleans when every cell is `True`/`False`,
//! strings otherwise. Missing cells render as `null`.

use crate::constants::EMPTY_CSV;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

/// Cell spellings read as missing values.
const NA_VALUES: &[&str] = &[
    "", "#N/A", "#NA", "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

fn is_missing(cell: &str) -> bool {
    NA_VALUES.contains(&cell)
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell {
        "True" | "true" | "TRUE" => Some(true),
        "False" | "false" | "FALSE" => Some(false),
        _ => None,
    }
}

fn parse_finite(cell: &str) -> Option<f64> {
    cell.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn infer_kind(cells: &[Option<&str>]) -> ColumnKind {
    let present: Vec<&str> = cells.iter().flatten().copied().collect();
    let has_missing = present.len() < cells.len();

    if !has_missing && !present.is_empty() && present.iter().all(|c| c.parse::<i64>().is_ok()) {
        return ColumnKind::Int;
    }
    if !has_missing && !present.is_empty() && present.iter().all(|c| parse_bool(c).is_some()) {
        return ColumnKind::Bool;
    }
    if present.iter().all(|c| parse_finite(c).is_some()) {
        return ColumnKind::Float;
    }
    ColumnKind::Text
}

fn render(kind: ColumnKind, cell: Option<&str>) -> Value {
    let Some(cell) = cell else {
        return Value::Null;
    };
    match kind {
        ColumnKind::Int => cell
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(cell.to_string())),
        ColumnKind::Float => parse_finite(cell)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ColumnKind::Bool => parse_bool(cell).map(Value::Bool).unwrap_or(Value::Null),
        ColumnKind::Text => Value::String(cell.to_string()),
    }
}

/// Repeated header names get a `.1`, `.2`, ... suffix.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|h| {
            let n = counts.entry(h.clone()).or_insert(0);
            let name = if *n == 0 { h.clone() } else { format!("{}.{}", h, n) };
            *n += 1;
            name
        })
        .collect()
}

/// Parse comma-separated CSV bytes into the column-oriented JSON table.
pub fn parse_csv_table(bytes: &[u8]) -> Result<Value, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("'utf-8' codec can't decode: {}", e))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if text.trim().is_empty() {
        return Err(EMPTY_CSV.to_string());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let headers = dedupe_headers(headers);
    let width = headers.len();

    let mut records = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| e.to_string())?;
        if record.len() > width {
            return Err(format!(
                "Error tokenizing data. Expected {} fields in line {}, saw {}",
                width,
                idx + 2,
                record.len()
            ));
        }
        // A blank line between records is not a row
        if record.len() == 1 && record.get(0) == Some("") && width > 1 {
            continue;
        }
        records.push(record);
    }

    let mut table = Map::new();
    for (col_idx, name) in headers.iter().enumerate() {
        let cells: Vec<Option<&str>> = records
            .iter()
            .map(|r| r.get(col_idx).filter(|c| !is_missing(c)))
            .collect();
        let kind = infer_kind(&cells);
        let column: Map<String, Value> = cells
            .iter()
            .enumerate()
            .map(|(row, cell)| (row.to_string(), render(kind, *cell)))
            .collect();
        table.insert(name.clone(), Value::Object(column));
    }
    Ok(Value::Object(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_columns_by_row_index() {
        let table = parse_csv_table(b"city,population,area\nParis,2100000,105.4\nLyon,520000,47.87\n").unwrap();
        assert_eq!(
            table,
            json!({
                "city": {"0": "Paris", "1": "Lyon"},
                "population": {"0": 2100000, "1": 520000},
                "area": {"0": 105.4, "1": 47.87}
            })
        );
    }

    #[test]
    fn integer_column_with_gap_becomes_float() {
        let table = parse_csv_table(b"id,score\n1,10\n2,\n3,7\n").unwrap();
        assert_eq!(table["id"], json!({"0": 1, "1": 2, "2": 3}));
        assert_eq!(table["score"], json!({"0": 10.0, "1": null, "2": 7.0}));
    }

    #[test]
    fn booleans_and_missing_markers() {
        let table = parse_csv_table(b"flag,note\nTrue,NA\nFalse,ok\n").unwrap();
        assert_eq!(table["flag"], json!({"0": true, "1": false}));
        assert_eq!(table["note"], json!({"0": null, "1": "ok"}));
    }

    #[test]
    fn short_rows_are_padded_long_rows_fail() {
        let table = parse_csv_table(b"a,b\n1\n2,3\n").unwrap();
        assert_eq!(table["b"], json!({"0": null, "1": 3.0}));

        let err = parse_csv_table(b"a,b\n1,2,3\n").unwrap_err();
        assert!(err.contains("Expected 2 fields in line 2, saw 3"), "{}", err);
    }

    #[test]
    fn empty_and_header_only_files() {
        assert_eq!(parse_csv_table(b"").unwrap_err(), EMPTY_CSV);
        assert_eq!(parse_csv_table(b"\n\n").unwrap_err(), EMPTY_CSV);
        assert_eq!(parse_csv_table(b"a,b\n").unwrap(), json!({"a": {}, "b": {}}));
    }

    #[test]
    fn duplicate_headers_are_suffixed() {
        let table = parse_csv_table(b"x,x,y\n1,2,3\n").unwrap();
        assert_eq!(table["x"], json!({"0": 1}));
        assert_eq!(table["x.1"], json!({"0": 2}));
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let err = parse_csv_table(&[0x61, 0x0a, 0xff, 0xfe]).unwrap_err();
        assert!(err.contains("utf-8"));
    }

    #[test]
    fn bom_is_ignored() {
        let table = parse_csv_table("\u{feff}name\nÉlodie\n".as_bytes()).unwrap();
        assert_eq!(table["name"], json!({"0": "Élodie"}));
    }
}
