//! Typed tables moved between the staging and curated zones.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

const DATE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y/%m/%d";

/// Columns parsed as timestamps.
pub const DATE_COLUMNS: &[&str] = &["date_de_debut", "date_de_fin"];
/// Columns parsed as floats.
pub const NUMERIC_COLUMNS: &[&str] = &["valeur", "valeur_brute", "taux_de_saisie"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Text(String),
    Float(f64),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Float(v) => write!(f, "{}", v),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    if value.contains(' ') {
        NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT)
    } else {
        chrono::NaiveDate::parse_from_str(value, DATE_FORMAT)
            .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
    }
}

/// Convert a raw CSV cell according to its (normalized) column name.
/// Unparseable dates and numbers become `Null` and are logged.
pub fn convert_value(column: &str, raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if DATE_COLUMNS.contains(&column) {
        return match parse_timestamp(raw) {
            Ok(ts) => Value::Timestamp(ts),
            Err(e) => {
                warn!(column, value = raw, "failed to parse date: {}", e);
                Value::Null
            }
        };
    }
    if NUMERIC_COLUMNS.contains(&column) {
        return match raw.trim().parse::<f64>() {
            Ok(v) => Value::Float(v),
            Err(e) => {
                warn!(column, value = raw, "failed to parse float: {}", e);
                Value::Null
            }
        };
    }
    Value::Text(raw.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in `row`, `Null` when the column is absent.
    pub fn get<'a>(&self, row: &'a [Value], column: &str) -> Option<&'a Value> {
        self.column_index(column).and_then(|i| row.get(i))
    }

    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }
}
