//! Curated zone: one wide table joining every pollutant on
//! `(code_site, date_de_debut)`, values converted to g/L.

use super::table::{Table, Value};
use super::table_store::TableStore;
use crate::constants::{
    CODE_SITE, CURATED_ALL_VALEUR_TABLE, CURATED_TABLE, CURATED_ZONE, DATE_DE_DEBUT, STAGING_ZONE,
};
use crate::error::Result;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const TOTAL_COLUMN: &str = "total_valeur_particule";
const KEY_COLUMNS: [&str; 2] = [CODE_SITE, DATE_DE_DEBUT];
const DROPPED_COLUMNS: [&str; 2] = ["date_de_fin", "polluant"];

/// Grams per litre for one unit of the given concentration unit.
pub fn unit_factor(unit: &str) -> Option<f64> {
    match unit.trim() {
        "mg-m3" => Some(1e-3),
        // micro sign and greek mu both show up in exports
        "\u{b5}g-m3" | "\u{3bc}g-m3" => Some(1e-6),
        "ng-m3" => Some(1e-9),
        _ => None,
    }
}

fn is_key(column: &str) -> bool {
    KEY_COLUMNS.contains(&column)
}

/// Prepare one staging table for the join: drop rows without a `valeur`,
/// drop `date_de_fin`/`polluant`, prefix the remaining non-key columns with
/// the table name and add the g/L conversions. `None` when nothing is left.
pub fn process_table(table: &Table) -> Option<Table> {
    if let Some(missing) = KEY_COLUMNS.iter().find(|k| table.column_index(k).is_none()) {
        warn!(table = %table.name, "missing key column '{}', skipping", missing);
        return None;
    }

    let valeur = table.column_index("valeur");
    let kept: Vec<usize> = (0..table.columns.len())
        .filter(|&i| !DROPPED_COLUMNS.contains(&table.columns[i].as_str()))
        .collect();
    let prefix = |column: &str| {
        if is_key(column) {
            column.to_string()
        } else {
            format!("{}_{}", table.name, column)
        }
    };

    let mut columns: Vec<String> = kept.iter().map(|&i| prefix(&table.columns[i])).collect();
    let unit = table.column_index("unite_de_mesure");
    let conversions: Vec<usize> = ["valeur", "valeur_brute"]
        .iter()
        .filter_map(|c| table.column_index(c))
        .collect();
    for &i in &conversions {
        columns.push(format!("{}_g_par_L", prefix(&table.columns[i])));
    }

    let mut out = Table::new(table.name.clone(), columns);
    for row in &table.rows {
        if let Some(v) = valeur {
            if row.get(v).map_or(true, Value::is_null) {
                continue;
            }
        }
        let factor = unit
            .and_then(|u| row.get(u))
            .and_then(Value::as_str)
            .and_then(unit_factor);
        let mut values: Vec<Value> = kept
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        for &i in &conversions {
            let converted = match (row.get(i).and_then(Value::as_f64), factor) {
                (Some(v), Some(f)) => Value::Float(v * f),
                _ => Value::Null,
            };
            values.push(converted);
        }
        out.push_row(values);
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

type MergeKey = Vec<(u8, String)>;

fn merge_key(table: &Table, row: &[Value]) -> MergeKey {
    KEY_COLUMNS
        .iter()
        .map(|k| match table.get(row, k) {
            None | Some(Value::Null) => (1, String::new()),
            Some(v) => (0, v.to_string()),
        })
        .collect()
}

/// Full outer join of `tables` on the key columns. Output columns are the
/// keys followed by each table's other columns; rows are sorted by key with
/// missing keys last.
pub fn merge_outer(name: &str, tables: &[Table]) -> Table {
    let mut columns: Vec<String> = KEY_COLUMNS.iter().map(|k| k.to_string()).collect();
    let mut layouts = Vec::with_capacity(tables.len());
    for table in tables {
        let layout: Vec<(usize, usize)> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !is_key(c))
            .map(|(src, c)| {
                columns.push(c.clone());
                (src, columns.len() - 1)
            })
            .collect();
        layouts.push(layout);
    }

    let width = columns.len();
    let mut rows: BTreeMap<MergeKey, Vec<Value>> = BTreeMap::new();
    for (table, layout) in tables.iter().zip(&layouts) {
        for row in &table.rows {
            let merged = rows.entry(merge_key(table, row)).or_insert_with(|| {
                let mut fresh = vec![Value::Null; width];
                for (i, k) in KEY_COLUMNS.iter().enumerate() {
                    fresh[i] = table.get(row, k).cloned().unwrap_or(Value::Null);
                }
                fresh
            });
            for &(src, dst) in layout {
                if merged[dst].is_null() {
                    merged[dst] = row.get(src).cloned().unwrap_or(Value::Null);
                }
            }
        }
    }

    let mut out = Table::new(name, columns);
    out.rows = rows.into_values().collect();
    out
}

fn is_valeur_column(column: &str) -> bool {
    column.ends_with("_valeur")
}

/// Append `total_valeur_particule`: the row sum of every non-null
/// `*_valeur` (type columns excluded) and `*_valeur_brute` value.
pub fn aggregate_valeurs(table: &mut Table) {
    let summed: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            (is_valeur_column(c) && !c.ends_with("_type_de_valeur")) || c.ends_with("_valeur_brute")
        })
        .map(|(i, _)| i)
        .collect();

    table.columns.push(TOTAL_COLUMN.to_string());
    for row in &mut table.rows {
        let total: f64 = summed.iter().filter_map(|&i| row[i].as_f64()).sum();
        row.push(Value::Float(total));
    }
}

/// Rows where every `*_valeur` column holds a value.
pub fn all_valeur_rows(table: &Table, name: &str) -> Table {
    let checked: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| is_valeur_column(c))
        .map(|(i, _)| i)
        .collect();
    if checked.is_empty() {
        warn!("no columns ending with '_valeur' in the curated table");
    }

    let mut out = Table::new(name, table.columns.clone());
    out.rows = table
        .rows
        .iter()
        .filter(|row| !checked.is_empty() && checked.iter().all(|&i| !row[i].is_null()))
        .cloned()
        .collect();
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CuratedReport {
    pub tables_used: Vec<String>,
    pub skipped: Vec<String>,
    pub rows: usize,
    pub all_valeur_rows: usize,
}

pub async fn run_curated_stage(store: &dyn TableStore) -> Result<CuratedReport> {
    let mut report = CuratedReport::default();
    let names = store.list_tables(STAGING_ZONE).await?;
    if names.is_empty() {
        info!("No tables found in the staging zone");
        return Ok(report);
    }

    let mut processed = Vec::new();
    for name in names {
        info!(table = %name, "Processing table");
        let Some(table) = store.get_table(STAGING_ZONE, &name).await? else {
            report.skipped.push(name);
            continue;
        };
        if table.is_empty() {
            info!(table = %name, "Table is empty, skipping");
            report.skipped.push(name);
            continue;
        }
        match process_table(&table) {
            Some(t) => {
                report.tables_used.push(name);
                processed.push(t);
            }
            None => {
                info!(table = %name, "After filtering, table has no rows, skipping");
                report.skipped.push(name);
            }
        }
    }
    if processed.is_empty() {
        info!("No data loaded from any table after filtering");
        return Ok(report);
    }

    let mut curated = merge_outer(CURATED_TABLE, &processed);
    aggregate_valeurs(&mut curated);
    let all_valeur = all_valeur_rows(&curated, CURATED_ALL_VALEUR_TABLE);
    report.rows = curated.len();
    report.all_valeur_rows = all_valeur.len();
    info!(
        rows = report.rows,
        columns = curated.columns.len(),
        all_valeur_rows = report.all_valeur_rows,
        "curated table built"
    );

    store.put_table(CURATED_ZONE, &curated).await?;
    store.put_table(CURATED_ZONE, &all_valeur).await?;
    crate::metrics::pipeline::curated_rows(report.rows);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::table_store::InMemoryTableStore;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn staging(name: &str, rows: Vec<(&str, &str, Option<f64>, &str)>) -> Table {
        let mut t = Table::new(
            name,
            vec![
                "date_de_debut".into(),
                "date_de_fin".into(),
                "code_site".into(),
                "polluant".into(),
                "type_de_valeur".into(),
                "valeur".into(),
                "valeur_brute".into(),
                "unite_de_mesure".into(),
            ],
        );
        for (date, site, v, unit) in rows {
            let v = v.map(Value::Float).unwrap_or(Value::Null);
            t.push_row(vec![
                text(date),
                text("end"),
                text(site),
                text(name),
                text("moyenne"),
                v.clone(),
                v,
                text(unit),
            ]);
        }
        t
    }

    fn approx(v: &Value, expected: f64) -> bool {
        v.as_f64().map_or(false, |x| (x - expected).abs() < 1e-15)
    }

    #[test]
    fn process_filters_prefixes_and_converts() {
        let t = staging(
            "o3",
            vec![
                ("d1", "FR01", Some(40.0), "µg-m3"),
                ("d2", "FR01", None, "µg-m3"),
                ("d3", "FR01", Some(2.0), "ppm"),
            ],
        );
        let out = process_table(&t).unwrap();
        assert_eq!(
            out.columns,
            vec![
                "date_de_debut",
                "code_site",
                "o3_type_de_valeur",
                "o3_valeur",
                "o3_valeur_brute",
                "o3_unite_de_mesure",
                "o3_valeur_g_par_L",
                "o3_valeur_brute_g_par_L",
            ]
        );
        assert_eq!(out.len(), 2);
        assert!(approx(out.get(&out.rows[0], "o3_valeur_g_par_L").unwrap(), 40e-6));
        assert_eq!(out.get(&out.rows[1], "o3_valeur_g_par_L"), Some(&Value::Null));
    }

    #[test]
    fn unit_factors() {
        assert_eq!(unit_factor("mg-m3"), Some(1e-3));
        assert_eq!(unit_factor("\u{3bc}g-m3"), Some(1e-6));
        assert_eq!(unit_factor("ng-m3"), Some(1e-9));
        assert_eq!(unit_factor("ppb"), None);
    }

    #[test]
    fn outer_merge_unions_keys_and_sums() {
        let o3 = process_table(&staging("o3", vec![("d1", "FR01", Some(1.0), "µg-m3")])).unwrap();
        let pm10 = process_table(&staging(
            "pm10",
            vec![("d1", "FR01", Some(2.0), "µg-m3"), ("d2", "FR01", Some(3.0), "µg-m3")],
        ))
        .unwrap();

        let mut merged = merge_outer(CURATED_TABLE, &[o3, pm10]);
        assert_eq!(merged.columns[..2], ["code_site".to_string(), "date_de_debut".to_string()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get(&merged.rows[1], "o3_valeur"), Some(&Value::Null));

        aggregate_valeurs(&mut merged);
        // valeur + valeur_brute for both pollutants
        assert_eq!(merged.get(&merged.rows[0], TOTAL_COLUMN), Some(&Value::Float(6.0)));
        assert_eq!(merged.get(&merged.rows[1], TOTAL_COLUMN), Some(&Value::Float(6.0)));

        let full = all_valeur_rows(&merged, CURATED_ALL_VALEUR_TABLE);
        assert_eq!(full.len(), 1);
        assert_eq!(full.get(&full.rows[0], DATE_DE_DEBUT), Some(&text("d1")));
    }

    #[tokio::test]
    async fn curated_stage_writes_both_tables() {
        let store = InMemoryTableStore::new();
        store
            .put_table(STAGING_ZONE, &staging("o3", vec![("d1", "FR01", Some(1.0), "mg-m3")]))
            .await
            .unwrap();
        store
            .put_table(STAGING_ZONE, &staging("so2", vec![("d1", "FR01", None, "mg-m3")]))
            .await
            .unwrap();

        let report = run_curated_stage(&store).await.unwrap();
        assert_eq!(report.tables_used, vec!["o3".to_string()]);
        assert_eq!(report.skipped, vec!["so2".to_string()]);
        assert_eq!(report.rows, 1);

        let curated = store.get_table(CURATED_ZONE, CURATED_TABLE).await.unwrap().unwrap();
        assert!(curated.columns.contains(&TOTAL_COLUMN.to_string()));
        assert!(store
            .get_table(CURATED_ZONE, CURATED_ALL_VALEUR_TABLE)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn empty_staging_zone_writes_nothing() {
        let store = InMemoryTableStore::new();
        let report = run_curated_stage(&store).await.unwrap();
        assert_eq!(report, CuratedReport::default());
        assert!(store.list_tables(CURATED_ZONE).await.unwrap().is_empty());
    }
}
