//! Warehouse port for the staging and curated zones. A zone holds named
//! tables; the filesystem adapter keeps each one as
//! `{root}/{zone}/{name}.json`.

use super::table::{Table, Value};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Replace `table` in `zone`.
    async fn put_table(&self, zone: &str, table: &Table) -> Result<()>;
    async fn get_table(&self, zone: &str, name: &str) -> Result<Option<Table>>;
    /// Table names in `zone`, sorted.
    async fn list_tables(&self, zone: &str) -> Result<Vec<String>>;

    /// Insert the rows of `incoming` whose `key` is not already present.
    /// Returns how many rows were inserted.
    async fn insert_if_absent(&self, zone: &str, incoming: &Table, key: &[&str]) -> Result<usize> {
        let mut table = match self.get_table(zone, &incoming.name).await? {
            Some(existing) => {
                if existing.columns != incoming.columns {
                    return Err(GatewayError::Storage(format!(
                        "table '{}.{}' has columns {:?}, cannot insert {:?}",
                        zone, incoming.name, existing.columns, incoming.columns
                    )));
                }
                existing
            }
            None => Table::new(incoming.name.clone(), incoming.columns.clone()),
        };

        let key_idx = key
            .iter()
            .map(|k| {
                table.column_index(k).ok_or_else(|| {
                    GatewayError::Storage(format!("table '{}' has no key column '{}'", table.name, k))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let key_of = |row: &[Value]| -> String {
            key_idx
                .iter()
                .map(|&i| row.get(i).map(|v| v.to_string()).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\u{1f}")
        };

        let mut seen: HashSet<String> = table.rows.iter().map(|r| key_of(r.as_slice())).collect();
        let mut inserted = 0;
        for row in &incoming.rows {
            if seen.insert(key_of(row.as_slice())) {
                table.push_row(row.clone());
                inserted += 1;
            }
        }
        self.put_table(zone, &table).await?;
        Ok(inserted)
    }
}

fn check_name(name: &str) -> Result<()> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(GatewayError::Storage(format!("invalid table name '{}'", name)))
    }
}

pub struct FsTableStore {
    root: PathBuf,
}

impl FsTableStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn table_path(&self, zone: &str, name: &str) -> Result<PathBuf> {
        check_name(zone)?;
        check_name(name)?;
        Ok(self.root.join(zone).join(format!("{}.json", name)))
    }
}

#[async_trait]
impl TableStore for FsTableStore {
    async fn put_table(&self, zone: &str, table: &Table) -> Result<()> {
        let path = self.table_path(zone, &table.name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec(table)?;
        // Write-then-rename so readers never see a torn table
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(zone, table = %table.name, rows = table.len(), "table written");
        Ok(())
    }

    async fn get_table(&self, zone: &str, name: &str) -> Result<Option<Table>> {
        let path = self.table_path(zone, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_tables(&self, zone: &str) -> Result<Vec<String>> {
        check_name(zone)?;
        let dir = self.root.join(zone);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[derive(Default)]
pub struct InMemoryTableStore {
    tables: RwLock<BTreeMap<(String, String), Table>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn put_table(&self, zone: &str, table: &Table) -> Result<()> {
        check_name(&table.name)?;
        self.tables
            .write()
            .await
            .insert((zone.to_string(), table.name.clone()), table.clone());
        Ok(())
    }

    async fn get_table(&self, zone: &str, name: &str) -> Result<Option<Table>> {
        Ok(self
            .tables
            .read()
            .await
            .get(&(zone.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_tables(&self, zone: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .read()
            .await
            .keys()
            .filter(|(z, _)| z == zone)
            .map(|(_, n)| n.clone())
            .collect())
    }
}
