use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use datalake_gateway::config::{Config, Polling};
use datalake_gateway::constants::{CURATED_ALL_VALEUR_TABLE, CURATED_TABLE, CURATED_ZONE, STAGING_ZONE};
use datalake_gateway::error::Result as GatewayResult;
use datalake_gateway::pipeline::object_store::{FsObjectStore, ObjectStore};
use datalake_gateway::pipeline::raw::{DownloadStatus, ExportApi};
use datalake_gateway::pipeline::table::Value;
use datalake_gateway::pipeline::table_store::{FsTableStore, TableStore};
use datalake_gateway::pipeline::{
    run_pipeline, Pipeline, RetryPolicy, Stage, Stores, Variant,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Export API double: every site reports for the requested day, PM10 only
/// at FR02.
struct StubGeodair;

#[async_trait]
impl ExportApi for StubGeodair {
    async fn request_export(&self, date: &str, pollutant_code: &str) -> GatewayResult<String> {
        Ok(format!("{}_{}", pollutant_code, date))
    }

    async fn download(&self, file_id: &str) -> GatewayResult<DownloadStatus> {
        let (code, date) = file_id.split_once('_').unwrap_or_default();
        let day = date.replace('-', "/");
        let mut body = String::from(
            "Date de début;Date de fin;Organisme;code site;nom site;Polluant;type de valeur;valeur;valeur brute;unité de mesure;taux de saisie\n",
        );
        let (sites, unit, value) = match code {
            "08" => (vec!["FR01", "FR02"], "µg-m3", "60"),
            _ => (vec!["FR02"], "mg-m3", "0.02"),
        };
        for site in sites {
            body.push_str(&format!(
                "{day} 00:00:00;{day} 01:00:00;AASQA;{site};Site {site};{code};moyenne horaire;{v};{v};{unit};100\n",
                day = day,
                site = site,
                code = code,
                v = value,
                unit = unit
            ));
        }
        Ok(DownloadStatus::Ready(Bytes::from(body)))
    }
}

const CONFIG: &str = r#"
[data_source]
last_n_days = 2

[pipeline]
max_workers = 2
file_workers = 2
batch_size = 1

[[pollutants]]
code = "08"
short_name = "O3"

[[pollutants]]
code = "24"
short_name = "PM10"
"#;

fn pipeline(root: &Path) -> Result<Pipeline> {
    let config = Config::from_toml(CONFIG)?;
    Ok(Pipeline {
        stores: Stores {
            objects: Arc::new(FsObjectStore::new(root.join("object_store"))),
            tables: Arc::new(FsTableStore::new(root.join("warehouse"))),
            bucket: config.object_store.bucket.clone(),
        },
        api: Some(Arc::new(StubGeodair)),
        pollutants: config.pollutants.clone(),
        settings: config.pipeline.clone(),
        polling: Polling {
            initial_delay: Duration::ZERO,
            max_attempts: 1,
            interval: Duration::ZERO,
        },
        last_n_days: config.data_source.last_n_days,
    })
}

const NO_RETRY: RetryPolicy = RetryPolicy {
    retries: 0,
    delay: Duration::ZERO,
};

#[tokio::test]
async fn regular_run_builds_every_zone_on_disk() -> Result<()> {
    let dir = tempdir()?;
    let p = pipeline(dir.path())?;

    let report = run_pipeline(&p, Variant::Regular, &Stage::ALL, NO_RETRY).await;
    assert!(report.succeeded(), "{:?}", report);

    let raw_keys = p.stores.objects.list("raw", "").await?;
    assert_eq!(raw_keys.len(), 4);
    assert!(raw_keys.iter().all(|k| k.ends_with(".csv")));

    let o3 = p.stores.tables.get_table(STAGING_ZONE, "o3").await?.unwrap();
    assert_eq!(o3.len(), 4);
    assert_eq!(o3.get(&o3.rows[0], "taux_de_saisie"), Some(&Value::Float(100.0)));

    let curated = p.stores.tables.get_table(CURATED_ZONE, CURATED_TABLE).await?.unwrap();
    // two days x two sites
    assert_eq!(curated.len(), 4);
    let pm10 = curated.column_index("pm10_valeur_g_par_L").unwrap();
    let with_pm10 = curated.rows.iter().filter(|r| !r[pm10].is_null()).count();
    assert_eq!(with_pm10, 2);

    let all = p
        .stores
        .tables
        .get_table(CURATED_ZONE, CURATED_ALL_VALEUR_TABLE)
        .await?
        .unwrap();
    assert_eq!(all.len(), 2);
    assert!(all
        .rows
        .iter()
        .all(|r| all.get(r, "code_site") == Some(&Value::Text("FR02".into()))));
    Ok(())
}

#[tokio::test]
async fn fast_and_regular_variants_stage_identically() -> Result<()> {
    let regular_dir = tempdir()?;
    let fast_dir = tempdir()?;
    let regular = pipeline(regular_dir.path())?;
    let fast = pipeline(fast_dir.path())?;

    let stages = [Stage::Raw, Stage::Staging];
    assert!(run_pipeline(&regular, Variant::Regular, &stages, NO_RETRY).await.succeeded());
    assert!(run_pipeline(&fast, Variant::Fast, &stages, NO_RETRY).await.succeeded());

    for table in ["o3", "pm10"] {
        assert_eq!(
            regular.stores.tables.get_table(STAGING_ZONE, table).await?,
            fast.stores.tables.get_table(STAGING_ZONE, table).await?
        );
    }
    Ok(())
}

#[tokio::test]
async fn curated_alone_on_empty_warehouse_is_a_no_op() -> Result<()> {
    let dir = tempdir()?;
    let p = pipeline(dir.path())?;
    let report = p.run(Variant::Regular, &[Stage::Curated]).await;
    assert!(report.succeeded());
    assert!(p.stores.tables.list_tables(CURATED_ZONE).await?.is_empty());
    Ok(())
}
