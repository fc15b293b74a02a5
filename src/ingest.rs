//! Ingest: fetch every manifest-listed chart feature file from storage with
//! bounded concurrency, validating each against gate 2.

use std::sync::Arc;

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::error::{ComposeError, Result};
use crate::model::Feature;
use crate::storage::ObjectStore;
use crate::validate::gate_2_ingest;

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "chartIds")]
    chart_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

pub struct IngestedChart {
    pub chart_id: String,
    pub features: Vec<Feature>,
}

/// Pulls the manifest, then every listed chart file, in chart-id lexical
/// order. Files the manifest omits are silently dropped; files the manifest
/// lists but that are missing or malformed are fatal.
pub async fn ingest(
    store: &dyn ObjectStore,
    district: &str,
    concurrency: usize,
) -> Result<Vec<IngestedChart>> {
    let manifest_key = format!("{district}/chart-geojson/_manifest.json");
    let manifest_bytes = store
        .get(&manifest_key)
        .await
        .map_err(|_| ComposeError::Manifest(manifest_key.clone().into()))?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)?;

    let mut chart_ids = manifest.chart_ids;
    chart_ids.sort();
    info!("manifest lists {} charts for district {district}", chart_ids.len());

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let pb = Arc::new(ProgressBar::new(chart_ids.len() as u64));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb.set_message("fetching charts");
    let mut futures = Vec::new();

    for chart_id in chart_ids {
        let semaphore = Arc::clone(&semaphore);
        let pb = Arc::clone(&pb);
        let district = district.to_string();
        futures.push(async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let result = fetch_one(store, &district, chart_id).await;
            pb.inc(1);
            result
        });
    }

    let results = join_all(futures).await;
    pb.finish_with_message("charts fetched");
    let mut charts = Vec::with_capacity(results.len());
    for result in results {
        charts.push(result?);
    }
    charts.sort_by(|a, b| a.chart_id.cmp(&b.chart_id));
    Ok(charts)
}

async fn fetch_one(store: &dyn ObjectStore, district: &str, chart_id: String) -> Result<IngestedChart> {
    let key = format!("{district}/chart-geojson/{chart_id}/{chart_id}.geojson");
    let data = store.get(&key).await?;
    gate_2_ingest(std::path::Path::new(&key), &data)?;
    let mut collection: FeatureCollection = serde_json::from_slice(&data).map_err(|e| {
        warn!("failed to parse {key}: {e}");
        ComposeError::InputValidation { path: key.clone().into(), reason: e.to_string() }
    })?;
    for feature in &mut collection.features {
        feature.chart_id = chart_id.clone();
    }
    Ok(IngestedChart { chart_id, features: collection.features })
}
