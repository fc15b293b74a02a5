//! Orchestration: ingest -> pass 1 (dedup + coverage indexing) -> pass 2
//! (partition + write per-scale streams and extracted points) -> worker
//! fan-out -> tree-merge -> upload. One function per pipeline stage,
//! called in sequence from `main`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::info;

use crate::config::Args;
use crate::coverage::CoverageIndex;
use crate::dedup::{DedupIndex, FeatureRef};
use crate::error::Result;
use crate::ingest::{self, IngestedChart};
use crate::mbtiles;
use crate::merge::TreeMerger;
use crate::model::Feature;
use crate::partition::{PartitionOutcome, Partitioner};
use crate::points::{PointExtractor, PointSubStream};
use crate::scales;
use crate::storage::ObjectStore;
use crate::tracer::Tracer;
use crate::validate;
use crate::worker::{self, Launcher, SubprocessLauncher, Watcher};

async fn open_writer(path: &std::path::Path) -> Result<tokio::io::BufWriter<tokio::fs::File>> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::File::create(path).await?;
    Ok(tokio::io::BufWriter::new(file))
}

async fn write_line(writer: &mut tokio::io::BufWriter<tokio::fs::File>, feature: &Feature) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    let line = serde_json::to_string(feature)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

pub struct ComposeResult {
    pub charts_mbtiles_key: String,
    pub points_mbtiles_key: String,
    pub dedup_tally: HashMap<&'static str, usize>,
    pub elapsed: std::time::Duration,
}

pub async fn run(store: &dyn ObjectStore, args: &Args) -> Result<ComposeResult> {
    let run_started = Instant::now();
    let tracer = Tracer::from_env_value(args.trace_features.as_deref());

    // Clean stale temp artifacts from a previous attempt before doing any work.
    let temp_prefix = format!("{}/charts/temp/", args.district_id);
    for key in store.list(&temp_prefix).await.unwrap_or_default() {
        store.delete(&key).await.ok();
    }

    let stage_started = Instant::now();
    let charts = ingest::ingest(store, &args.district_id, args.ingest_concurrency).await?;
    info!("ingest: {} charts in {:?}", charts.len(), stage_started.elapsed());

    let (dedup, coverage) = build_indices(&charts, &tracer);
    info!("dedup tally: {:?}", dedup.tally);

    let stage_started = Instant::now();
    let (active_scales, sector_lights, coverage_boundaries) =
        run_pass2(&charts, &dedup, &coverage, args, &tracer).await?;
    info!("pass 2 complete in {:?}", stage_started.elapsed());

    let stage_started = Instant::now();
    let tasks = worker::plan_tasks(&active_scales);
    info!("planned {} worker tasks across {} active scales", tasks.len(), active_scales.len());

    for scale in &active_scales {
        let local = args.work_dir.join(format!("scale_{scale}.geojson"));
        let key = format!("{}/charts/temp/compose/scale_{scale}.geojson", args.district_id);
        let data = tokio::fs::read(&local).await?;
        store.put(&key, &data).await?;
    }

    let launcher = SubprocessLauncher { args: args.clone() };
    for task in &tasks {
        launcher.start(task).await?;
    }

    let output_prefix = format!("{}/charts/temp/compose", args.district_id);
    let watcher = crate::worker::StoragePollWatcher { store, output_prefix };
    let downloaded = watcher.wait(&tasks, args).await?;
    info!("worker fan-out complete in {:?}", stage_started.elapsed());

    let stage_started = Instant::now();
    let merger = Arc::new(TreeMerger::new(args));
    for (task, path) in &downloaded {
        validate::gate_tile_archive(path, "3B").await?;
        let _ = task;
        merger.add(path.clone()).await?;
    }
    let merged_charts_path = merger.finish().await?;
    validate::gate_4_post_merge(&merged_charts_path, 1024).await?;
    info!("tree-merge complete in {:?}", stage_started.elapsed());

    // Points archive: generate soundings / nav-aids sub-streams through the
    // same worker mechanism, then join if both are non-empty.
    let points_path = build_points_archive(store, args, &sector_lights, &coverage_boundaries).await?;

    let charts_key = format!("{}/charts/{}_charts.mbtiles", args.district_id, args.district_label);
    let charts_zip_key = format!("{}.zip", charts_key);
    let charts_bytes = tokio::fs::read(&merged_charts_path).await?;
    store.put(&charts_key, &charts_bytes).await?;
    let zip_name = format!("{}_charts.mbtiles", args.district_label);
    store.put(&charts_zip_key, &mbtiles::zip_single_file(&merged_charts_path, &zip_name)?).await?;
    validate::gate_5_post_upload(store, &charts_key, &merged_charts_path).await?;

    let points_key = format!("{}/charts/points.mbtiles", args.district_id);
    let points_zip_key = format!("{points_key}.zip");
    let points_bytes = tokio::fs::read(&points_path).await?;
    store.put(&points_key, &points_bytes).await?;
    store.put(&points_zip_key, &mbtiles::zip_single_file(&points_path, "points.mbtiles")?).await?;
    validate::gate_5_post_upload(store, &points_key, &points_path).await?;

    // Best-effort cleanup on success.
    for key in store.list(&temp_prefix).await.unwrap_or_default() {
        store.delete(&key).await.ok();
    }
    store.delete(&format!("{}/chart-geojson/_manifest.json", args.district_id)).await.ok();

    tracer.summarize();

    if let Some(url) = &args.metadata_generator_url {
        notify_metadata_generator(url, &args.district_id).await;
    }

    Ok(ComposeResult {
        charts_mbtiles_key: charts_key,
        points_mbtiles_key: points_key,
        dedup_tally: dedup.tally,
        elapsed: run_started.elapsed(),
    })
}

fn build_indices(charts: &[IngestedChart], tracer: &Tracer) -> (DedupIndex, CoverageIndex) {
    let mut dedup = DedupIndex::default();
    let mut coverage = CoverageIndex::default();
    for (chart_index, chart) in charts.iter().enumerate() {
        dedup.ingest_chart(chart_index, &chart.features, tracer);
        coverage.ingest_chart(&chart.features).ok();
    }
    (dedup, coverage)
}

async fn run_pass2(
    charts: &[IngestedChart],
    dedup: &DedupIndex,
    coverage: &CoverageIndex,
    args: &Args,
    tracer: &Tracer,
) -> Result<(Vec<u8>, Vec<crate::points::SectorLightEntry>, HashMap<String, serde_json::Value>)> {
    let partitioner = Partitioner { dedup, coverage, headroom: args.scamin_headroom };
    let mut point_extractor = PointExtractor::new(dedup, coverage, args.scamin_headroom);

    let mut writers: HashMap<u8, tokio::io::BufWriter<tokio::fs::File>> = HashMap::new();
    let mut soundings_writer: Option<tokio::io::BufWriter<tokio::fs::File>> = None;
    let mut nav_aids_writer: Option<tokio::io::BufWriter<tokio::fs::File>> = None;

    for (chart_index, chart) in charts.iter().enumerate() {
        for (feature_index, feature) in chart.features.iter().enumerate() {
            let reference = FeatureRef { chart_index, feature_index };
            let outcome = partitioner.process(feature.clone(), reference, tracer);

            match outcome {
                PartitionOutcome::Dropped => {}
                PartitionOutcome::PointDiverted => {
                    if let Some((substream, point)) = point_extractor.extract(feature.clone(), tracer) {
                        let writer = match substream {
                            PointSubStream::Soundings => {
                                if soundings_writer.is_none() {
                                    soundings_writer =
                                        Some(open_writer(&args.work_dir.join("points_soundings.geojson")).await?);
                                }
                                soundings_writer.as_mut().unwrap()
                            }
                            PointSubStream::NavAids => {
                                if nav_aids_writer.is_none() {
                                    nav_aids_writer =
                                        Some(open_writer(&args.work_dir.join("points_navaids.geojson")).await?);
                                }
                                nav_aids_writer.as_mut().unwrap()
                            }
                        };
                        write_line(writer, &point).await?;
                    }
                }
                PartitionOutcome::ClippedEntirelyInside { gap, filler } => {
                    let scale = feature.scale_num().unwrap();
                    let writer = get_or_open_writer(&mut writers, scale, args).await?;
                    if let Some(g) = gap {
                        write_line(writer, &g).await?;
                    }
                    if let Some(f) = filler {
                        write_line(writer, &f).await?;
                    }
                }
                PartitionOutcome::ClippedPartial { outside, gap, filler } => {
                    let scale = feature.scale_num().unwrap();
                    let writer = get_or_open_writer(&mut writers, scale, args).await?;
                    write_line(writer, &outside).await?;
                    if let Some(g) = gap {
                        write_line(writer, &g).await?;
                    }
                    if let Some(f) = filler {
                        write_line(writer, &f).await?;
                    }
                }
                PartitionOutcome::PartitionedDedup { slices } | PartitionOutcome::PartitionedHint { slices } => {
                    for f in slices {
                        let scale = f.scale_num().unwrap();
                        let writer = get_or_open_writer(&mut writers, scale, args).await?;
                        write_line(writer, &f).await?;
                    }
                }
                PartitionOutcome::SingleScale { feature } => {
                    let scale = feature.scale_num().unwrap();
                    let writer = get_or_open_writer(&mut writers, scale, args).await?;
                    write_line(writer, &feature).await?;
                }
            }
        }
    }

    use tokio::io::AsyncWriteExt;
    let mut active_scales: Vec<u8> = writers.keys().copied().collect();
    active_scales.sort_unstable();
    for writer in writers.values_mut() {
        writer.flush().await?;
    }
    if let Some(w) = soundings_writer.as_mut() {
        w.flush().await?;
    }
    if let Some(w) = nav_aids_writer.as_mut() {
        w.flush().await?;
    }

    let coverage_boundaries = coverage.simplified_geojson_by_scale()?;
    Ok((active_scales, point_extractor.sector_lights, coverage_boundaries))
}

async fn get_or_open_writer<'a>(
    writers: &'a mut HashMap<u8, tokio::io::BufWriter<tokio::fs::File>>,
    scale: u8,
    args: &Args,
) -> Result<&'a mut tokio::io::BufWriter<tokio::fs::File>> {
    if !writers.contains_key(&scale) {
        let path = args.work_dir.join(format!("scale_{scale}.geojson"));
        let writer = open_writer(&path).await?;
        writers.insert(scale, writer);
    }
    Ok(writers.get_mut(&scale).unwrap())
}

/// Feeds the soundings / nav-aids sub-streams to the tile generator as their
/// own worker tasks (keyed by sub-stream name rather than scale), joins the
/// two outputs when both are non-empty, and injects the sector-light and
/// coverage-boundary metadata into the result.
async fn build_points_archive(
    store: &dyn ObjectStore,
    args: &Args,
    sector_lights: &[crate::points::SectorLightEntry],
    coverage_boundaries: &HashMap<String, serde_json::Value>,
) -> Result<PathBuf> {
    let soundings_path = args.work_dir.join("points_soundings.geojson");
    let nav_aids_path = args.work_dir.join("points_navaids.geojson");
    let soundings_exists = tokio::fs::metadata(&soundings_path).await.is_ok();
    let nav_aids_exists = tokio::fs::metadata(&nav_aids_path).await.is_ok();

    let mut outputs = Vec::new();
    for (exists, local_path, remote_name) in [
        (soundings_exists, &soundings_path, "points_soundings"),
        (nav_aids_exists, &nav_aids_path, "points_navaids"),
    ] {
        if !exists {
            continue;
        }
        let upload_key = format!("{}/charts/temp/compose/{remote_name}.geojson", args.district_id);
        let data = tokio::fs::read(local_path).await?;
        store.put(&upload_key, &data).await?;

        let task = worker::Task { scale: 0, zoom_min: 0, zoom_max: scales::MAX_ZOOM };
        let launcher = SubprocessLauncher { args: args.clone() };
        launcher.start(&task).await?;

        let output_key = format!("{}/charts/temp/compose/{remote_name}.mbtiles", args.district_id);
        let watcher_timeout = std::time::Duration::from_secs(args.max_wait_seconds);
        let deadline = tokio::time::Instant::now() + watcher_timeout;
        loop {
            if store.exists(&output_key).await? {
                let data = store.get(&output_key).await?;
                let out_path = args.work_dir.join(format!("{remote_name}.mbtiles"));
                tokio::fs::write(&out_path, &data).await?;
                validate::gate_tile_archive(&out_path, "3B").await?;
                outputs.push(out_path);
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(crate::error::ComposeError::Timeout {
                    waited_secs: args.max_wait_seconds,
                    missing: vec![remote_name.to_string()],
                });
            }
            tokio::time::sleep(std::time::Duration::from_secs(args.poll_interval_seconds)).await;
        }
    }

    let points_path = if outputs.is_empty() {
        args.work_dir.join("points.mbtiles")
    } else if outputs.len() == 1 {
        outputs.into_iter().next().unwrap()
    } else {
        let merger = Arc::new(TreeMerger::new(args));
        for out in outputs {
            merger.add(out).await?;
        }
        merger.finish().await?
    };

    let pool = mbtiles::open_or_create(&points_path).await?;
    mbtiles::inject_point_metadata(&pool, sector_lights, coverage_boundaries).await?;
    Ok(points_path)
}

/// Best-effort completion callback. A failure to reach it is logged but
/// never fails the run.
async fn notify_metadata_generator(url: &str, district_id: &str) {
    let client = reqwest::Client::new();
    let body = serde_json::json!({"districtId": district_id, "status": "complete"});
    if let Err(e) = client.post(url).json(&body).send().await {
        log::warn!("metadata generator callback to {url} failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_scales_sorted() {
        let mut writers: HashMap<u8, usize> = HashMap::new();
        writers.insert(3, 0);
        writers.insert(1, 0);
        let mut scales: Vec<u8> = writers.keys().copied().collect();
        scales.sort_unstable();
        assert_eq!(scales, vec![1, 3]);
    }
}
