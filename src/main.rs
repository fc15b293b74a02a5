mod config;
mod coverage;
mod dedup;
mod error;
mod geomconv;
mod ingest;
mod mbtiles;
mod merge;
mod model;
mod partition;
mod pipeline;
mod points;
mod scales;
mod storage;
mod tracer;
mod validate;
mod worker;

use clap::Parser;
use log::{error, info};

use config::Args;
#[cfg(not(feature = "s3"))]
use storage::FilesystemStore;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();

    if let Err(e) = run(args).await {
        error!("compose failed: {e:#}");
        std::process::exit(1);
    }
}

/// Top-level orchestration boundary. `ComposeError` converts into
/// `anyhow::Error` automatically; `?` here is the call-site ergonomics the
/// typed taxonomy at `pipeline::run`'s boundary is meant to back onto.
async fn run(args: Args) -> anyhow::Result<()> {
    args.validate()?;

    info!("district={} bucket={}", args.district_id, args.bucket_name);
    info!(
        "poll_interval={}s max_wait={}s max_concurrent_merges={} ingest_concurrency={}",
        args.poll_interval_seconds, args.max_wait_seconds, args.max_concurrent_merges, args.ingest_concurrency
    );

    #[cfg(feature = "s3")]
    let store = storage::s3::S3Store::new(args.bucket_name.clone()).await;
    #[cfg(not(feature = "s3"))]
    let store = FilesystemStore::new(&args.storage_root);

    let result = pipeline::run(&store, &args).await?;

    info!(
        "compose complete in {:?}: charts={} points={} dedup_tally={:?}",
        result.elapsed, result.charts_mbtiles_key, result.points_mbtiles_key, result.dedup_tally
    );
    let summary = serde_json::json!({
        "chartsKey": result.charts_mbtiles_key,
        "pointsKey": result.points_mbtiles_key,
        "dedupTally": result.dedup_tally,
        "elapsedSecs": result.elapsed.as_secs_f64(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
