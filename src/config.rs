use std::path::PathBuf;

use clap::Parser;

/// Compose-core configuration, sourced from CLI flags or environment
/// variables: every tunable is `clap`-derived and env-bindable so the same
/// binary runs unmodified under an external orchestrator or by hand in a
/// terminal.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Compose per-scale ENC feature streams into a unified tile archive")]
pub struct Args {
    /// District identifier; determines the storage prefix for this run.
    #[arg(long, env = "DISTRICT_ID")]
    pub district_id: String,

    /// Human-readable label used in output filenames (`{label}_charts.mbtiles`).
    #[arg(long, env = "DISTRICT_LABEL")]
    pub district_label: String,

    /// Storage bucket (or, for the filesystem backend, a root directory).
    #[arg(long, env = "BUCKET_NAME")]
    pub bucket_name: String,

    /// Root directory for the filesystem-backed `ObjectStore`. Ignored when
    /// the `s3` feature is compiled in and an S3 bucket is used instead.
    #[arg(long, env = "STORAGE_ROOT", default_value = "./storage")]
    pub storage_root: PathBuf,

    /// Local scratch directory for intermediate per-scale streams and worker I/O.
    #[arg(long, env = "WORK_DIR", default_value = "./work")]
    pub work_dir: PathBuf,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// JSON array of property matchers, or a comma-separated feature-name
    /// list, turning on per-feature decision tracing.
    #[arg(long, env = "TRACE_FEATURES")]
    pub trace_features: Option<String>,

    /// Optional best-effort callback POSTed on completion.
    #[arg(long, env = "METADATA_GENERATOR_URL")]
    pub metadata_generator_url: Option<String>,

    /// Zoom headroom added on top of the SCAMIN-derived minzoom.
    #[arg(long, env = "SCAMIN_HEADROOM", default_value_t = 2)]
    pub scamin_headroom: i32,

    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value_t = 15)]
    pub poll_interval_seconds: u64,

    #[arg(long, env = "LOG_INTERVAL_SECONDS", default_value_t = 60)]
    pub log_interval_seconds: u64,

    #[arg(long, env = "MAX_WAIT_SECONDS", default_value_t = 5400)]
    pub max_wait_seconds: u64,

    #[arg(long, env = "MAX_CONCURRENT_MERGES", default_value_t = 2)]
    pub max_concurrent_merges: usize,

    #[arg(long, env = "INGEST_CONCURRENCY", default_value_t = 16)]
    pub ingest_concurrency: usize,

    /// Path to the tippecanoe-compatible tile generator binary.
    #[arg(long, env = "TIPPECANOE_BIN", default_value = "tippecanoe")]
    pub tippecanoe_bin: String,

    /// Path to the tile-join binary used by the tree-merger.
    #[arg(long, env = "TILE_JOIN_BIN", default_value = "tile-join")]
    pub tile_join_bin: String,
}

impl Args {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.district_id.trim().is_empty() {
            return Err(crate::error::ComposeError::Configuration(
                "district_id must not be empty".into(),
            ));
        }
        if self.bucket_name.trim().is_empty() {
            return Err(crate::error::ComposeError::Configuration(
                "bucket_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args::parse_from([
            "enc-compose",
            "--district-id",
            "d1",
            "--district-label",
            "D1",
            "--bucket-name",
            "b1",
        ])
    }

    #[test]
    fn valid_args_pass_validation() {
        assert!(args().validate().is_ok());
    }

    #[test]
    fn blank_district_id_is_rejected() {
        let mut a = args();
        a.district_id = "  ".into();
        assert!(a.validate().is_err());
    }

    #[test]
    fn blank_bucket_name_is_rejected() {
        let mut a = args();
        a.bucket_name = "".into();
        assert!(a.validate().is_err());
    }
}
