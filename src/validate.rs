//! Validation gates fencing every pipeline stage. Failures are fatal: the
//! core never publishes a partial result.

use std::path::Path;

use crate::error::{ComposeError, Result};
use crate::mbtiles;
use crate::storage::ObjectStore;

/// Gate 2: every ingested source file is non-empty and bracket-bounded.
pub fn gate_2_ingest(path: &Path, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(ComposeError::InputValidation {
            path: path.to_path_buf(),
            reason: "file is empty".into(),
        });
    }
    let text = std::str::from_utf8(data).map_err(|_| ComposeError::InputValidation {
        path: path.to_path_buf(),
        reason: "not valid UTF-8".into(),
    })?;
    let trimmed = text.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return Err(ComposeError::InputValidation {
            path: path.to_path_buf(),
            reason: "not a bracket-bounded JSON object".into(),
        });
    }
    Ok(())
}

/// Gates 3A/3B: the archive has a non-empty tile table and a metadata table.
pub async fn gate_tile_archive(path: &Path, gate: &'static str) -> Result<()> {
    let pool = mbtiles::open_readonly(path).await?;
    let count = mbtiles::tile_count(&pool).await?;
    if count == 0 {
        return Err(ComposeError::GateFailed { gate, reason: format!("{path:?} has an empty tiles table") });
    }
    if !mbtiles::has_metadata_table(&pool).await? {
        return Err(ComposeError::GateFailed { gate, reason: format!("{path:?} has no metadata table") });
    }
    Ok(())
}

/// Gate 4: the merged archive passes 3A, has size above a sanity floor, and
/// has a readable zoom range.
pub async fn gate_4_post_merge(path: &Path, min_size_bytes: u64) -> Result<()> {
    gate_tile_archive(path, "4").await?;
    let size = tokio::fs::metadata(path).await?.len();
    if size < min_size_bytes {
        return Err(ComposeError::GateFailed {
            gate: "4",
            reason: format!("archive size {size} below sanity floor {min_size_bytes}"),
        });
    }
    let pool = mbtiles::open_readonly(path).await?;
    mbtiles::zoom_range(&pool)
        .await?
        .ok_or_else(|| ComposeError::GateFailed { gate: "4", reason: "no readable zoom range".into() })?;
    Ok(())
}

/// Gate 5: the uploaded blob exists with byte size equal to the local file.
pub async fn gate_5_post_upload(store: &dyn ObjectStore, key: &str, local_path: &Path) -> Result<()> {
    let local_size = tokio::fs::metadata(local_path).await?.len();
    if !store.exists(key).await? {
        return Err(ComposeError::GateFailed { gate: "5", reason: format!("uploaded key {key} not found") });
    }
    let remote_size = store.size(key).await?;
    if remote_size != local_size {
        return Err(ComposeError::UploadMismatch { path: local_path.to_path_buf(), local: local_size, remote: remote_size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_file_fails_gate_2() {
        let err = gate_2_ingest(&PathBuf::from("x.geojson"), b"");
        assert!(err.is_err());
    }

    #[test]
    fn well_formed_object_passes_gate_2() {
        let data = br#"{"type":"FeatureCollection","features":[]}"#;
        assert!(gate_2_ingest(&PathBuf::from("x.geojson"), data).is_ok());
    }

    #[test]
    fn unbounded_text_fails_gate_2() {
        let data = b"not json at all";
        assert!(gate_2_ingest(&PathBuf::from("x.geojson"), data).is_err());
    }

    #[tokio::test]
    async fn gate_tile_archive_passes_with_tiles_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.mbtiles");
        let pool = mbtiles::open_or_create(&path).await.unwrap();
        sqlx::query("INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (0, 0, 0, x'00')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
        assert!(gate_tile_archive(&path, "3A").await.is_ok());
    }

    #[tokio::test]
    async fn gate_tile_archive_fails_on_empty_tiles_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.mbtiles");
        let pool = mbtiles::open_or_create(&path).await.unwrap();
        pool.close().await;
        assert!(gate_tile_archive(&path, "3A").await.is_err());
    }

    #[tokio::test]
    async fn gate_tile_archive_fails_without_metadata_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.mbtiles");
        let pool = mbtiles::open_or_create(&path).await.unwrap();
        sqlx::query("INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (0, 0, 0, x'00')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DROP TABLE metadata").execute(&pool).await.unwrap();
        pool.close().await;
        assert!(gate_tile_archive(&path, "3A").await.is_err());
    }
}
