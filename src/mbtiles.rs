//! Tile-archive I/O: the on-disk format is an SQLite database with `tiles`
//! and `metadata` tables (the MBTiles convention). Reading and writing goes
//! through `sqlx`'s sqlite backend.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ComposeError, Result};

pub async fn open_or_create(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(|e| ComposeError::Storage(e.to_string()))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tiles (
            zoom_level INTEGER,
            tile_column INTEGER,
            tile_row INTEGER,
            tile_data BLOB,
            PRIMARY KEY (zoom_level, tile_column, tile_row)
        )",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE TABLE IF NOT EXISTS metadata (name TEXT PRIMARY KEY, value TEXT)")
        .execute(&pool)
        .await?;
    Ok(pool)
}

pub async fn open_readonly(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(|e| ComposeError::Storage(e.to_string()))?
        .read_only(true);
    Ok(SqlitePoolOptions::new().max_connections(2).connect_with(options).await?)
}

pub async fn set_metadata(pool: &SqlitePool, name: &str, value: &str) -> Result<()> {
    sqlx::query("INSERT INTO metadata (name, value) VALUES (?, ?) ON CONFLICT(name) DO UPDATE SET value = excluded.value")
        .bind(name)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_metadata(pool: &SqlitePool, name: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM metadata WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v))
}

pub async fn tile_count(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tiles").fetch_one(pool).await?;
    Ok(row.0)
}

/// Whether the archive's `sqlite_master` catalog lists a `metadata` table.
pub async fn has_metadata_table(pool: &SqlitePool) -> Result<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'metadata'")
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

pub async fn zoom_range(pool: &SqlitePool) -> Result<Option<(i64, i64)>> {
    let row: Option<(Option<i64>, Option<i64>)> =
        sqlx::query_as("SELECT MIN(zoom_level), MAX(zoom_level) FROM tiles")
            .fetch_one(pool)
            .await
            .map(Some)?;
    Ok(row.and_then(|(lo, hi)| lo.zip(hi)))
}

/// Inject the sector-light index and coverage-boundary metadata rows into
/// the point archive. These are additive to the standard MBTiles metadata
/// keys (`bounds`, `minzoom`, `maxzoom`) a tile generator already writes.
pub async fn inject_point_metadata(
    pool: &SqlitePool,
    sector_lights: &[crate::points::SectorLightEntry],
    coverage_boundaries: &std::collections::HashMap<String, serde_json::Value>,
) -> Result<()> {
    let lights_json = serde_json::to_string(sector_lights)?;
    set_metadata(pool, "sector_lights", &lights_json).await?;
    let coverage_json = serde_json::to_string(coverage_boundaries)?;
    set_metadata(pool, "coverage_boundaries", &coverage_json).await?;
    Ok(())
}

/// Zip an MBTiles file into a single-entry archive named `{inner_name}`, the
/// upload shape the storage interface expects alongside the raw file.
pub fn zip_single_file(source: &Path, inner_name: &str) -> Result<Vec<u8>> {
    let data = std::fs::read(source)?;
    let mut buf = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buf);
        let mut writer = zip::ZipWriter::new(cursor);
        let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        writer
            .start_file(inner_name, options)
            .map_err(|e| ComposeError::Storage(e.to_string()))?;
        use std::io::Write;
        writer.write_all(&data)?;
        writer.finish().map_err(|e| ComposeError::Storage(e.to_string()))?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_archive_has_metadata_table_and_no_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_or_create(&dir.path().join("t.mbtiles")).await.unwrap();
        assert!(has_metadata_table(&pool).await.unwrap());
        assert_eq!(tile_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn metadata_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_or_create(&dir.path().join("t.mbtiles")).await.unwrap();
        set_metadata(&pool, "minzoom", "3").await.unwrap();
        assert_eq!(get_metadata(&pool, "minzoom").await.unwrap(), Some("3".to_string()));
        assert_eq!(get_metadata(&pool, "maxzoom").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zoom_range_reflects_inserted_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_or_create(&dir.path().join("t.mbtiles")).await.unwrap();
        assert_eq!(zoom_range(&pool).await.unwrap(), None);
        sqlx::query("INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (2, 0, 0, x'00')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (5, 0, 0, x'00')")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(zoom_range(&pool).await.unwrap(), Some((2, 5)));
    }
}
