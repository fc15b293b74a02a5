//! Bounded-concurrency pairwise tile-archive merger. Ready files queue up
//! sorted by size; whenever two or more are queued and a merge slot is free,
//! the two smallest are dequeued and joined by an external `tile-join`
//! subprocess. Intermediate merges skip recompression; only the final merge
//! recompresses, and a single worker output is promoted untouched.

use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use tokio::sync::{Mutex, Semaphore};

use crate::config::Args;
use crate::error::{ComposeError, Result};

#[derive(Clone)]
struct ReadyFile {
    path: PathBuf,
    size: u64,
}

struct MergerState {
    ready: Vec<ReadyFile>,
    active: usize,
    merge_count: usize,
    first_error: Option<String>,
}

pub struct TreeMerger {
    state: Mutex<MergerState>,
    semaphore: Arc<Semaphore>,
    tile_join_bin: String,
    out_dir: PathBuf,
    notify: tokio::sync::Notify,
}

impl TreeMerger {
    pub fn new(args: &Args) -> Self {
        TreeMerger {
            state: Mutex::new(MergerState { ready: Vec::new(), active: 0, merge_count: 0, first_error: None }),
            semaphore: Arc::new(Semaphore::new(args.max_concurrent_merges)),
            tile_join_bin: args.tile_join_bin.clone(),
            out_dir: args.work_dir.join("merge"),
            notify: tokio::sync::Notify::new(),
        }
    }

    pub async fn add(self: &Arc<Self>, path: PathBuf) -> Result<()> {
        let size = tokio::fs::metadata(&path).await?.len();
        {
            let mut state = self.state.lock().await;
            state.ready.push(ReadyFile { path, size });
            state.ready.sort_by_key(|f| f.size);
        }
        self.try_launch_merges().await;
        Ok(())
    }

    async fn try_launch_merges(self: &Arc<Self>) {
        loop {
            let pair = {
                let mut state = self.state.lock().await;
                if state.ready.len() < 2 {
                    None
                } else {
                    let permit_available = self.semaphore.available_permits() > 0;
                    if !permit_available {
                        None
                    } else {
                        let b = state.ready.remove(0);
                        let a = state.ready.remove(0);
                        state.active += 1;
                        Some((a, b))
                    }
                }
            };
            let Some((a, b)) = pair else { break };
            let permit = self.semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let _permit = permit;
                let result = this.merge_pair(a, b).await;
                let mut state = this.state.lock().await;
                state.active -= 1;
                match result {
                    Ok(merged) => {
                        state.ready.push(merged);
                        state.ready.sort_by_key(|f| f.size);
                    }
                    Err(e) => {
                        if state.first_error.is_none() {
                            state.first_error = Some(e.to_string());
                        }
                    }
                }
                drop(state);
                this.notify.notify_waiters();
                // A completed merge may have freed both a permit and left
                // two or more files ready; re-scan so the queue keeps
                // draining without waiting on an external add().
                this.try_launch_merges().await;
            });
        }
    }

    async fn merge_pair(&self, a: ReadyFile, b: ReadyFile) -> Result<ReadyFile> {
        tokio::fs::create_dir_all(&self.out_dir).await?;
        let merge_id = {
            let mut state = self.state.lock().await;
            state.merge_count += 1;
            state.merge_count
        };
        let out_path = self.out_dir.join(format!("merge_{merge_id}.mbtiles"));
        info!("merging {:?} + {:?} -> {:?}", a.path, b.path, out_path);

        let status = tokio::process::Command::new(&self.tile_join_bin)
            .arg("--no-tile-size-limit")
            .arg("-pC") // skip per-step recompression; final pass recompresses
            .arg("-o")
            .arg(&out_path)
            .arg(&a.path)
            .arg(&b.path)
            .status()
            .await
            .map_err(|e| ComposeError::Subprocess { scale: 0, zoom_min: 0, zoom_max: 0, reason: e.to_string() })?;

        if !status.success() {
            return Err(ComposeError::Subprocess {
                scale: 0,
                zoom_min: 0,
                zoom_max: 0,
                reason: format!("tile-join exit status {status}"),
            });
        }

        tokio::fs::remove_file(&a.path).await.ok();
        tokio::fs::remove_file(&b.path).await.ok();

        let size = tokio::fs::metadata(&out_path).await?.len();
        Ok(ReadyFile { path: out_path, size })
    }

    /// Blocks until exactly one file remains and no merges are active, then
    /// runs a final recompression pass if more than one file was ever added.
    pub async fn finish(self: &Arc<Self>) -> Result<PathBuf> {
        loop {
            {
                let state = self.state.lock().await;
                if let Some(err) = &state.first_error {
                    return Err(ComposeError::Subprocess { scale: 0, zoom_min: 0, zoom_max: 0, reason: err.clone() });
                }
                if state.ready.len() == 1 && state.active == 0 {
                    break;
                }
                if state.ready.is_empty() && state.active == 0 {
                    return Err(ComposeError::GateFailed {
                        gate: "4",
                        reason: "finish() called before any file was added".into(),
                    });
                }
            }
            self.notify.notified().await;
        }

        let (path, merged_any) = {
            let state = self.state.lock().await;
            (state.ready[0].path.clone(), state.merge_count > 0)
        };

        if !merged_any {
            return Ok(path);
        }

        let final_path = self.out_dir.join("final.mbtiles");
        tokio::fs::create_dir_all(&self.out_dir).await?;
        let status = tokio::process::Command::new(&self.tile_join_bin)
            .arg("--no-tile-size-limit")
            .arg("-o")
            .arg(&final_path)
            .arg(&path)
            .status()
            .await
            .map_err(|e| ComposeError::Subprocess { scale: 0, zoom_min: 0, zoom_max: 0, reason: e.to_string() })?;

        if !status.success() {
            return Err(ComposeError::Subprocess {
                scale: 0,
                zoom_min: 0,
                zoom_max: 0,
                reason: format!("final compression pass exit status {status}"),
            });
        }

        tokio::fs::remove_file(&path).await.ok();
        Ok(final_path)
    }
}

