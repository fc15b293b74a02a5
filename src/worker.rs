//! Worker fan-out: plans (scale, zoom-band) tasks, launches an external tile
//! generator per task, and polls storage for completion. Subprocess launch
//! shells out to tippecanoe via `tokio::process::Command`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};

use crate::config::Args;
use crate::error::{ComposeError, Result};
use crate::scales::{self, HIGH_ZOOM_SPLIT};
use crate::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Task {
    pub scale: u8,
    pub zoom_min: u8,
    pub zoom_max: u8,
}

impl Task {
    pub fn label(&self) -> String {
        if self.zoom_min == scales::native_zoom_range(self.scale).0
            && self.zoom_max == scales::native_zoom_range(self.scale).1
        {
            format!("scale_{}", self.scale)
        } else {
            format!("scale_{}_z{}-{}", self.scale, self.zoom_min, self.zoom_max)
        }
    }
}

/// One task per active scale when its native range fits under the high-zoom
/// split; otherwise a pyramid task up to the split plus one task per zoom
/// above it, so expensive high-zoom generation parallelizes without
/// redundantly regenerating the cheap low-zoom pyramid each time.
pub fn plan_tasks(active_scales: &[u8]) -> Vec<Task> {
    let mut tasks = Vec::new();
    for &scale in active_scales {
        let (lo, hi) = scales::native_zoom_range(scale);
        if hi <= HIGH_ZOOM_SPLIT {
            tasks.push(Task { scale, zoom_min: lo, zoom_max: hi });
            continue;
        }
        if lo <= HIGH_ZOOM_SPLIT {
            tasks.push(Task { scale, zoom_min: lo, zoom_max: HIGH_ZOOM_SPLIT });
        }
        let start = lo.max(HIGH_ZOOM_SPLIT + 1);
        for z in start..=hi {
            tasks.push(Task { scale, zoom_min: z, zoom_max: z });
        }
    }
    tasks
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn start(&self, task: &Task) -> Result<()>;
}

#[async_trait]
pub trait Watcher: Send + Sync {
    async fn wait(&self, tasks: &[Task], args: &Args) -> Result<HashMap<Task, PathBuf>>;
}

/// Default launcher: spawns the configured tile generator binary with the
/// task's parameters passed as environment variables, matching the worker
/// task environment the external generator expects.
pub struct SubprocessLauncher {
    pub args: Args,
}

#[async_trait]
impl Launcher for SubprocessLauncher {
    async fn start(&self, task: &Task) -> Result<()> {
        info!("launching worker task {}", task.label());
        let status = tokio::process::Command::new(&self.args.tippecanoe_bin)
            .env("DISTRICT_LABEL", &self.args.district_label)
            .env("BUCKET_NAME", &self.args.bucket_name)
            .env("SCALE_NUM", task.scale.to_string())
            .env("ZOOM_MIN", task.zoom_min.to_string())
            .env("ZOOM_MAX", task.zoom_max.to_string())
            .env("JOB_TYPE", "tippecanoe")
            .status()
            .await
            .map_err(|e| ComposeError::Subprocess {
                scale: task.scale,
                zoom_min: task.zoom_min,
                zoom_max: task.zoom_max,
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(ComposeError::Subprocess {
                scale: task.scale,
                zoom_min: task.zoom_min,
                zoom_max: task.zoom_max,
                reason: format!("exit status {status}"),
            });
        }
        Ok(())
    }
}

/// Polls storage for each task's expected output path every `poll_interval`,
/// logging a progress summary every `log_interval`, downloading outputs as
/// they appear, and erroring out after `max_wait_seconds`.
pub struct StoragePollWatcher<'a> {
    pub store: &'a dyn ObjectStore,
    pub output_prefix: String,
}

#[async_trait]
impl<'a> Watcher for StoragePollWatcher<'a> {
    async fn wait(&self, tasks: &[Task], args: &Args) -> Result<HashMap<Task, PathBuf>> {
        let mut found: HashMap<Task, PathBuf> = HashMap::new();
        let started = tokio::time::Instant::now();
        let mut last_log = started;

        loop {
            for task in tasks {
                if found.contains_key(task) {
                    continue;
                }
                let key = format!("{}/{}.mbtiles", self.output_prefix, task.label());
                if self.store.exists(&key).await? {
                    let size = self.store.size(&key).await?;
                    info!("worker output ready: {key} ({size} bytes)");
                    let local = PathBuf::from(&args.work_dir).join(format!("{}.mbtiles", task.label()));
                    let data = self.store.get(&key).await?;
                    if let Some(parent) = local.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&local, &data).await?;
                    found.insert(task.clone(), local);
                }
            }

            if found.len() == tasks.len() {
                return Ok(found);
            }

            let elapsed = started.elapsed();
            if elapsed.as_secs() > args.max_wait_seconds {
                let missing: Vec<String> = tasks
                    .iter()
                    .filter(|t| !found.contains_key(t))
                    .map(|t| t.label())
                    .collect();
                return Err(ComposeError::Timeout { waited_secs: elapsed.as_secs(), missing });
            }

            if last_log.elapsed().as_secs() >= args.log_interval_seconds {
                warn!("waiting on {}/{} worker outputs", found.len(), tasks.len());
                last_log = tokio::time::Instant::now();
            }

            tokio::time::sleep(Duration::from_secs(args.poll_interval_seconds)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_zoom_scale_is_single_task() {
        let tasks = plan_tasks(&[1]);
        assert_eq!(tasks, vec![Task { scale: 1, zoom_min: 0, zoom_max: 8 }]);
    }

    #[test]
    fn high_zoom_scale_splits_per_level_above_14() {
        let tasks = plan_tasks(&[4]);
        assert_eq!(tasks[0], Task { scale: 4, zoom_min: 6, zoom_max: 14 });
        assert_eq!(tasks[1], Task { scale: 4, zoom_min: 15, zoom_max: 15 });
        assert_eq!(tasks.len(), 2);
    }
}
