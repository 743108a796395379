//! Age-based deletion over the upload and output trees.
//!
//! The sweeper does not coordinate with running conversions. With a retention
//! age shorter than a conversion takes, it can delete files a pipeline is still
//! reading or writing; every deletion here tolerates entries vanishing under it.

use crate::config::Config;
use std::fs::Metadata;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
}

fn is_aged(metadata: &Metadata, max_age: Duration) -> bool {
    metadata
        .modified()
        .ok()
        .and_then(|m| m.elapsed().ok())
        .is_some_and(|age| age >= max_age)
}

/// Delete everything under `root` older than `max_age`. An aged directory is
/// removed whole without looking inside; `root` itself is never removed.
pub async fn sweep(root: &Path, max_age: Duration) -> io::Result<SweepReport> {
    let mut report = SweepReport::default();
    sweep_dir(root, max_age, &mut report, true).await?;
    Ok(report)
}

async fn sweep_dir(
    dir: &Path,
    max_age: Duration,
    report: &mut SweepReport,
    is_root: bool,
) -> io::Result<()> {
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound && !is_root => return Ok(()),
        Err(e) => return Err(e),
    };

    loop {
        let entry = match read_dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) if e.kind() == ErrorKind::NotFound => break,
            Err(e) => return Err(e),
        };
        let path = entry.path();

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = ?path, error = %e, "cannot stat, skipping");
                continue;
            }
        };
        let aged = is_aged(&metadata, max_age);

        if metadata.is_dir() {
            if aged {
                match fs::remove_dir_all(&path).await {
                    Ok(()) => {
                        report.dirs_removed += 1;
                        info!(path = ?path, "Directory deleted");
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!(path = ?path, error = %e, "Failed to delete directory"),
                }
            } else if let Err(e) = Box::pin(sweep_dir(&path, max_age, report, false)).await {
                warn!(path = ?path, error = %e, "Failed to sweep directory");
            }
        } else if aged {
            match fs::remove_file(&path).await {
                Ok(()) => {
                    report.files_removed += 1;
                    info!(path = ?path, "File deleted");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = ?path, error = %e, "Failed to delete file"),
            }
        }
    }

    Ok(())
}

/// Periodically sweep the upload and output roots. Returns `None` when
/// retention is disabled.
pub fn spawn_retention_task(config: Arc<Config>) -> Option<JoinHandle<()>> {
    if !config.retention.enabled {
        return None;
    }

    let max_age = config.retention.max_age();
    let interval = config.retention.check_interval();
    info!(
        days_old = config.retention.days_old,
        "retention sweeper running every {}",
        humantime::format_duration(interval)
    );

    Some(tokio::spawn(async move {
        loop {
            let (uploads, converted) = tokio::join!(
                sweep(&config.paths.upload_path, max_age),
                sweep(&config.paths.convert_path, max_age)
            );
            for (root, result) in [
                (&config.paths.upload_path, uploads),
                (&config.paths.convert_path, converted),
            ] {
                match result {
                    Ok(report) if report != SweepReport::default() => {
                        info!(
                            root = ?root,
                            files = report.files_removed,
                            dirs = report.dirs_removed,
                            "retention sweep removed old entries"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(root = ?root, error = %e, "retention sweep failed"),
                }
            }
            tokio::time::sleep(interval).await;
        }
    }))
}
