//! Background segment retention.
//!
//! Segments older than a configured age are deleted; the newest segment for
//! a project is never deleted even if it is past the age cutoff, so an idle
//! project always keeps at least one segment on disk.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::Result;
use crate::segment::{list_segment_seqs, segment_path};

/// Pure decision: which of `seqs_with_mtime` (sequence number, modification
/// time) are older than `max_age` as of `now`, excluding the highest
/// sequence number (the newest segment is always kept). Separated from
/// filesystem access so the policy can be tested without faking mtimes.
fn segments_to_remove(seqs_with_mtime: &[(u64, SystemTime)], now: SystemTime, max_age: Duration) -> Vec<u64> {
    let Some(newest) = seqs_with_mtime.iter().map(|(seq, _)| *seq).max() else {
        return Vec::new();
    };
    seqs_with_mtime
        .iter()
        .filter(|(seq, _)| *seq != newest)
        .filter(|(_, mtime)| now.duration_since(*mtime).unwrap_or(Duration::ZERO) > max_age)
        .map(|(seq, _)| *seq)
        .collect()
}

/// Deletes segments of `log_dir` whose modification time is older than
/// `max_age`, keeping the newest segment regardless of its age. Returns the
/// sequence numbers removed.
pub fn purge_old_segments(log_dir: &Path, max_age: Duration) -> Result<Vec<u64>> {
    let seqs = list_segment_seqs(log_dir)?;
    if seqs.is_empty() {
        return Ok(Vec::new());
    }

    let mut seqs_with_mtime = Vec::with_capacity(seqs.len());
    for seq in seqs {
        let path = segment_path(log_dir, seq);
        if let Ok(mtime) = std::fs::metadata(&path).and_then(|m| m.modified()) {
            seqs_with_mtime.push((seq, mtime));
        }
    }

    let to_remove = segments_to_remove(&seqs_with_mtime, SystemTime::now(), max_age);
    for &seq in &to_remove {
        std::fs::remove_file(segment_path(log_dir, seq))?;
    }
    Ok(to_remove)
}

/// Spawns a periodic task that calls `purge_old_segments` for every log
/// directory `log_dirs` currently returns. Runs until the returned handle is
/// aborted or the process exits.
pub fn spawn_retention_task<F>(
    log_dirs: F,
    max_age: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Vec<PathBuf> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for dir in log_dirs() {
                match purge_old_segments(&dir, max_age) {
                    Ok(removed) if !removed.is_empty() => {
                        tracing::info!(dir = %dir.display(), removed = removed.len(), "retention purged old segments");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(dir = %dir.display(), error = %err, "retention sweep failed for project");
                    }
                }
            }
        }
    })
}
