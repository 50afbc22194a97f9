//! Per-project log writer task.
//!
//! Every append goes through one task per project so entries are totally
//! ordered without a shared lock; callers enqueue a command and await an
//! acknowledgement once the entry has at least been written (fsync is
//! batched on a short timer, not every append).

use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::entry::LogEntry;
use crate::error::{LogError, Result};
use crate::segment::{self, segment_path};

enum WriteCommand {
    Append {
        entry: LogEntry,
        ack: oneshot::Sender<Result<()>>,
    },
    Flush {
        ack: oneshot::Sender<Result<()>>,
    },
}

#[derive(Clone)]
pub struct LogWriterHandle {
    tx: mpsc::Sender<WriteCommand>,
}

impl LogWriterHandle {
    pub fn spawn(log_dir: PathBuf, cap_bytes: u64, cap_entries: u64, flush_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run(log_dir, cap_bytes, cap_entries, flush_interval, rx));
        Self { tx }
    }

    pub async fn append(&self, entry: LogEntry) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriteCommand::Append { entry, ack: ack_tx })
            .await
            .map_err(|_| LogError::WriterGone)?;
        ack_rx.await.map_err(|_| LogError::WriterGone)?
    }

    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriteCommand::Flush { ack: ack_tx })
            .await
            .map_err(|_| LogError::WriterGone)?;
        ack_rx.await.map_err(|_| LogError::WriterGone)?
    }
}

struct OpenSegment {
    seq: u64,
    file: File,
    size: u64,
    entry_count: u64,
}

fn count_entries(path: &std::path::Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().count() as u64)
}

fn open_current_segment(log_dir: &std::path::Path) -> Result<OpenSegment> {
    std::fs::create_dir_all(log_dir)?;
    let seq = segment::list_segment_seqs(log_dir)?.last().copied().unwrap_or(0);
    let path = segment_path(log_dir, seq);
    segment::recover_segment(&path).ok();
    let file = segment::open_for_append(&path)?;
    let size = segment::segment_size(&path)?;
    let entry_count = count_entries(&path)?;
    Ok(OpenSegment {
        seq,
        file,
        size,
        entry_count,
    })
}

async fn run(
    log_dir: PathBuf,
    cap_bytes: u64,
    cap_entries: u64,
    flush_interval: Duration,
    mut rx: mpsc::Receiver<WriteCommand>,
) {
    let mut segment = match open_current_segment(&log_dir) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(error = %err, dir = %log_dir.display(), "failed to open log segment, writer exiting");
            return;
        }
    };
    let mut dirty = false;
    let mut ticker = tokio::time::interval(flush_interval);

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    WriteCommand::Append { entry, ack } => {
                        let result = append_one(&log_dir, &mut segment, &entry, cap_bytes, cap_entries);
                        if result.is_ok() {
                            dirty = true;
                        }
                        let _ = ack.send(result);
                    }
                    WriteCommand::Flush { ack } => {
                        let result = segment::flush_file(&mut segment.file);
                        if result.is_ok() {
                            dirty = false;
                        }
                        let _ = ack.send(result);
                    }
                }
            }
            _ = ticker.tick() => {
                if dirty {
                    if let Err(err) = segment::flush_file(&mut segment.file) {
                        tracing::error!(error = %err, "periodic log flush failed");
                    } else {
                        dirty = false;
                    }
                }
            }
        }
    }

    if dirty {
        let _ = segment::flush_file(&mut segment.file);
    }
}

fn append_one(
    log_dir: &std::path::Path,
    segment: &mut OpenSegment,
    entry: &LogEntry,
    cap_bytes: u64,
    cap_entries: u64,
) -> Result<()> {
    let line = entry.to_line()?;
    let line_len = line.len() as u64;

    let would_overflow_bytes = cap_bytes > 0 && segment.size + line_len > cap_bytes;
    let would_overflow_entries = cap_entries > 0 && segment.entry_count >= cap_entries;
    if (would_overflow_bytes || would_overflow_entries) && segment.entry_count > 0 {
        segment::flush_file(&mut segment.file)?;
        segment.seq += 1;
        let path = segment_path(log_dir, segment.seq);
        segment.file = segment::open_for_append(&path)?;
        segment.size = 0;
        segment.entry_count = 0;
    }

    segment.file.write_all(line.as_bytes())?;
    segment.size += line_len;
    segment.entry_count += 1;
    Ok(())
}
