//! Segment file naming, listing, and crash recovery.
//!
//! Segments live under `<project_dir>/log/NNNNNN.jsonl`, ascending by a
//! zero-padded sequence number. A project's segments are totally ordered by
//! that number; entries within one are totally ordered by file position.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

pub fn segment_path(log_dir: &Path, seq: u64) -> PathBuf {
    log_dir.join(format!("{seq:06}.jsonl"))
}

fn parse_segment_seq(file_name: &str) -> Option<u64> {
    file_name.strip_suffix(".jsonl")?.parse().ok()
}

/// All segment sequence numbers present in `log_dir`, ascending.
pub fn list_segment_seqs(log_dir: &Path) -> Result<Vec<u64>> {
    if !log_dir.exists() {
        return Ok(Vec::new());
    }
    let mut seqs = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(seq) = parse_segment_seq(name) {
                seqs.push(seq);
            }
        }
    }
    seqs.sort_unstable();
    Ok(seqs)
}

/// The sequence number a freshly created segment should use: one past the
/// highest existing segment, or `0` if there are none yet.
pub fn next_segment_seq(log_dir: &Path) -> Result<u64> {
    Ok(list_segment_seqs(log_dir)?.last().map_or(0, |s| s + 1))
}

/// Truncates a single incomplete trailing line left by a crash mid-write.
/// A segment is well-formed if it is empty or ends with `\n`; anything else
/// is rewound to the last full newline.
pub fn recover_segment(path: &Path) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(());
    }

    let mut last_byte = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last_byte)?;
    if last_byte[0] == b'\n' {
        return Ok(());
    }

    // Scan backward for the previous newline (or the start of the file).
    let mut pos = len;
    let mut buf = [0u8; 1];
    let mut truncate_at = 0u64;
    while pos > 0 {
        pos -= 1;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf)?;
        if buf[0] == b'\n' {
            truncate_at = pos + 1;
            break;
        }
    }

    file.set_len(truncate_at)?;
    tracing::warn!(
        path = %path.display(),
        truncated_from = len,
        truncated_to = truncate_at,
        "truncated incomplete trailing log line after crash"
    );
    Ok(())
}

pub fn open_for_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

pub fn segment_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Best-effort fsync; a writer calls this after a batch of appends.
pub fn flush_file(file: &mut File) -> Result<()> {
    file.flush()?;
    file.sync_data()?;
    Ok(())
}
