//! Replay: `get_messages(since, limit)`.
//!
//! Entries are not indexed on disk, so a naive replay would forward-scan
//! every segment from the beginning every time. Instead we first walk
//! segments newest-to-oldest to find the one that could contain `since`
//! (its first entry's timestamp is `<= since`), then forward-scan from
//! there, which keeps a `since` near the tail of a long history cheap.

use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::entry::LogEntry;
use crate::error::Result;
use crate::segment::{list_segment_seqs, segment_path};

/// Returns the entries of a project's log with `t > since`, oldest first,
/// capped at `limit`.
pub fn get_messages(log_dir: &Path, since: i64, limit: usize) -> Result<Vec<LogEntry>> {
    let seqs = list_segment_seqs(log_dir)?;
    if seqs.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let start_idx = find_start_segment_index(log_dir, &seqs, since)?;

    let mut out = Vec::new();
    for &seq in &seqs[start_idx..] {
        if out.len() >= limit {
            break;
        }
        for entry in read_segment_entries(&segment_path(log_dir, seq))? {
            if entry.t > since {
                out.push(entry);
                if out.len() >= limit {
                    break;
                }
            }
        }
    }
    Ok(out)
}

/// Index (into `seqs`) of the last segment whose first entry's timestamp is
/// `<= since`, i.e. the earliest segment that might still hold entries we
/// need to return. Falls back to the first segment if `since` predates
/// everything on disk.
fn find_start_segment_index(log_dir: &Path, seqs: &[u64], since: i64) -> Result<usize> {
    for (idx, &seq) in seqs.iter().enumerate().rev() {
        if let Some(first) = read_first_entry(&segment_path(log_dir, seq))? {
            if first.t <= since {
                return Ok(idx);
            }
        }
    }
    Ok(0)
}

fn read_first_entry(path: &Path) -> Result<Option<LogEntry>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return Ok(None),
    };
    let mut lines = BufReader::new(file).lines();
    match lines.next() {
        Some(Ok(line)) if !line.is_empty() => Ok(Some(LogEntry::from_line(&line)?)),
        _ => Ok(None),
    }
}

fn read_segment_entries(path: &Path) -> Result<Vec<LogEntry>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return Ok(Vec::new()),
    };
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match LogEntry::from_line(&line) {
            Ok(entry) => out.push(entry),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping malformed log line during replay");
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Direction;
    use std::io::Write as _;

    fn write_segment(log_dir: &Path, seq: u64, entries: &[(i64, &str)]) {
        std::fs::create_dir_all(log_dir).unwrap();
        let mut file = std::fs::File::create(segment_path(log_dir, seq)).unwrap();
        for (t, m) in entries {
            let entry = LogEntry::new(*t, Direction::Client, serde_json::json!(m));
            file.write_all(entry.to_line().unwrap().as_bytes()).unwrap();
        }
    }

    #[test]
    fn returns_entries_strictly_after_since_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), 0, &[(1, "a"), (2, "b"), (3, "c")]);

        let got = get_messages(dir.path(), 1, 10).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].t, 2);
        assert_eq!(got[1].t, 3);
    }

    #[test]
    fn respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), 0, &[(1, "a"), (2, "b"), (3, "c")]);

        let got = get_messages(dir.path(), 0, 2).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].t, 1);
        assert_eq!(got[1].t, 2);
    }

    #[test]
    fn scans_across_multiple_segments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), 0, &[(1, "a"), (2, "b")]);
        write_segment(dir.path(), 1, &[(3, "c"), (4, "d")]);

        let got = get_messages(dir.path(), 0, 100).unwrap();
        let timestamps: Vec<i64> = got.iter().map(|e| e.t).collect();
        assert_eq!(timestamps, vec![1, 2, 3, 4]);
    }

    #[test]
    fn since_near_tail_skips_earlier_segments() {
        let dir = tempfile::tempdir().unwrap();
        write_segment(dir.path(), 0, &[(1, "a"), (2, "b")]);
        write_segment(dir.path(), 1, &[(3, "c"), (4, "d")]);
        write_segment(dir.path(), 2, &[(5, "e"), (6, "f")]);

        let got = get_messages(dir.path(), 4, 100).unwrap();
        let timestamps: Vec<i64> = got.iter().map(|e| e.t).collect();
        assert_eq!(timestamps, vec![5, 6]);
    }

    #[test]
    fn empty_log_dir_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let got = get_messages(dir.path(), 0, 10).unwrap();
        assert!(got.is_empty());
    }
}
