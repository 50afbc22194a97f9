//! Generic atomic-write primitive for small durable JSON documents.
//!
//! Used for project metadata (`agentbridge-engine::project_manager`): write
//! to a temp file in the same directory, fsync, then rename over the
//! target. A reader never observes a half-written file because `rename` is
//! atomic on the same filesystem.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Serializes `value` as pretty JSON and writes it atomically to `path`.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("metadata"),
        std::process::id()
    ));

    let json = serde_json::to_vec_pretty(value)?;
    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        std::io::Write::write_all(&mut tmp, &json)?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads and deserializes a document written by [`write_atomic`].
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        let doc = Doc {
            name: "p1".to_string(),
            count: 3,
        };

        write_atomic(&path, &doc).unwrap();
        let read_back: Doc = read(&path).unwrap();
        assert_eq!(doc, read_back);
    }

    #[test]
    fn write_atomic_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        write_atomic(&path, &Doc { name: "p1".to_string(), count: 1 }).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn overwrite_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        write_atomic(&path, &Doc { name: "a".to_string(), count: 1 }).unwrap();
        write_atomic(&path, &Doc { name: "b".to_string(), count: 2 }).unwrap();

        let read_back: Doc = read(&path).unwrap();
        assert_eq!(read_back, Doc { name: "b".to_string(), count: 2 });
    }
}
