use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{error::Result, extract::DocumentKind};

/// One line of the metadata log, describing the chunk whose vector sits at
/// the same position in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(alias = "mat_id")]
    pub material_id: String,
    pub title: String,
    pub filepath: String,
    pub kind: DocumentKind,
    #[serde(alias = "chunk_id")]
    pub chunk_index: usize,
    pub text: String,
}

/// Append-only JSON Lines log of chunk records.
///
/// Every non-empty line is a positional slot. A line that fails to parse
/// stays in place as a hole so the slots after it keep their positions.
pub struct MetadataLog {
    path: PathBuf,
    slots: Vec<Option<ChunkRecord>>,
    /// Byte offset where each slot's line begins.
    slot_offsets: Vec<u64>,
    /// Length of the file after the last successful write.
    committed_len: u64,
    /// The last line on disk has no terminating newline.
    missing_newline: bool,
}

impl std::fmt::Debug for MetadataLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataLog")
            .field("path", &self.path)
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl MetadataLog {
    /// Load the log at `path`. A missing file is an empty log.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut slots = Vec::new();
        let mut slot_offsets = Vec::new();
        let mut offset = 0u64;

        for (line_no, line) in bytes.split(|&b| b == b'\n').enumerate() {
            let start = offset;
            offset += line.len() as u64 + 1;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let record = match serde_json::from_slice::<ChunkRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        "skipping malformed metadata record: {e}"
                    );
                    None
                }
            };
            slots.push(record);
            slot_offsets.push(start);
        }

        debug!(path = %path.display(), slots = slots.len(), "opened metadata log");

        Ok(Self {
            path: path.to_path_buf(),
            slots,
            slot_offsets,
            committed_len: bytes.len() as u64,
            missing_newline: bytes.last().is_some_and(|&b| b != b'\n'),
        })
    }

    /// Number of slots, holes included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots whose line could not be parsed.
    pub fn holes(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// The record at `position`, if that slot exists and parsed.
    pub fn get(&self, position: usize) -> Option<&ChunkRecord> {
        self.slots.get(position).and_then(Option::as_ref)
    }

    /// Every valid record in insertion order.
    pub fn load_all(&self) -> Vec<ChunkRecord> {
        self.slots.iter().flatten().cloned().collect()
    }

    /// Append records as one write followed by an fsync.
    ///
    /// If the write fails the file is cut back to its last committed length,
    /// leaving the in-memory slots unchanged.
    pub fn append(&mut self, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        if self.missing_newline {
            buf.push('\n');
        }
        let mut offsets = Vec::with_capacity(records.len());
        for record in records {
            offsets.push(self.committed_len + buf.len() as u64);
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if let Err(e) = file.write_all(buf.as_bytes()).and_then(|()| file.sync_all())
        {
            if let Err(trunc) = file.set_len(self.committed_len) {
                warn!(
                    path = %self.path.display(),
                    "failed to roll back partial metadata write: {trunc}"
                );
            }
            return Err(e.into());
        }

        self.committed_len += buf.len() as u64;
        self.missing_newline = false;
        self.slots.extend(records.iter().cloned().map(Some));
        self.slot_offsets.extend(offsets);
        Ok(())
    }

    /// Keep only the first `len` slots, cutting the rest from the file.
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        if len >= self.slots.len() {
            return Ok(());
        }

        let new_len = self.slot_offsets[len];
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(new_len)?;
        file.sync_all()?;

        self.slots.truncate(len);
        self.slot_offsets.truncate(len);
        self.committed_len = new_len;
        self.missing_newline = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(material: &str, index: usize, text: &str) -> ChunkRecord {
        ChunkRecord {
            material_id: material.to_string(),
            title: "Biology".to_string(),
            filepath: "/tmp/bio.txt".to_string(),
            kind: DocumentKind::Text,
            chunk_index: index,
            text: text.to_string(),
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let log = MetadataLog::open(&tmp.path().join("meta.jsonl")).unwrap();
        assert!(log.is_empty());
        assert!(log.get(0).is_none());
    }

    #[test]
    fn append_and_reopen_preserves_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.jsonl");

        let mut log = MetadataLog::open(&path).unwrap();
        log.append(&[record("m1", 0, "alpha"), record("m1", 1, "beta")])
            .unwrap();
        log.append(&[record("m2", 0, "gamma")]).unwrap();
        assert_eq!(log.len(), 3);

        let log = MetadataLog::open(&path).unwrap();
        let texts: Vec<_> =
            log.load_all().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, ["alpha", "beta", "gamma"]);
        assert_eq!(log.get(2).unwrap().material_id, "m2");
    }

    #[test]
    fn malformed_line_is_a_hole() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.jsonl");
        let good = |i: usize| {
            serde_json::to_string(&record("m", i, &format!("t{i}"))).unwrap()
        };
        std::fs::write(
            &path,
            format!("{}\n{{not json\n{}\n\n{}\n", good(0), good(1), good(2)),
        )
        .unwrap();

        let log = MetadataLog::open(&path).unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log.holes(), 1);
        assert_eq!(log.load_all().len(), 3);
        assert!(log.get(1).is_none());
        assert_eq!(log.get(2).unwrap().text, "t1");
        assert_eq!(log.get(3).unwrap().text, "t2");
    }

    #[test]
    fn accepts_legacy_field_names() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.jsonl");
        std::fs::write(
            &path,
            r#"{"mat_id":"old","title":"T","filepath":"f.pdf","kind":"pdf","chunk_id":3,"text":"x"}"#,
        )
        .unwrap();

        let log = MetadataLog::open(&path).unwrap();
        let rec = log.get(0).unwrap();
        assert_eq!(rec.material_id, "old");
        assert_eq!(rec.chunk_index, 3);
        assert_eq!(rec.kind, DocumentKind::Pdf);
    }

    #[test]
    fn repairs_missing_trailing_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.jsonl");
        let first = serde_json::to_string(&record("m", 0, "first")).unwrap();
        std::fs::write(&path, &first).unwrap();

        let mut log = MetadataLog::open(&path).unwrap();
        log.append(&[record("m", 1, "second")]).unwrap();

        let log = MetadataLog::open(&path).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.holes(), 0);
        assert_eq!(log.get(1).unwrap().text, "second");
    }

    #[test]
    fn truncate_cuts_tail_slots() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meta.jsonl");
        let mut log = MetadataLog::open(&path).unwrap();
        log.append(&[
            record("m", 0, "a"),
            record("m", 1, "b"),
            record("m", 2, "c"),
        ])
        .unwrap();

        log.truncate(1).unwrap();
        assert_eq!(log.len(), 1);
        log.append(&[record("n", 0, "d")]).unwrap();

        let log = MetadataLog::open(&path).unwrap();
        let texts: Vec<_> =
            log.load_all().into_iter().map(|r| r.text).collect();
        assert_eq!(texts, ["a", "d"]);
    }

    #[test]
    fn serializes_canonical_field_names() {
        let json = serde_json::to_string(&record("m", 0, "x")).unwrap();
        assert!(json.contains("\"material_id\":\"m\""));
        assert!(json.contains("\"chunk_index\":0"));
        assert!(json.contains("\"kind\":\"txt\""));
    }
}
