//! Append-only queue files.
//!
//! One file per (group, name) queue. A queue file is only ever appended to
//! or deleted as a whole, so a crash can at worst leave a torn frame at the
//! tail, which the next append cuts off. A complete frame that fails its
//! checksum stays in place; readers step over it.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [FRAME 0: codec-encoded QueueHeader]
//! [FRAME 1: codec-encoded DurableEntry]
//! [FRAME 2: codec-encoded DurableEntry]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::traits::{DurableEntry, QueueKey, StorageError};

use super::codec::{self, CodecError, CODEC_VERSION, MAX_FRAME_SIZE};

const HEADER_LEN: u64 = 5;
const FRAME_PREFIX_LEN: u64 = 5;
const FRAME_CRC_LEN: u64 = 4;

/// First frame of every queue and intent file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHeader {
    pub group: String,
    pub name: String,
}

impl From<&QueueKey> for QueueHeader {
    fn from(key: &QueueKey) -> Self {
        Self {
            group: key.group.clone(),
            name: key.name.clone(),
        }
    }
}

/// Decoded contents of a queue file.
#[derive(Debug, Default)]
pub struct QueueContents {
    pub header: Option<QueueHeader>,
    pub entries: Vec<DurableEntry>,
    /// Frames dropped because they failed their checksum or did not decode.
    pub skipped: usize,
}

fn codec_err(err: CodecError) -> StorageError {
    match err {
        CodecError::Serialize(e) => StorageError::SerializationError(e.to_string()),
        CodecError::Io(e) => StorageError::BackendError(e.to_string()),
        other => StorageError::Corrupted(other.to_string()),
    }
}

/// Create a file holding just the header frame for `key`.
pub fn write_new(path: &Path, key: &QueueKey, sync: bool) -> Result<(), StorageError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    codec::write_header(&mut file)?;
    file.write_all(&codec::encode(&QueueHeader::from(key)).map_err(codec_err)?)?;
    if sync {
        file.sync_all()?;
    }
    Ok(())
}

/// Append one entry, creating the file if needed, and return the new file
/// length.
///
/// `known_end` is the length this process left the file at after its last
/// append. When the file still has exactly that length the frame walk is
/// skipped; otherwise the frames are walked from the header to find where
/// the last whole frame ends.
pub fn append(
    path: &Path,
    key: &QueueKey,
    entry: &DurableEntry,
    sync: bool,
    max_bytes: u64,
    known_end: Option<u64>,
) -> Result<u64, StorageError> {
    // Encode first so a bad payload never touches the file.
    let frame = codec::encode(entry).map_err(codec_err)?;

    if !path.exists() {
        write_new(path, key, sync)?;
    }

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let file_len = file.metadata()?.len();
    let valid_len = match known_end {
        Some(end) if end == file_len && end >= HEADER_LEN => end,
        _ => scan_valid_len(&mut file, file_len)?,
    };
    if valid_len < file_len {
        tracing::warn!(
            queue = %key,
            dropped_bytes = file_len - valid_len,
            "cutting torn tail off durable queue"
        );
        file.set_len(valid_len)?;
    }

    let new_len = valid_len + frame.len() as u64;
    if new_len > max_bytes {
        return Err(StorageError::BackendError(format!(
            "queue {key} would exceed {max_bytes} bytes"
        )));
    }

    file.seek(SeekFrom::Start(valid_len))?;
    file.write_all(&frame)?;
    file.flush()?;
    if sync {
        file.sync_all()?;
    }
    Ok(new_len)
}

/// Read every decodable entry. A missing file yields empty contents.
pub fn read(path: &Path) -> Result<QueueContents, StorageError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(QueueContents::default()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader).map_err(|e| StorageError::Corrupted(e.to_string()))?;

    let mut contents = QueueContents::default();
    match codec::decode::<QueueHeader>(&mut reader) {
        Ok(header) => contents.header = Some(header),
        Err(CodecError::End) => return Ok(contents),
        Err(e) if e.frame_intact() => contents.skipped += 1,
        Err(e) => return Err(codec_err(e)),
    }

    loop {
        match codec::decode::<DurableEntry>(&mut reader) {
            Ok(entry) => contents.entries.push(entry),
            Err(CodecError::End) => break,
            Err(e) if e.frame_intact() => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable durable record");
                contents.skipped += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "durable queue ends in an unreadable frame");
                contents.skipped += 1;
                break;
            }
        }
    }

    Ok(contents)
}

/// Read only the header frame (used to map file names back to queue names).
pub fn read_header(path: &Path) -> Result<Option<QueueHeader>, StorageError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader).map_err(|e| StorageError::Corrupted(e.to_string()))?;
    match codec::decode::<QueueHeader>(&mut reader) {
        Ok(header) => Ok(Some(header)),
        Err(CodecError::End) => Ok(None),
        Err(e) => Err(codec_err(e)),
    }
}

/// True if the file holds at least one entry frame after its header frame.
pub fn has_entries(path: &Path) -> Result<bool, StorageError> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let total = file.metadata()?.len();
    Ok(matches!(frame_at(&mut file, HEADER_LEN, total)?, FrameAt::Whole(end) if end < total))
}

/// Delete a queue file; a missing file is fine.
pub fn remove(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// What the bytes at one frame offset turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameAt {
    /// A complete frame ending at this offset. Its checksum is not checked:
    /// a damaged but complete frame is skipped by readers, never cut.
    Whole(u64),
    /// The file ends inside the frame (an interrupted append).
    Torn,
    /// Not a frame prefix at all, so no later frame can be located.
    Garbled,
}

/// Offset just past the last whole frame, walking length prefixes from the
/// header. Only a torn or garbled tail lies beyond it.
fn scan_valid_len(file: &mut File, total: u64) -> Result<u64, StorageError> {
    if total < HEADER_LEN {
        return Ok(0);
    }

    let mut pos = HEADER_LEN;
    while pos < total {
        match frame_at(file, pos, total)? {
            FrameAt::Whole(end) => pos = end,
            FrameAt::Torn | FrameAt::Garbled => break,
        }
    }
    Ok(pos)
}

fn frame_at(file: &mut File, start: u64, total: u64) -> Result<FrameAt, StorageError> {
    if total.saturating_sub(start) < FRAME_PREFIX_LEN {
        return Ok(FrameAt::Torn);
    }

    file.seek(SeekFrom::Start(start))?;
    let mut prefix = [0u8; 5];
    file.read_exact(&mut prefix)?;
    if prefix[0] != CODEC_VERSION {
        return Ok(FrameAt::Garbled);
    }
    let len = u32::from_le_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Ok(FrameAt::Garbled);
    }

    let end = start + FRAME_PREFIX_LEN + len as u64 + FRAME_CRC_LEN;
    Ok(if end > total { FrameAt::Torn } else { FrameAt::Whole(end) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn entry(v: i64) -> DurableEntry {
        DurableEntry::new(Utc.timestamp_opt(v, 0).unwrap(), Payload::Int(v))
    }

    #[test]
    fn test_append_and_read_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q");
        let key = QueueKey::new("g", "n");

        for v in 1..=3 {
            append(&path, &key, &entry(v), false, u64::MAX, None).unwrap();
        }

        let contents = read(&path).unwrap();
        assert_eq!(contents.header, Some(QueueHeader::from(&key)));
        let values: Vec<_> = contents.entries.iter().filter_map(|e| e.payload.as_int()).collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(contents.skipped, 0);
        assert!(has_entries(&path).unwrap());
    }

    #[test]
    fn test_torn_tail_is_cut_before_next_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q");
        let key = QueueKey::new("g", "n");

        append(&path, &key, &entry(1), false, u64::MAX, None).unwrap();
        append(&path, &key, &entry(2), false, u64::MAX, None).unwrap();

        // Simulate a crash mid-write of the second entry.
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - 3).unwrap();
        drop(file);

        append(&path, &key, &entry(3), false, u64::MAX, None).unwrap();

        let values: Vec<_> = read(&path)
            .unwrap()
            .entries
            .iter()
            .filter_map(|e| e.payload.as_int())
            .collect();
        assert_eq!(values, vec![1, 3]);
    }

    #[test]
    fn test_damaged_middle_record_survives_next_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q");
        let key = QueueKey::new("g", "n");

        for v in 1..=3 {
            append(&path, &key, &entry(v), false, u64::MAX, None).unwrap();
        }

        // Flip one byte inside the second entry's JSON body.
        let header_frame = codec::encode(&QueueHeader::from(&key)).unwrap().len();
        let entry_frame = codec::encode(&entry(1)).unwrap().len();
        let target = HEADER_LEN as usize + header_frame + entry_frame + 7;
        let mut bytes = fs::read(&path).unwrap();
        bytes[target] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        append(&path, &key, &entry(4), false, u64::MAX, None).unwrap();

        let contents = read(&path).unwrap();
        let values: Vec<_> = contents.entries.iter().filter_map(|e| e.payload.as_int()).collect();
        assert_eq!(values, vec![1, 3, 4]);
        assert_eq!(contents.skipped, 1);
    }

    #[test]
    fn test_known_end_skips_walk_only_when_length_matches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q");
        let key = QueueKey::new("g", "n");

        let end = append(&path, &key, &entry(1), false, u64::MAX, None).unwrap();
        assert_eq!(end, fs::metadata(&path).unwrap().len());
        let end = append(&path, &key, &entry(2), false, u64::MAX, Some(end)).unwrap();

        // A torn write by someone else changes the length, so the stale
        // offset is not trusted and the walk finds the real end.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[CODEC_VERSION, 90, 0, 0, 0, b'{']).unwrap();
        }
        append(&path, &key, &entry(3), false, u64::MAX, Some(end)).unwrap();

        let values: Vec<_> = read(&path)
            .unwrap()
            .entries
            .iter()
            .filter_map(|e| e.payload.as_int())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_header_only_file_has_no_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q");
        let key = QueueKey::new("g", "n");

        write_new(&path, &key, false).unwrap();
        assert!(!has_entries(&path).unwrap());
        assert_eq!(read_header(&path).unwrap(), Some(QueueHeader::from(&key)));
        assert!(read(&path).unwrap().entries.is_empty());
    }

    #[test]
    fn test_size_limit_rejects_append_without_damage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q");
        let key = QueueKey::new("g", "n");

        append(&path, &key, &entry(1), false, 4096, None).unwrap();
        let big = DurableEntry::new(Utc::now(), Payload::Data(vec![7; 8192]));
        assert!(append(&path, &key, &big, false, 4096, None).is_err());

        assert_eq!(read(&path).unwrap().entries.len(), 1);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent");
        assert!(read(&path).unwrap().entries.is_empty());
        assert!(read_header(&path).unwrap().is_none());
        remove(&path).unwrap();
    }
}
