//! Append-only journal of committed state changes.
//!
//! The journal is the single durable artifact of the store. Records, the
//! operation queue, the pull checkpoint, and persisted conflicts all live
//! in one file, so a backup or restore can never split the queue from the
//! records it refers to.
//!
//! Each frame holds one commit batch: every entry in a frame becomes
//! visible together or not at all. A crash mid-append leaves a torn tail
//! frame, which recovery truncates; everything before it replays cleanly.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use tidemark_protocol::{Checkpoint, ConflictRecord, QueuedOperation, Record, RecordKey};
use tracing::warn;

/// Magic bytes identifying a journal frame.
pub const FRAME_MAGIC: [u8; 4] = *b"TMJL";

/// Current journal format version.
pub const FRAME_VERSION: u16 = 1;

/// Frame header size: magic (4) + version (2) + length (4).
const HEADER_SIZE: usize = 10;

/// Trailing checksum size.
const CRC_SIZE: usize = 4;

/// One logical state change, replayed in order on open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// A record was created or mutated (full post-state).
    RecordPut(Record),
    /// A record row was physically removed.
    RecordRemove(RecordKey),
    /// A queued operation was created or mutated (full post-state).
    OpPut(QueuedOperation),
    /// A queued operation was removed from the queue.
    OpRemove(u64),
    /// The pull checkpoint advanced.
    CheckpointSet(Checkpoint),
    /// A conflict was persisted for review.
    ConflictPut(ConflictRecord),
    /// A persisted conflict was removed.
    ConflictRemove(RecordKey),
}

/// The journal over a storage backend.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
}

impl Journal {
    /// Wraps a backend without reading it. Call [`Journal::replay`] before
    /// the first commit.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Commits one atomic batch of entries.
    ///
    /// The frame is appended and synced before this returns; once it
    /// does, the batch survives process termination.
    pub fn commit(&mut self, batch: &[JournalEntry]) -> StoreResult<()> {
        let frame = encode_frame(batch)?;
        self.backend.append(&frame)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Replays all committed batches in order.
    ///
    /// A torn trailing frame (crash mid-append) is truncated away and
    /// logged; a corrupt frame earlier in the file is an error, since
    /// state after it cannot be trusted.
    pub fn replay(&mut self) -> StoreResult<Vec<Vec<JournalEntry>>> {
        let data = self.backend.read_all()?;
        let mut batches = Vec::new();
        let mut offset = 0usize;

        while offset < data.len() {
            match decode_frame(&data[offset..]) {
                Ok((batch, consumed)) => {
                    batches.push(batch);
                    offset += consumed;
                }
                Err(FrameError::Torn) => {
                    warn!(
                        offset,
                        tail = data.len() - offset,
                        "dropping torn journal tail"
                    );
                    self.backend.truncate(offset as u64)?;
                    self.backend.sync()?;
                    break;
                }
                Err(FrameError::Corrupt(err)) => return Err(err),
            }
        }

        Ok(batches)
    }

    /// Replaces the journal with a snapshot of the live state.
    ///
    /// Compaction bounds journal growth: the snapshot batch captures the
    /// current records, queue, checkpoint, and conflicts, and everything
    /// before it is discarded.
    pub fn compact(&mut self, snapshot: &[JournalEntry]) -> StoreResult<()> {
        let frame = encode_frame(snapshot)?;
        self.backend.replace_all(&frame)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Returns the journal size in bytes.
    pub fn len_bytes(&self) -> StoreResult<u64> {
        self.backend.len()
    }
}

enum FrameError {
    /// The buffer ends before the frame does.
    Torn,
    /// The frame is structurally invalid.
    Corrupt(StoreError),
}

fn encode_frame(batch: &[JournalEntry]) -> StoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(batch, &mut payload).map_err(StoreError::codec)?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
    Ok(frame)
}

fn decode_frame(data: &[u8]) -> Result<(Vec<JournalEntry>, usize), FrameError> {
    if data.len() < HEADER_SIZE {
        return Err(FrameError::Torn);
    }

    if data[0..4] != FRAME_MAGIC {
        return Err(FrameError::Corrupt(StoreError::journal_corruption(
            "bad frame magic",
        )));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != FRAME_VERSION {
        return Err(FrameError::Corrupt(StoreError::journal_corruption(
            format!("unsupported frame version {version}"),
        )));
    }

    let payload_len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let total = HEADER_SIZE + payload_len + CRC_SIZE;
    if data.len() < total {
        return Err(FrameError::Torn);
    }

    let payload = &data[HEADER_SIZE..HEADER_SIZE + payload_len];
    let expected = u32::from_le_bytes([
        data[total - 4],
        data[total - 3],
        data[total - 2],
        data[total - 1],
    ]);
    let actual = compute_crc32(payload);
    if expected != actual {
        return Err(FrameError::Corrupt(StoreError::ChecksumMismatch {
            expected,
            actual,
        }));
    }

    let batch = ciborium::de::from_reader(payload)
        .map_err(|e| FrameError::Corrupt(StoreError::codec(e)))?;
    Ok((batch, total))
}

/// Computes a CRC32 (IEEE polynomial) over the data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use tidemark_protocol::Payload;

    fn sample_record() -> Record {
        Record::new(Payload::default().with_text("name", "a"), None, 100)
    }

    fn open_journal() -> Journal {
        Journal::new(Box::new(InMemoryBackend::new()))
    }

    #[test]
    fn commit_and_replay() {
        let mut journal = open_journal();

        let record = sample_record();
        journal
            .commit(&[JournalEntry::RecordPut(record.clone())])
            .unwrap();
        journal
            .commit(&[JournalEntry::CheckpointSet(Checkpoint::new("c1"))])
            .unwrap();

        let batches = journal.replay().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![JournalEntry::RecordPut(record)]);
        assert_eq!(
            batches[1],
            vec![JournalEntry::CheckpointSet(Checkpoint::new("c1"))]
        );
    }

    #[test]
    fn multi_entry_batch_stays_together() {
        let mut journal = open_journal();
        let record = sample_record();
        let op = QueuedOperation::create(1, record.key, record.payload.clone(), 3, 100);

        journal
            .commit(&[
                JournalEntry::RecordPut(record.clone()),
                JournalEntry::OpPut(op.clone()),
            ])
            .unwrap();

        let batches = journal.replay().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let mut backend = InMemoryBackend::new();
        let frame = encode_frame(&[JournalEntry::CheckpointSet(Checkpoint::new("ok"))]).unwrap();
        backend.append(&frame).unwrap();
        // Simulate a crash mid-append: half of a second frame.
        backend.append(&frame[..frame.len() / 2]).unwrap();

        let mut journal = Journal::new(Box::new(backend));
        let batches = journal.replay().unwrap();

        assert_eq!(batches.len(), 1);
        // The torn tail is gone from the backing store.
        assert_eq!(journal.len_bytes().unwrap(), frame.len() as u64);
    }

    #[test]
    fn corrupt_payload_is_an_error() {
        let mut backend = InMemoryBackend::new();
        let mut frame = encode_frame(&[JournalEntry::CheckpointSet(Checkpoint::new("x"))]).unwrap();
        // Flip a payload byte without touching the length.
        frame[HEADER_SIZE] ^= 0xFF;
        backend.append(&frame).unwrap();

        let mut journal = Journal::new(Box::new(backend));
        let result = journal.replay();
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn bad_magic_is_an_error() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"NOPEnopenope").unwrap();

        let mut journal = Journal::new(Box::new(backend));
        assert!(matches!(
            journal.replay(),
            Err(StoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn compact_replaces_history() {
        let mut journal = open_journal();
        for i in 0..10 {
            journal
                .commit(&[JournalEntry::CheckpointSet(Checkpoint::new(format!("c{i}")))])
                .unwrap();
        }
        let before = journal.len_bytes().unwrap();

        journal
            .compact(&[JournalEntry::CheckpointSet(Checkpoint::new("c9"))])
            .unwrap();

        assert!(journal.len_bytes().unwrap() < before);
        let batches = journal.replay().unwrap();
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0x0000_0000);
    }
}
