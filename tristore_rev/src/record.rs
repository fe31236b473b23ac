//! Record framing for the append-only revision log.
//!
//! The log realizes the engine's three logical tables as typed records: key
//! mappings (hash directory), change metadata (change log) and blob payloads
//! (blob store). Every mutating operation appends its records followed by a
//! commit frame carrying a CRC-32 over the batch; replay only applies
//! complete, checksummed batches.

use crate::{
    hash::{KeyHash, KEY_HASH_LEN},
    storage::Storage,
    Error, Result,
};

/// Repo namespace identifier. Keys and all revision records are scoped by it.
pub type RepoId = u32;

const TAG_MAPPING: u8 = 0;
const TAG_CHANGE: u8 = 1;
const TAG_PAYLOAD: u8 = 2;
const TAG_COMMIT: u8 = 3;

const BYTES_REPO: usize = 4;
const BYTES_TIME: usize = 8;
const BYTES_LEN: usize = 4;
const BYTES_CHANGE_PAYLOAD: usize = BYTES_REPO + KEY_HASH_LEN + BYTES_TIME + 1 + BYTES_LEN;
const BYTES_PAYLOAD_HEAD: usize = BYTES_REPO + KEY_HASH_LEN + BYTES_TIME;
const BYTES_CRC: usize = 4;

const MAX_KEY_SIZE: usize = 1 << 16;
const MAX_BLOB_SIZE: usize = 1 << 30;

/// The kind of change a [`CSet`](crate::CSet) record describes.
///
/// The wire values are stable: existing logs rely on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A self-contained encoding of a full statement set.
    Snapshot = 0,
    /// A patch transforming the previous state into the next one.
    Delta = 1,
    /// A tombstone hiding the key from this time on. Carries no blob.
    Delete = 2,
}

impl ChangeKind {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(ChangeKind::Snapshot),
            1 => Ok(ChangeKind::Delta),
            2 => Ok(ChangeKind::Delete),
            _ => Err(Error::InvalidRecord {
                reason: format!("unknown change kind {}", byte),
            }),
        }
    }
}

/// A single framed record in the revision log.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A hash directory entry mapping a key hash back to the original key.
    /// Written once, before the key's first change record.
    Mapping {
        /// The hash of the key.
        sha: KeyHash,
        /// The original key.
        key: String,
    },
    /// A change log entry: metadata of one snapshot, delta or delete.
    Change {
        /// The repo the change is scoped by.
        repo: RepoId,
        /// The hash of the changed key.
        sha: KeyHash,
        /// The client-supplied timestamp of the change.
        time: u64,
        /// Whether the change is a snapshot, a delta or a delete.
        kind: ChangeKind,
        /// The compressed payload length in bytes (0 for deletes).
        len: u32,
    },
    /// A blob store entry holding the compressed snapshot or patch bytes for
    /// a non-delete change at the same coordinates.
    Payload {
        /// The repo the blob is scoped by.
        repo: RepoId,
        /// The hash of the key the blob belongs to.
        sha: KeyHash,
        /// The timestamp of the change the blob belongs to.
        time: u64,
        /// The compressed payload bytes.
        data: Vec<u8>,
    },
    /// A commit frame ending a batch of records.
    Commit {
        /// CRC-32 over the encoded frames of all records since the last
        /// commit frame.
        crc: u32,
    },
}

// BITS IN THE RECORD HEADER BYTE:
//
// 0b___000_00_000
//       ||| || \\\__ bytes required to store the payload size (1-4 bytes)
//       ||| \\______ record kind (mapping, change, payload, commit)
//       \\\_________ flags reserved for later use
impl Record {
    /// Encodes the record as a frame: header byte, payload size, payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.encode_payload()?;
        let bytes_payload_size = bytes_required_for(payload.len(), 4)?;
        let mut frame = Vec::with_capacity(1 + bytes_payload_size as usize + payload.len());
        frame.push((self.tag() << 3) | bytes_payload_size);
        frame.extend_from_slice(&payload.len().to_le_bytes()[..bytes_payload_size as usize]);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Reads the record framed at the specified offset and returns it
    /// together with the total frame length in bytes.
    pub async fn read_from<S: Storage>(storage: &mut S, offset: u64) -> Result<(Self, u64)> {
        let max_length = storage.len();
        if offset >= max_length {
            return Err(Error::InvalidRecord {
                reason: "record offset exceeds storage bounds".to_string(),
            });
        }
        let available = max_length - offset;
        let head_len = std::cmp::min(5, available) as u32;
        let head = storage.read(offset, head_len).await?;
        let header = head[0];
        let tag = header >> 3;
        let bytes_payload_size = (header & 0b111) as usize;
        if bytes_payload_size == 0 || bytes_payload_size > 4 {
            return Err(Error::InvalidRecord {
                reason: format!("invalid payload size width {}", bytes_payload_size),
            });
        }
        if head.len() < 1 + bytes_payload_size {
            return Err(Error::InvalidRecord {
                reason: "truncated record header".to_string(),
            });
        }
        let payload_size = u32_from_bytes(&head[1..1 + bytes_payload_size])? as u64;
        let frame_len = 1 + bytes_payload_size as u64 + payload_size;
        if offset + frame_len > max_length {
            return Err(Error::InvalidRecord {
                reason: "record extends past the end of storage".to_string(),
            });
        }
        let payload = storage
            .read(offset + 1 + bytes_payload_size as u64, payload_size as u32)
            .await?;
        let record = Self::decode_payload(tag, &payload)?;
        Ok((record, frame_len))
    }

    fn tag(&self) -> u8 {
        match self {
            Record::Mapping { .. } => TAG_MAPPING,
            Record::Change { .. } => TAG_CHANGE,
            Record::Payload { .. } => TAG_PAYLOAD,
            Record::Commit { .. } => TAG_COMMIT,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            Record::Mapping { sha, key } => {
                if key.len() > MAX_KEY_SIZE {
                    return Err(Error::MaxSizeExceeded {
                        size: key.len(),
                        max_size: MAX_KEY_SIZE,
                    });
                }
                let mut payload = Vec::with_capacity(KEY_HASH_LEN + key.len());
                payload.extend_from_slice(sha.as_bytes());
                payload.extend_from_slice(key.as_bytes());
                Ok(payload)
            }
            Record::Change {
                repo,
                sha,
                time,
                kind,
                len,
            } => {
                let mut payload = Vec::with_capacity(BYTES_CHANGE_PAYLOAD);
                payload.extend_from_slice(&repo.to_le_bytes());
                payload.extend_from_slice(sha.as_bytes());
                payload.extend_from_slice(&time.to_le_bytes());
                payload.push(*kind as u8);
                payload.extend_from_slice(&len.to_le_bytes());
                Ok(payload)
            }
            Record::Payload {
                repo,
                sha,
                time,
                data,
            } => {
                if data.len() > MAX_BLOB_SIZE {
                    return Err(Error::MaxSizeExceeded {
                        size: data.len(),
                        max_size: MAX_BLOB_SIZE,
                    });
                }
                let mut payload = Vec::with_capacity(BYTES_PAYLOAD_HEAD + data.len());
                payload.extend_from_slice(&repo.to_le_bytes());
                payload.extend_from_slice(sha.as_bytes());
                payload.extend_from_slice(&time.to_le_bytes());
                payload.extend_from_slice(data);
                Ok(payload)
            }
            Record::Commit { crc } => Ok(crc.to_le_bytes().to_vec()),
        }
    }

    fn decode_payload(tag: u8, payload: &[u8]) -> Result<Self> {
        match tag {
            TAG_MAPPING => {
                if payload.len() < KEY_HASH_LEN {
                    return Err(Error::InvalidRecord {
                        reason: "mapping record shorter than a key hash".to_string(),
                    });
                }
                let sha = key_hash_at(payload, 0);
                let key = String::from_utf8(payload[KEY_HASH_LEN..].to_vec()).map_err(|_| {
                    Error::InvalidRecord {
                        reason: "mapping key is not valid UTF-8".to_string(),
                    }
                })?;
                Ok(Record::Mapping { sha, key })
            }
            TAG_CHANGE => {
                if payload.len() != BYTES_CHANGE_PAYLOAD {
                    return Err(Error::InvalidRecord {
                        reason: format!("change record with length {}", payload.len()),
                    });
                }
                let repo = u32_from_bytes(&payload[..BYTES_REPO])?;
                let sha = key_hash_at(payload, BYTES_REPO);
                let time_at = BYTES_REPO + KEY_HASH_LEN;
                let time = u64_from_bytes(&payload[time_at..time_at + BYTES_TIME])?;
                let kind = ChangeKind::from_u8(payload[time_at + BYTES_TIME])?;
                let len = u32_from_bytes(&payload[time_at + BYTES_TIME + 1..])?;
                Ok(Record::Change {
                    repo,
                    sha,
                    time,
                    kind,
                    len,
                })
            }
            TAG_PAYLOAD => {
                if payload.len() < BYTES_PAYLOAD_HEAD {
                    return Err(Error::InvalidRecord {
                        reason: "payload record shorter than its coordinates".to_string(),
                    });
                }
                let repo = u32_from_bytes(&payload[..BYTES_REPO])?;
                let sha = key_hash_at(payload, BYTES_REPO);
                let time_at = BYTES_REPO + KEY_HASH_LEN;
                let time = u64_from_bytes(&payload[time_at..time_at + BYTES_TIME])?;
                let data = payload[BYTES_PAYLOAD_HEAD..].to_vec();
                Ok(Record::Payload {
                    repo,
                    sha,
                    time,
                    data,
                })
            }
            TAG_COMMIT => {
                if payload.len() != BYTES_CRC {
                    return Err(Error::InvalidRecord {
                        reason: format!("commit record with length {}", payload.len()),
                    });
                }
                let crc = u32_from_bytes(payload)?;
                Ok(Record::Commit { crc })
            }
            _ => Err(Error::InvalidRecord {
                reason: format!("unknown record tag {}", tag),
            }),
        }
    }
}

fn key_hash_at(payload: &[u8], at: usize) -> KeyHash {
    let mut sha = [0; KEY_HASH_LEN];
    sha.copy_from_slice(&payload[at..at + KEY_HASH_LEN]);
    KeyHash(sha)
}

fn u64_from_bytes(bytes: &[u8]) -> Result<u64> {
    if bytes.len() > 8 {
        Err(Error::InvalidRecord {
            reason: format!("expected at most 8 int bytes, found {}", bytes.len()),
        })
    } else {
        let mut buf = [0; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }
}

fn u32_from_bytes(bytes: &[u8]) -> Result<u32> {
    if bytes.len() > 4 {
        Err(Error::InvalidRecord {
            reason: format!("expected at most 4 int bytes, found {}", bytes.len()),
        })
    } else {
        let mut buf = [0; 4];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(u32::from_le_bytes(buf))
    }
}

fn bytes_required_for(n: usize, max_bytes: u8) -> Result<u8> {
    let zero: usize = 0;
    let bit_length = zero.leading_zeros() - n.leading_zeros();
    let mut bytes_required = (bit_length / 8) as u8;
    if bit_length == 0 || bit_length % 8 != 0 {
        bytes_required += 1;
    };
    if bytes_required > max_bytes {
        Err(Error::MaxSizeExceeded {
            size: n,
            max_size: 1 << (max_bytes * 8),
        })
    } else {
        Ok(bytes_required)
    }
}
