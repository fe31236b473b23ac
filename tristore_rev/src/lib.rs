//! # Versioned revision storage for RDF statement sets.
//!
//! This crate provides the revision engine of a versioned triple store:
//! named resources (opaque string keys, scoped by an integer repo id) whose
//! values are sets of RDF statements, with every change recorded at a
//! client-supplied, strictly increasing timestamp. A resource's state at any
//! past time can be reconstructed, its change times enumerated, and the set
//! of resources live at a given time paged through.
//!
//! Writes never overwrite old entries: each change is persisted either as a
//! full snapshot or as a compact patch against the previous state, appended
//! to a log-structured storage together with its metadata. A tunable
//! snapshot factor bounds how long delta chains may grow before a full
//! snapshot is forced, trading storage size against reconstruction cost.
//! In-memory indexes over the log (key mappings, per-key change chains, blob
//! offsets) are rebuilt by replaying the log on open; blob payloads stay in
//! the log and are streamed on demand.
//!
//! ## Features
//!
//!   - _fully versioned:_ every state a resource ever had stays readable
//!   - _compact:_ unchanged statements are not stored twice, snapshots are
//!     only taken when a delta chain grows too expensive
//!   - _durable:_ each mutation commits atomically; torn writes are rolled
//!     back on the next open
//!   - _storage-agnostic:_ backed by anything that can append, a file by
//!     default
//!
//! ## Example
//!
//! ```
//! use tristore_rev::{storage::MemoryStorage, PutOutcome, RevisionStore, Result, StatementSet};
//!
//! fn main() -> Result<()> {
//!     tokio::runtime::Runtime::new().unwrap().block_on(async {
//!         let store = RevisionStore::open(MemoryStorage::new()).await?;
//!
//!         let mut stmts = StatementSet::new();
//!         stmts.insert("<urn:s> <urn:p> <urn:o> .".to_string());
//!         assert_eq!(store.put(1, "urn:r", 10, &stmts).await?, PutOutcome::Created);
//!
//!         let mut changed = stmts.clone();
//!         changed.insert("<urn:s> <urn:p> <urn:o2> .".to_string());
//!         assert_eq!(store.put(1, "urn:r", 20, &changed).await?, PutOutcome::Created);
//!
//!         assert_eq!(store.get_at(1, "urn:r", 10).await?, Some(stmts));
//!         assert_eq!(store.get_at(1, "urn:r", 25).await?, Some(changed));
//!         assert_eq!(store.get_at(1, "urn:r", 9).await?, None);
//!         assert_eq!(store.timemap(1, "urn:r").await?, vec![20, 10]);
//!         Ok(())
//!     })
//! }
//! ```
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use crate::{
    hash::KeyHash,
    index::{BlobDirectory, ChangeLog, HashDirectory},
    record::Record,
    storage::Storage,
};
use crc32fast::Hasher;
use log::warn;
use tokio::sync::Mutex as AsyncMutex;

pub mod delta;
pub mod hash;
pub mod storage;

mod index;
mod record;

pub use delta::StatementSet;
pub use index::CSet;
pub use record::{ChangeKind, RepoId};

/// The error type for revision store operations.
#[derive(Debug)]
pub enum Error {
    /// Caused by storage read or write operations.
    Storage(storage::Error),
    /// A put or delete with a timestamp at or before the key's most recent
    /// change. Appended timestamps must be strictly increasing per key.
    NonMonotonic {
        /// The time of the key's most recent change.
        last: u64,
        /// The rejected timestamp.
        requested: u64,
    },
    /// Two distinct keys hash to the same value. The write is refused and
    /// the first key's data is left untouched.
    Collision {
        /// The contested key hash.
        hash: KeyHash,
    },
    /// A delete of a key that has never been written or is already deleted.
    NotFound,
    /// A chain that cannot be reconstructed: a malformed patch line, a
    /// missing blob, or inconsistent records.
    CorruptChain {
        /// The reason why the chain is corrupt.
        reason: String,
    },
    /// A log record had an invalid format.
    InvalidRecord {
        /// The reason why the record was invalid.
        reason: String,
    },
    /// A key or blob exceeded the maximum size supported by the log format.
    MaxSizeExceeded {
        /// The size of the key or blob in bytes.
        size: usize,
        /// The maximum supported size in bytes.
        max_size: usize,
    },
}

/// A specialized `Result` type for revision store operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Error::Storage(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(storage::Error::IoError(e))
    }
}

/// The result of a successful [`RevisionStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new change record (snapshot or delta) was appended.
    Created,
    /// The pushed state equals the current state; nothing was appended.
    Unchanged,
}

/// Tuning knobs of a revision store, read-only after open.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Determines whether a snapshot is stored rather than a delta,
    /// depending on the size of the latest snapshot and subsequent deltas.
    /// For the latest snapshot `base` and deltas `d1`, `d2`, ..., `dn` a new
    /// snapshot is definitely stored if:
    ///
    /// `snapshot_factor * len(base) <= len(d1) + len(d2) + ... + len(dn)`
    ///
    /// In short, larger values will result in longer delta chains and likely
    /// reduce storage size at the expense of higher revision reconstruction
    /// costs. Must be >= 1.
    pub snapshot_factor: f64,
    /// The number of keys per page returned by [`RevisionStore::index_at`].
    pub index_page_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            snapshot_factor: 10.0,
            index_page_size: 100,
        }
    }
}

/// A versioned store of statement sets, backed by an append-only log.
///
/// All operations are scoped by a repo id and address resources by opaque
/// string keys; internally keys are identified by their SHA-1 hash, with a
/// hash directory resolving hashes back to keys. Mutating operations append
/// a checksummed batch of records and are atomic: either the batch commits
/// completely or a later open rolls it back.
pub struct RevisionStore<S: Storage> {
    name: String,
    options: StoreOptions,
    storage: AsyncMutex<S>,
    state: AsyncMutex<State>,
}

#[derive(Default)]
struct State {
    hdir: HashDirectory,
    clog: ChangeLog,
    blobs: BlobDirectory,
    committed_len: u64,
}

impl State {
    fn apply(&mut self, record: Record, offset: u64) -> Result<()> {
        match record {
            Record::Mapping { sha, key } => {
                if self.hdir.ensure(sha, &key)? {
                    self.hdir.insert(sha, key);
                }
                Ok(())
            }
            Record::Change {
                repo,
                sha,
                time,
                kind,
                len,
            } => self.clog.append(repo, sha, CSet { time, kind, len }),
            Record::Payload {
                repo, sha, time, ..
            } => self.blobs.insert(repo, sha, time, offset),
            Record::Commit { .. } => Err(Error::InvalidRecord {
                reason: "commit frames cannot be applied as records".to_string(),
            }),
        }
    }
}

impl<S: Storage> RevisionStore<S> {
    /// Opens and replays a revision store from storage with default options.
    ///
    /// If no store exists at the storage location, a new store will be
    /// initialized. Otherwise the log is replayed into in-memory indexes;
    /// an uncommitted or corrupt tail (from a torn or cancelled write) is
    /// truncated so that only completely committed changes are observable.
    pub async fn open(storage: S) -> Result<Self> {
        Self::open_with(storage, StoreOptions::default()).await
    }

    /// Opens and replays a revision store with the specified options.
    pub async fn open_with(mut storage: S, options: StoreOptions) -> Result<Self> {
        let name = String::from(storage.name());
        let state = replay(&mut storage).await?;
        Ok(Self {
            name,
            options,
            storage: AsyncMutex::new(storage),
            state: AsyncMutex::new(state),
        })
    }

    /// Returns the (file-)name of the storage.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumes the store to return its underlying storage.
    pub fn into_storage(self) -> S {
        self.storage.into_inner()
    }

    /// Returns the total length of the storage in bytes.
    pub async fn len(&self) -> u64 {
        self.storage.lock().await.len()
    }

    /// Returns `true` if the storage is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Pushes a new state for the key at the specified timestamp.
    ///
    /// The state is persisted either as a full snapshot or as a patch
    /// against the previous state, whichever is smaller, except that a
    /// snapshot is forced whenever the accumulated delta chain has grown
    /// past [`StoreOptions::snapshot_factor`] times the base snapshot, and
    /// whenever there is no previous state to patch against (first write, or
    /// a write after a delete). Pushing a state equal to the current one
    /// appends nothing and returns [`PutOutcome::Unchanged`].
    pub async fn put(
        &self,
        repo: RepoId,
        key: &str,
        ts: u64,
        stmts: &StatementSet,
    ) -> Result<PutOutcome> {
        let sha = KeyHash::from_key(key);
        let mut state = self.state.lock().await;

        if let Some(last) = state.clog.last(repo, sha) {
            if ts <= last.time {
                return Err(Error::NonMonotonic {
                    last: last.time,
                    requested: ts,
                });
            }
        }
        let needs_mapping = state.hdir.ensure(sha, key)?;

        let chain = state.clog.chain_for_write(repo, sha);
        let snap_bytes = delta::compress(&delta::encode_snapshot(stmts))?;

        let patch_bytes = if chain.is_empty() || chain[0].kind == ChangeKind::Delete {
            // No previous state to patch against, a snapshot is stored
            // unconditionally.
            None
        } else {
            let entries = blob_entries(&state, repo, sha, &chain)?;
            let prev = self.load_chain(&entries).await?;
            if prev == *stmts {
                return Ok(PutOutcome::Unchanged);
            }
            Some(delta::compress(&delta::encode_patch(&prev, stmts))?)
        };

        // Accumulated size of the delta chain including the potential patch
        // from the previous to the pushed state.
        let acc = chain.iter().skip(1).map(|c| c.len as u64).sum::<u64>()
            + patch_bytes.as_ref().map_or(0, |p| p.len() as u64);
        let base = chain.first().map_or(0, |c| c.len as u64);

        let (kind, data) = match patch_bytes {
            Some(patch)
                if snap_bytes.len() > patch.len()
                    && self.options.snapshot_factor * base as f64 > acc as f64 =>
            {
                (ChangeKind::Delta, patch)
            }
            _ => (ChangeKind::Snapshot, snap_bytes),
        };

        let len = data.len() as u32;
        let mut records = Vec::with_capacity(3);
        if needs_mapping {
            records.push(Record::Mapping {
                sha,
                key: String::from(key),
            });
        }
        records.push(Record::Payload {
            repo,
            sha,
            time: ts,
            data,
        });
        records.push(Record::Change {
            repo,
            sha,
            time: ts,
            kind,
            len,
        });

        self.commit(&mut state, records).await?;
        Ok(PutOutcome::Created)
    }

    /// Appends a delete record hiding the key from `ts` on.
    ///
    /// Earlier states remain readable at their times. Fails with
    /// [`Error::NotFound`] if the key has never been written or its most
    /// recent change is already a delete.
    pub async fn delete(&self, repo: RepoId, key: &str, ts: u64) -> Result<()> {
        let sha = KeyHash::from_key(key);
        let mut state = self.state.lock().await;

        // The chain stored under this hash belongs to the key only if the
        // directory maps the hash to it; an unmapped key has no chain, a
        // mismatch means the hash is contested by another key.
        if state.hdir.ensure(sha, key)? {
            return Err(Error::NotFound);
        }

        let last = match state.clog.last(repo, sha) {
            None => return Err(Error::NotFound),
            Some(last) => last,
        };
        if ts <= last.time {
            return Err(Error::NonMonotonic {
                last: last.time,
                requested: ts,
            });
        }
        if last.kind == ChangeKind::Delete {
            return Err(Error::NotFound);
        }

        let records = vec![Record::Change {
            repo,
            sha,
            time: ts,
            kind: ChangeKind::Delete,
            len: 0,
        }];
        self.commit(&mut state, records).await
    }

    /// Reconstructs the key's state at `ts`.
    ///
    /// Returns `None` if the key had not been written at `ts` or was deleted
    /// at or before `ts`.
    pub async fn get_at(
        &self,
        repo: RepoId,
        key: &str,
        ts: u64,
    ) -> Result<Option<StatementSet>> {
        let sha = KeyHash::from_key(key);
        let entries = {
            let state = self.state.lock().await;
            let chain = state.clog.chain_for_read(repo, sha, ts);
            if chain.is_empty() || chain[0].kind == ChangeKind::Delete {
                return Ok(None);
            }
            blob_entries(&state, repo, sha, &chain)?
        };
        Ok(Some(self.load_chain(&entries).await?))
    }

    /// Returns all times at which the key changed, newest first.
    pub async fn timemap(&self, repo: RepoId, key: &str) -> Result<Vec<u64>> {
        let sha = KeyHash::from_key(key);
        let state = self.state.lock().await;
        Ok(state.clog.times_desc(repo, sha))
    }

    /// Returns one page of the keys live at `ts` in the repo, in key hash
    /// order. Pages are 1-based and [`StoreOptions::index_page_size`] keys
    /// wide; a key is live if its most recent change at or before `ts` is
    /// not a delete.
    pub async fn index_at(&self, repo: RepoId, ts: u64, page: usize) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        state
            .clog
            .index(repo, ts, page, self.options.index_page_size)
            .into_iter()
            .map(|sha| {
                state
                    .hdir
                    .lookup(&sha)
                    .map(String::from)
                    .ok_or_else(|| Error::CorruptChain {
                        reason: format!("no key mapping for {:?}", sha),
                    })
            })
            .collect()
    }

    /// Returns the most recent change record for the key, if any.
    pub async fn last_change(&self, repo: RepoId, key: &str) -> Result<Option<CSet>> {
        let sha = KeyHash::from_key(key);
        let state = self.state.lock().await;
        Ok(state.clog.last(repo, sha))
    }

    /// Appends the records plus a commit frame to the log, then applies them
    /// to the in-memory indexes.
    ///
    /// Any bytes past the last committed offset (left behind by a cancelled
    /// call) are rolled back first, so the batch lands directly after the
    /// committed log.
    async fn commit(&self, state: &mut State, records: Vec<Record>) -> Result<()> {
        let mut storage = self.storage.lock().await;
        if storage.len() > state.committed_len {
            warn!(
                "Rolling back {} uncommitted bytes in store {:?}",
                storage.len() - state.committed_len,
                self.name
            );
            storage.truncate(state.committed_len).await?;
        }

        let mut crc = Hasher::new();
        let mut offsets = Vec::with_capacity(records.len());
        for record in &records {
            let frame = record.encode()?;
            crc.update(&frame);
            offsets.push(storage.write(&frame).await?);
        }
        let commit = Record::Commit {
            crc: crc.finalize(),
        };
        storage.write(&commit.encode()?).await?;
        storage.flush().await?;
        state.committed_len = storage.len();
        drop(storage);

        for (record, offset) in records.into_iter().zip(offsets) {
            state.apply(record, offset)?;
        }
        Ok(())
    }

    /// Folds a chain of blobs into the statement set it encodes: the first
    /// blob is decoded as a snapshot, every further blob is applied as a
    /// patch. Blobs are streamed one at a time.
    async fn load_chain(&self, entries: &[(CSet, u64)]) -> Result<StatementSet> {
        let mut stmts = StatementSet::new();
        for (i, (cset, offset)) in entries.iter().enumerate() {
            let data = self.read_payload(*offset, *cset).await?;
            let text = delta::decompress(&data)?;
            if i == 0 {
                stmts = delta::decode_snapshot(&text);
            } else {
                delta::apply_patch(&mut stmts, &text)?;
            }
        }
        Ok(stmts)
    }

    async fn read_payload(&self, offset: u64, cset: CSet) -> Result<Vec<u8>> {
        let mut storage = self.storage.lock().await;
        let (record, _) = Record::read_from(&mut *storage, offset).await?;
        match record {
            Record::Payload { data, .. } => Ok(data),
            _ => Err(Error::CorruptChain {
                reason: format!("no payload record for change at time {}", cset.time),
            }),
        }
    }
}

/// Resolves each chain record to the log offset of its blob.
fn blob_entries(
    state: &State,
    repo: RepoId,
    sha: KeyHash,
    chain: &[CSet],
) -> Result<Vec<(CSet, u64)>> {
    chain
        .iter()
        .map(|cset| {
            state
                .blobs
                .offset(repo, sha, cset.time)
                .map(|offset| (*cset, offset))
                .ok_or_else(|| Error::CorruptChain {
                    reason: format!("missing blob for change at time {}", cset.time),
                })
        })
        .collect()
}

/// Replays the log into fresh in-memory indexes.
///
/// Records accumulate into a batch until a commit frame with a matching
/// CRC-32 applies them. A tail without a valid commit frame - a torn write,
/// a cancelled call, or plain corruption - is truncated away.
async fn replay<S: Storage>(storage: &mut S) -> Result<State> {
    let mut state = State::default();
    let mut batch: Vec<(Record, u64)> = Vec::new();
    let mut crc = Hasher::new();
    let mut offset = 0;
    let max_offset = storage.len();

    while offset < max_offset {
        let (record, frame_len) = match Record::read_from(storage, offset).await {
            Ok(read) => read,
            Err(_) => break,
        };
        match record {
            Record::Commit { crc: expected } => {
                if crc.clone().finalize() != expected {
                    break;
                }
                let committed = std::mem::take(&mut batch);
                for (record, record_offset) in committed {
                    state.apply(record, record_offset)?;
                }
                crc = Hasher::new();
                state.committed_len = offset + frame_len;
            }
            record => {
                crc.update(&record.encode()?);
                batch.push((record, offset));
            }
        }
        offset += frame_len;
    }

    if storage.len() > state.committed_len {
        warn!(
            "Truncating store {:?} to {} bytes, removing an uncommitted or corrupt tail",
            storage.name(),
            state.committed_len
        );
        storage.truncate(state.committed_len).await?;
    }
    Ok(state)
}
