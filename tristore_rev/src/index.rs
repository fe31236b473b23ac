//! In-memory indexes over the revision log, rebuilt by replay on open.
//!
//! Only change metadata and key mappings are held in memory; blob payloads
//! stay in the log and are read on demand by offset.

use crate::{
    hash::KeyHash,
    record::{ChangeKind, RepoId},
    Error, Result,
};
use log::warn;
use std::collections::{BTreeMap, HashMap};

/// A change log record: metadata of one snapshot, delta or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CSet {
    /// The client-supplied timestamp of the change.
    pub time: u64,
    /// Whether the change is a snapshot, a delta or a delete.
    pub kind: ChangeKind,
    /// The compressed payload length in bytes (0 for deletes).
    pub len: u32,
}

/// Maps key hashes back to the original keys.
///
/// Entries are written once at the first sighting of a key and never mutated
/// or deleted afterwards. Two distinct keys hashing to the same value is a
/// collision and refuses the write instead of corrupting the existing entry.
#[derive(Debug, Default)]
pub(crate) struct HashDirectory {
    entries: HashMap<KeyHash, String>,
}

impl HashDirectory {
    /// Checks that a mapping can be established (or already is) and returns
    /// whether it still needs to be inserted.
    pub fn ensure(&self, sha: KeyHash, key: &str) -> Result<bool> {
        match self.entries.get(&sha) {
            None => Ok(true),
            Some(existing) if existing == key => Ok(false),
            Some(_) => {
                warn!("refusing write: hash collision on {:?}", sha);
                Err(Error::Collision { hash: sha })
            }
        }
    }

    pub fn insert(&mut self, sha: KeyHash, key: String) {
        self.entries.insert(sha, key);
    }

    pub fn lookup(&self, sha: &KeyHash) -> Option<&str> {
        self.entries.get(sha).map(String::as_str)
    }
}

/// Per-(repo, key hash) chains of change records, ordered by time.
#[derive(Debug, Default)]
pub(crate) struct ChangeLog {
    chains: BTreeMap<(RepoId, KeyHash), Vec<CSet>>,
}

impl ChangeLog {
    /// Appends a change record, enforcing strictly increasing times per
    /// (repo, key hash).
    pub fn append(&mut self, repo: RepoId, sha: KeyHash, cset: CSet) -> Result<()> {
        let chain = self.chains.entry((repo, sha)).or_insert_with(Vec::new);
        if let Some(last) = chain.last() {
            if cset.time <= last.time {
                return Err(Error::NonMonotonic {
                    last: last.time,
                    requested: cset.time,
                });
            }
        }
        chain.push(cset);
        Ok(())
    }

    /// Returns the most recent change record for the key, if any.
    pub fn last(&self, repo: RepoId, sha: KeyHash) -> Option<CSet> {
        self.chains
            .get(&(repo, sha))
            .and_then(|chain| chain.last())
            .copied()
    }

    /// Returns the records needed to reconstruct the key's state at `ts`:
    /// everything from the most recent non-delta at or before `ts` up to and
    /// including `ts`. Empty if the key has no record at or before `ts`.
    pub fn chain_for_read(&self, repo: RepoId, sha: KeyHash, ts: u64) -> Vec<CSet> {
        let head = match self.chains.get(&(repo, sha)) {
            Some(chain) => &chain[..chain.partition_point(|c| c.time <= ts)],
            None => return Vec::new(),
        };
        let start = head
            .iter()
            .rposition(|c| c.kind != ChangeKind::Delta)
            .unwrap_or(0);
        head[start..].to_vec()
    }

    /// Like [`ChangeLog::chain_for_read`] without an upper time bound: the
    /// current delta chain, used to size it when deciding snapshot-vs-delta.
    pub fn chain_for_write(&self, repo: RepoId, sha: KeyHash) -> Vec<CSet> {
        let chain = match self.chains.get(&(repo, sha)) {
            Some(chain) => chain.as_slice(),
            None => return Vec::new(),
        };
        let start = chain
            .iter()
            .rposition(|c| c.kind != ChangeKind::Delta)
            .unwrap_or(0);
        chain[start..].to_vec()
    }

    /// Returns all change times for the key, newest first.
    pub fn times_desc(&self, repo: RepoId, sha: KeyHash) -> Vec<u64> {
        self.chains
            .get(&(repo, sha))
            .map(|chain| chain.iter().rev().map(|c| c.time).collect())
            .unwrap_or_default()
    }

    /// Returns one page of the key hashes live at `ts` in the repo, in hash
    /// order. Pages are 1-based and sliced before delete-tailed keys are
    /// filtered out, so a page may be shorter than `page_size` even when
    /// later pages are non-empty.
    pub fn index(&self, repo: RepoId, ts: u64, page: usize, page_size: usize) -> Vec<KeyHash> {
        let page = std::cmp::max(page, 1);
        self.chains
            .range((repo, KeyHash::MIN)..=(repo, KeyHash::MAX))
            .filter_map(|((_, sha), chain)| {
                match chain.partition_point(|c| c.time <= ts) {
                    0 => None,
                    at_or_before_ts => Some((*sha, chain[at_or_before_ts - 1].kind)),
                }
            })
            .skip((page - 1) * page_size)
            .take(page_size)
            .filter(|(_, kind)| *kind != ChangeKind::Delete)
            .map(|(sha, _)| sha)
            .collect()
    }
}

/// Maps blob coordinates to the log offset of the payload record.
#[derive(Debug, Default)]
pub(crate) struct BlobDirectory {
    offsets: HashMap<(RepoId, KeyHash, u64), u64>,
}

impl BlobDirectory {
    /// Registers a blob. Blobs are append-only, so a second blob at the same
    /// coordinates means the log is corrupt.
    pub fn insert(&mut self, repo: RepoId, sha: KeyHash, time: u64, offset: u64) -> Result<()> {
        if self.offsets.insert((repo, sha, time), offset).is_some() {
            return Err(Error::CorruptChain {
                reason: format!("duplicate blob at time {}", time),
            });
        }
        Ok(())
    }

    pub fn offset(&self, repo: RepoId, sha: KeyHash, time: u64) -> Option<u64> {
        self.offsets.get(&(repo, sha, time)).copied()
    }
}
