//! Snapshot and patch codecs for statement sets.
//!
//! A snapshot is the full statement set, one statement per line. A patch is a
//! sequence of `D <stmt>` / `A <stmt>` lines transforming one statement set
//! into the next. Both encodings sort their lines so that encoding the same
//! transition always produces identical bytes, and both are zlib-compressed
//! before they are stored.

use crate::{Error, Result};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::collections::HashSet;
use std::io::{Read, Write};

/// A set of RDF statement strings, the value of a key at a point in time.
///
/// Statements are opaque to the engine; equality is byte-equality and
/// duplicates collapse.
pub type StatementSet = HashSet<String>;

/// Encodes a full statement set, one statement per line in lexicographic
/// order.
pub fn encode_snapshot(stmts: &StatementSet) -> String {
    let mut lines: Vec<&str> = stmts.iter().map(String::as_str).collect();
    lines.sort_unstable();
    lines.join("\n")
}

/// Decodes a snapshot back into a statement set.
///
/// Tolerates a trailing newline; empty lines are not statements.
pub fn decode_snapshot(text: &str) -> StatementSet {
    text.lines()
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Encodes the transition from `prev` to `next` as a patch: deleted
/// statements first, then added statements, each group in lexicographic
/// order.
pub fn encode_patch(prev: &StatementSet, next: &StatementSet) -> String {
    let mut removed: Vec<&str> = prev.difference(next).map(String::as_str).collect();
    removed.sort_unstable();
    let mut added: Vec<&str> = next.difference(prev).map(String::as_str).collect();
    added.sort_unstable();

    let mut lines = Vec::with_capacity(removed.len() + added.len());
    for stmt in removed {
        lines.push(format!("D {}", stmt));
    }
    for stmt in added {
        lines.push(format!("A {}", stmt));
    }
    lines.join("\n")
}

/// Applies a patch to a statement set in place.
///
/// Lines prefixed with `A ` insert the remainder, lines prefixed with `D `
/// remove it; any other prefix fails with a corrupt chain error.
pub fn apply_patch(stmts: &mut StatementSet, patch: &str) -> Result<()> {
    for line in patch.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(stmt) = line.strip_prefix("A ") {
            stmts.insert(stmt.to_string());
        } else if let Some(stmt) = line.strip_prefix("D ") {
            stmts.remove(stmt);
        } else {
            return Err(Error::CorruptChain {
                reason: format!("malformed patch line {:?}", line),
            });
        }
    }
    Ok(())
}

/// Compresses encoded text with zlib.
pub fn compress(text: &str) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Decompresses a stored blob back into its encoded text.
pub fn decompress(data: &[u8]) -> Result<String> {
    let mut text = String::new();
    ZlibDecoder::new(data)
        .read_to_string(&mut text)
        .map_err(|e| Error::CorruptChain {
            reason: format!("could not decompress blob: {}", e),
        })?;
    Ok(text)
}
