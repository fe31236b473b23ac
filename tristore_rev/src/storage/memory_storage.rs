//! An in-memory storage backed by a `Vec<u8>`.

use super::{Result, Storage};
use async_trait::async_trait;

/// An in-memory storage backed by a `Vec<u8>`.
pub struct MemoryStorage {
    name: String,
    bytes: Vec<u8>,
}

impl MemoryStorage {
    /// Creates an empty in-memory storage with the name `""`.
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    /// Creates an in-memory storage filled with the specified bytes and the
    /// name `""`.
    pub fn from(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: "".to_string(),
            bytes: bytes.into(),
        }
    }

    /// Consumes the storage and returns its contents.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Storage for MemoryStorage {
    async fn open<'a>(name: impl Into<String> + 'a) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            bytes: Vec::new(),
        })
    }

    async fn purge<'a>(_name: impl Into<String> + 'a) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    async fn read(&mut self, offset: u64, bytes: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0; bytes as usize];
        let offset = offset as usize;
        if offset < self.bytes.len() {
            let available = std::cmp::min(bytes as usize, self.bytes.len() - offset);
            buf[..available].copy_from_slice(&self.bytes[offset..offset + available]);
        }
        Ok(buf)
    }

    async fn write(&mut self, buffer: &[u8]) -> Result<u64> {
        let offset = self.bytes.len() as u64;
        self.bytes.extend(buffer);
        Ok(offset)
    }

    async fn truncate(&mut self, offset: u64) -> Result<()> {
        self.bytes.resize(offset as usize, 0);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
