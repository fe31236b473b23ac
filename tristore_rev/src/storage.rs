//! A storage backend abstraction for revision stores, similar to an
//! append-only file.
pub mod file_storage;
pub mod memory_storage;

use async_trait::async_trait;
use std::io;

pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;

/// Opens a file storage with the specified name (and creates it if none
/// exists).
pub async fn open(name: impl Into<String>) -> Result<FileStorage> {
    FileStorage::open(name).await
}

/// Deletes the file storage.
pub async fn purge(name: impl Into<String>) -> Result<()> {
    FileStorage::purge(name).await
}

/// A specialized `Result` type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An append-only storage backend for revision stores.
///
/// The revision log only ever appends: `truncate` exists solely to roll back
/// incomplete writes at the end of the storage, never to rewrite history.
#[async_trait(?Send)]
pub trait Storage: Sized {
    /// Opens a storage with the specified name (and creates it if none exists).
    async fn open<'a>(name: impl Into<String> + 'a) -> Result<Self>;

    /// Deletes the storage and all its contents.
    async fn purge<'a>(name: impl Into<String> + 'a) -> Result<()>;

    /// Returns the name of the storage.
    fn name(&self) -> &str;

    /// Returns the total length of the storage in bytes.
    fn len(&self) -> u64;

    /// Reads the specified number of bytes starting at the specified offset.
    ///
    /// If the storage ends before the expected number of bytes could be read,
    /// the rest of the resulting bytes will all be 0, but no error is
    /// returned.
    async fn read(&mut self, offset: u64, bytes: u32) -> Result<Vec<u8>>;

    /// Appends the buffer to the end of the storage and returns the offset at
    /// which the first byte was written.
    async fn write(&mut self, buffer: &[u8]) -> Result<u64>;

    /// Truncates the storage to the specified length.
    ///
    /// Bytes after the specified offset do not have to be zeroed. Later
    /// writes will eventually overwrite these bytes, so it is up to the
    /// storage implementations whether zeroing takes place or not.
    async fn truncate(&mut self, offset: u64) -> Result<()>;

    /// Flushes all writes to disk.
    async fn flush(&mut self) -> Result<()>;

    /// Checks whether the storage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The error type for storage operations (wraps [`std::io::Error`]).
#[derive(Debug)]
pub enum Error {
    /// Caused by file IO, only returned by file storage.
    IoError(io::Error),
    /// Caused by an offset greater than the current storage length.
    OffsetError {
        /// The offset requested / expected by the operation.
        offset: u64,
        /// The maximum length and thus the maximum possible offset.
        max_length: u64,
    },
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Wraps a test fn in a harness that sets up logging, an async runtime and a
/// fresh file-backed storage (purged before and after the test).
#[macro_export]
macro_rules! test {
    (async fn $test_name:ident($storage:ident) -> $ret:ty $test:block) => {
        #[test]
        fn $test_name() -> $ret {
            let _ignored = env_logger::builder()
                .is_test(true)
                .filter_level(log::LevelFilter::Info)
                .try_init();
            tokio::runtime::Runtime::new().unwrap().block_on(async {
                let file = std::path::Path::new(file!())
                    .file_stem()
                    .unwrap()
                    .to_str()
                    .unwrap();
                let name = format!("{}_{}", file, line!());
                $crate::storage::purge(&name).await?;

                let mut $storage = $crate::storage::open(&name).await?;
                $test

                $crate::storage::purge(&name).await?;
                Ok(())
            })
        }
    };
}
