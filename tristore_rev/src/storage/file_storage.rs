//! A storage backend for revision stores backed by async file IO.

use super::{Error, Result, Storage};

use async_trait::async_trait;
use std::{cmp::min, io, path::Path};
use tokio::fs::{remove_file, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// A storage backend for revision stores backed by a file.
pub struct FileStorage {
    name: String,
    len: u64,
    file: File,
}

#[async_trait(?Send)]
impl Storage for FileStorage {
    async fn open<'a>(name: impl Into<String> + 'a) -> Result<Self> {
        let name = name.into();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(file_name(&name))
            .await?;
        let len = file.metadata().await?.len();
        Ok(Self { name, len, file })
    }

    async fn purge<'a>(name: impl Into<String> + 'a) -> Result<()> {
        let path = file_name(&name.into());
        if Path::new(&path).exists() {
            remove_file(&path).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    async fn read(&mut self, offset: u64, bytes: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0; bytes as usize];
        if offset >= self.len {
            return Ok(buf);
        }
        let bytes_to_read = min(bytes as u64, self.len - offset) as usize;
        self.file.seek(io::SeekFrom::Start(offset)).await?;
        self.file.read_exact(&mut buf[..bytes_to_read]).await?;
        Ok(buf)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<u64> {
        let offset = self.len;
        self.file.seek(io::SeekFrom::Start(offset)).await?;
        self.file.write_all(buf).await?;
        self.file.flush().await?;
        self.len += buf.len() as u64;
        Ok(offset)
    }

    async fn truncate(&mut self, offset: u64) -> Result<()> {
        let max_length = self.len();
        if offset > max_length {
            Err(Error::OffsetError { offset, max_length })
        } else {
            self.file.set_len(offset).await?;
            self.len = offset;
            self.flush().await?;
            Ok(())
        }
    }

    async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

fn file_name(name: &str) -> String {
    String::from(name) + ".rlog"
}
