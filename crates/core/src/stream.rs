//! File-like streams over downloads and uploads
//!
//! `ObjectReader` turns sequential reads and seeks into ranged requests of
//! `read_buffer_size` bytes. `ObjectWriter` coalesces small writes before
//! handing them to the upload channel.

use std::io::SeekFrom;

use bytes::{Bytes, BytesMut};

use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::traits::ObjectMetadata;
use crate::upload::Uploader;

/// How to open a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl std::str::FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" | "rb" => Ok(OpenMode::Read),
            "w" | "wb" => Ok(OpenMode::Write),
            _ => Err(Error::General(format!("Invalid file open mode: {s}"))),
        }
    }
}

/// Buffered sequential reader
pub struct ObjectReader {
    downloader: Downloader,
    read_buffer_size: usize,
    position: u64,
    buffer: Bytes,
    buffer_start: u64,
}

impl ObjectReader {
    pub fn new(downloader: Downloader, read_buffer_size: usize) -> Self {
        Self {
            downloader,
            read_buffer_size: read_buffer_size.max(1),
            position: 0,
            buffer: Bytes::new(),
            buffer_start: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.downloader.size()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn metadata(&self) -> &ObjectMetadata {
        self.downloader.metadata()
    }

    /// Read into `buf`, returning 0 at end of object
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if buf.is_empty() || self.position >= size {
            return Ok(0);
        }

        let buffer_end = self.buffer_start + self.buffer.len() as u64;
        if self.position < self.buffer_start || self.position >= buffer_end {
            let end = size.min(self.position + self.read_buffer_size as u64);
            self.buffer = self.downloader.get_range(self.position, end).await?;
            self.buffer_start = self.position;
        }

        let offset = (self.position - self.buffer_start) as usize;
        let available = &self.buffer[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        Ok(n)
    }

    /// Read everything from the current position to the end
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let remaining = self.size().saturating_sub(self.position) as usize;
        let mut out = vec![0u8; remaining];
        let mut filled = 0;
        while filled < remaining {
            let n = self.read(&mut out[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        Ok(out)
    }

    /// Move the read position; seeking past the end is allowed
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        self.position = target.ok_or_else(|| {
            Error::InvalidRange(format!("seek before start of {}", self.downloader.path()))
        })?;
        Ok(self.position)
    }
}

/// Buffered append-only writer
pub struct ObjectWriter {
    uploader: Uploader,
    buffer: BytesMut,
    buffer_size: usize,
    bytes_written: u64,
    closed: bool,
}

impl ObjectWriter {
    pub fn new(uploader: Uploader, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            uploader,
            buffer: BytesMut::with_capacity(buffer_size),
            buffer_size,
            bytes_written: 0,
            closed: false,
        }
    }

    /// Bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::Closed(format!(
                "write to {} after close",
                self.uploader.path()
            )));
        }
        self.buffer.extend_from_slice(data);
        self.bytes_written += data.len() as u64;
        if self.buffer.len() >= self.buffer_size {
            self.flush().await?;
        }
        Ok(data.len())
    }

    /// Hand buffered bytes to the upload
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let data = self.buffer.split().freeze();
        self.uploader.put(data).await
    }

    /// Flush and wait for the upload to finish
    pub async fn close(&mut self) -> Result<Option<ObjectMetadata>> {
        let flushed = if self.closed {
            Ok(())
        } else {
            self.closed = true;
            self.flush().await
        };
        // an upload failure takes precedence over the flush error it caused
        let metadata = self.uploader.finish().await?.cloned();
        flushed?;
        Ok(metadata)
    }
}

/// Stream returned by `GcsIo::open`
pub enum GcsStream {
    Reader(ObjectReader),
    Writer(ObjectWriter),
}

impl GcsStream {
    pub fn into_reader(self) -> Option<ObjectReader> {
        match self {
            GcsStream::Reader(r) => Some(r),
            GcsStream::Writer(_) => None,
        }
    }

    pub fn into_writer(self) -> Option<ObjectWriter> {
        match self {
            GcsStream::Writer(w) => Some(w),
            GcsStream::Reader(_) => None,
        }
    }
}
