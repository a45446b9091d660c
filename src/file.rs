//! Open file handles.
//!
//! Reads on a read-only handle go straight to the backend as range reads.
//! Writable handles keep the whole content in memory and upload it on
//! [`File::close`], using whichever upload style the provider supports.

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::instrument::Instrumentation;
use crate::provider::{ObjectInfo, StorageProvider, UploadMode};
use crate::{Error, Result};

/// Options for [`crate::CloudFileSystem::open_file`], modelled on
/// `std::fs::OpenOptions`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
    pub create_new: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    pub(crate) fn access(&self) -> Access {
        let writable = self.write || self.append;
        match (self.read, writable) {
            (_, false) => Access::ReadOnly,
            (false, true) => Access::WriteOnly,
            (true, true) => Access::ReadWrite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(&self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn writable(&self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

/// Largest content a writable handle buffers, the size limit of a single
/// S3 `PutObject`.
pub const MAX_BUFFERED_SIZE: u64 = 5 * 1024 * 1024 * 1024;

fn clamp_offset(offset: i128) -> i64 {
    i64::try_from(offset).unwrap_or(if offset < 0 { i64::MIN } else { i64::MAX })
}

pub struct File<P: StorageProvider> {
    provider: Arc<P>,
    instrumentation: Arc<Instrumentation>,
    name: String,
    access: Access,
    append: bool,
    cursor: u64,
    size: u64,
    modified: DateTime<Utc>,
    /// Size of the object in the store, `None` until it exists there.
    remote_size: Option<u64>,
    /// Whole content of a writable handle.
    buffer: Vec<u8>,
    dirty: bool,
    closed: bool,
}

impl<P: StorageProvider> File<P> {
    pub(crate) fn reader(
        provider: Arc<P>,
        instrumentation: Arc<Instrumentation>,
        info: ObjectInfo,
    ) -> Self {
        Self {
            provider,
            instrumentation,
            access: Access::ReadOnly,
            append: false,
            cursor: 0,
            size: info.size,
            modified: info.last_modified,
            remote_size: Some(info.size),
            name: info.name,
            buffer: Vec::new(),
            dirty: false,
            closed: false,
        }
    }

    /// A writable handle over `content`. A handle for an object that does
    /// not exist yet starts dirty so that closing it creates the object.
    pub(crate) fn writer(
        provider: Arc<P>,
        instrumentation: Arc<Instrumentation>,
        name: String,
        options: OpenOptions,
        remote_size: Option<u64>,
        content: Vec<u8>,
    ) -> Self {
        let size = content.len() as u64;
        Self {
            provider,
            instrumentation,
            name,
            access: options.access(),
            append: options.append,
            cursor: if options.append { size } else { 0 },
            size,
            modified: Utc::now(),
            dirty: remote_size.is_none(),
            remote_size,
            buffer: content,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn access(&self) -> Access {
        self.access
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::FileClosed(self.name.clone()));
        }
        Ok(())
    }

    fn ensure_readable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.access.readable() {
            return Err(Error::WriteOnly(self.name.clone()));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.access.writable() {
            return Err(Error::ReadOnly(self.name.clone()));
        }
        Ok(())
    }

    /// Reads at the cursor and advances it. `Ok(0)` means end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(buf, self.cursor).await?;
        self.cursor += n as u64;
        Ok(n)
    }

    /// Reads at `offset` without moving the cursor.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.ensure_readable()?;
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let len = (self.size - offset).min(buf.len() as u64);

        if self.access.writable() {
            let start = offset as usize;
            let end = start + len as usize;
            buf[..len as usize].copy_from_slice(&self.buffer[start..end]);
            return Ok(len as usize);
        }

        let data = self
            .instrumentation
            .observe(
                "READ_RANGE",
                &self.name,
                self.provider.read_range(&self.name, offset, len),
            )
            .await?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    /// Writes at the cursor (at the end in append mode) and advances it.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.append {
            self.cursor = self.size;
        }
        let n = self.write_at(data, self.cursor).await?;
        self.cursor += n as u64;
        Ok(n)
    }

    /// Writes at `offset`, zero-filling any gap past the current end.
    pub async fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        self.ensure_writable()?;
        let invalid = || Error::InvalidOffset(clamp_offset(i128::from(offset)));
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_BUFFERED_SIZE)
            .ok_or_else(invalid)?;
        let (Ok(start), Ok(end)) = (usize::try_from(offset), usize::try_from(end)) else {
            return Err(invalid());
        };
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[start..end].copy_from_slice(data);
        self.size = self.buffer.len() as u64;
        self.modified = Utc::now();
        self.dirty = true;
        Ok(data.len())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(self.cursor) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.size) + i128::from(delta),
        };
        self.cursor =
            u64::try_from(target).map_err(|_| Error::InvalidOffset(clamp_offset(target)))?;
        Ok(self.cursor)
    }

    /// `seek` with a numeric whence: 0 start, 1 current, 2 end.
    pub fn seek_whence(&mut self, offset: i64, whence: i32) -> Result<u64> {
        let pos = match whence {
            0 if offset < 0 => return Err(Error::InvalidOffset(offset)),
            0 => SeekFrom::Start(offset as u64),
            1 => SeekFrom::Current(offset),
            2 => SeekFrom::End(offset),
            other => return Err(Error::InvalidWhence(other)),
        };
        self.seek(pos)
    }

    /// Uploads pending writes and closes the handle. Closing twice is a
    /// no-op; a failed upload leaves the handle open so close can be retried.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.dirty {
            self.flush().await?;
        }
        self.closed = true;
        self.buffer = Vec::new();
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let len = self.buffer.len() as u64;
        let data = Bytes::copy_from_slice(&self.buffer);
        let inst = &self.instrumentation;
        let (provider, name) = (&self.provider, self.name.as_str());

        match provider.upload_mode() {
            UploadMode::WholeObject => {
                inst.observe("WRITE", name, provider.write_object(name, data))
                    .await?;
            }
            UploadMode::Ranged => {
                match self.remote_size {
                    None => {
                        inst.observe("CREATE", name, provider.create_file(name, len))
                            .await?;
                    }
                    Some(remote) if len > remote => {
                        inst.observe("RESIZE", name, provider.resize_file(name, len))
                            .await?;
                    }
                    Some(_) => {}
                }
                if len > 0 {
                    inst.observe("WRITE_RANGE", name, provider.write_range(name, 0, data))
                        .await?;
                }
            }
        }

        self.remote_size = Some(len);
        self.dirty = false;
        Ok(())
    }
}

impl<P: StorageProvider> Drop for File<P> {
    fn drop(&mut self) {
        if !self.closed && self.dirty {
            self.instrumentation
                .logger
                .warn(&format!("file {} dropped without close, pending writes lost", self.name));
        }
    }
}

impl<P: StorageProvider> std::fmt::Debug for File<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("access", &self.access)
            .field("cursor", &self.cursor)
            .field("size", &self.size)
            .field("dirty", &self.dirty)
            .field("closed", &self.closed)
            .finish()
    }
}
