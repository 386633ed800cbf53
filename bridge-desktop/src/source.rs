//! Byte sources backed by memory and by the local filesystem.

use bridge_traits::{error::Result, BridgeError, ByteSource};
use bytes::Bytes;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// In-memory [`ByteSource`].
///
/// Cloning the underlying [`Bytes`] is cheap, so many sources can share one
/// encoded stream.
#[derive(Debug, Clone)]
pub struct MemoryByteSource {
    data: Bytes,
    position: usize,
    read_limit: Option<usize>,
    name: String,
    closed: bool,
}

impl MemoryByteSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            read_limit: None,
            name: "memory".to_string(),
            closed: false,
        }
    }

    /// Return at most `limit` bytes per `read` call.
    pub fn with_read_limit(mut self, limit: usize) -> Self {
        self.read_limit = Some(limit.max(1));
        self
    }

    /// Name reported by [`ByteSource::describe`].
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ByteSource for MemoryByteSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Ok(0);
        }
        let mut n = buf.len().min(self.remaining());
        if let Some(limit) = self.read_limit {
            n = n.min(limit);
        }
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn reset(&mut self) -> Result<()> {
        self.position = 0;
        self.closed = false;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn describe(&self) -> String {
        format!("{} ({} bytes)", self.name, self.data.len())
    }
}

/// [`ByteSource`] reading a file from disk.
///
/// The file is opened eagerly so a missing path fails at construction.
/// `close` drops the handle; `reset` reopens it when needed.
#[derive(Debug)]
pub struct FileByteSource {
    path: PathBuf,
    file: Option<File>,
}

impl FileByteSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            BridgeError::OperationFailed(format!("Failed to open {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Opened file source");
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl ByteSource for FileByteSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.file.as_mut() {
            Some(file) => Ok(file.read(buf)?),
            None => Ok(0),
        }
    }

    fn reset(&mut self) -> Result<()> {
        match self.file.as_mut() {
            Some(file) => {
                file.seek(SeekFrom::Start(0))?;
            }
            None => {
                self.file = Some(File::open(&self.path)?);
                debug!(path = %self.path.display(), "Reopened file source");
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), "Closed file source");
        }
    }

    fn describe(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn drain(source: &mut dyn ByteSource, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn test_memory_source_reads_everything() {
        let mut source = MemoryByteSource::new(vec![1u8, 2, 3, 4, 5]);
        assert_eq!(drain(&mut source, 2), vec![1, 2, 3, 4, 5]);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_memory_source_read_limit() {
        let mut source = MemoryByteSource::new(vec![7u8; 10]).with_read_limit(3);
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(source.remaining(), 7);
    }

    #[test]
    fn test_memory_source_close_and_reset() {
        let mut source = MemoryByteSource::new(vec![1u8, 2, 3]).with_name("clip");
        let mut buf = [0u8; 2];
        source.read(&mut buf).unwrap();
        source.close();
        assert!(source.is_closed());
        assert_eq!(source.read(&mut buf).unwrap(), 0);

        source.reset().unwrap();
        assert_eq!(drain(&mut source, 4), vec![1, 2, 3]);
        assert_eq!(source.describe(), "clip (3 bytes)");
    }

    #[test]
    fn test_file_source_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileByteSource::open(dir.path().join("missing.ogg"));
        assert!(matches!(result, Err(BridgeError::OperationFailed(_))));
    }

    #[test]
    fn test_file_source_reopens_after_close() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"OggS-payload").unwrap();

        let mut source = FileByteSource::open(file.path()).unwrap();
        assert_eq!(drain(&mut source, 5), b"OggS-payload");

        source.close();
        assert!(!source.is_open());
        assert!(drain(&mut source, 5).is_empty());

        source.reset().unwrap();
        assert!(source.is_open());
        assert_eq!(drain(&mut source, 64), b"OggS-payload");

        source.reset().unwrap();
        let mut head = [0u8; 4];
        source.read(&mut head).unwrap();
        assert_eq!(&head, b"OggS");
    }
}
