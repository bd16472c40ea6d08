// SPDX-License-Identifier: MPL-2.0

//! Scratch storage for zero-copy photo staging
//!
//! Shared buffers are memory-mapped scratch files of a fixed length. The
//! file is truncated and re-materialized on every creation, so nothing in it
//! survives a restart; dropping the buffer unmaps it and leaves the file in
//! place.

use crate::constants::MAPPED_SENTINEL;
use crate::errors::{PhotoError, PhotoResult};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fixed-length read-write shared mapping of a scratch file
pub struct MappedBuffer {
    map: MmapMut,
    path: PathBuf,
}

impl MappedBuffer {
    /// Create or truncate `path`, materialize `length` bytes and map them.
    ///
    /// A sentinel byte is written past the mapped range before mapping, so
    /// the backing store exists for every mapped page.
    pub fn create(path: &Path, length: usize) -> PhotoResult<Self> {
        if length == 0 {
            return Err(PhotoError::Configuration(format!(
                "mapped buffer {} needs a non-zero length",
                path.display()
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| PhotoError::io(path, e))?;

        file.seek(SeekFrom::Start(length as u64))
            .map_err(|e| PhotoError::io(path, e))?;
        file.write_all(&[MAPPED_SENTINEL])
            .map_err(|e| PhotoError::io(path, e))?;

        // SAFETY: the file was just truncated and sized by this process; the
        // scratch path is private to this pipeline.
        let map = unsafe { memmap2::MmapOptions::new().len(length).map_mut(&file) }
            .map_err(|e| PhotoError::io(path, e))?;

        debug!(path = %path.display(), length, "Mapped shared buffer");

        Ok(Self {
            map,
            path: path.to_path_buf(),
        })
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Copy `data` to the start of the buffer, returning the copied length
    pub fn copy_from(&mut self, data: &[u8]) -> PhotoResult<usize> {
        self.write_at(0, data)?;
        Ok(data.len())
    }

    /// Copy `data` at `offset`; never writes past the mapped length
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> PhotoResult<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= self.map.len())
            .ok_or(PhotoError::BufferOverflow {
                needed: offset.saturating_add(data.len()),
                capacity: self.map.len(),
            })?;
        self.map[offset..end].copy_from_slice(data);
        Ok(())
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), length = self.map.len(), "Unmapping shared buffer");
    }
}

impl std::fmt::Debug for MappedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedBuffer")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_has_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        for length in [1usize, 7, 4096, 65_537] {
            let path = dir.path().join(format!("buf_{length}"));
            let mut buffer = MappedBuffer::create(&path, length).unwrap();
            assert_eq!(buffer.len(), length);
            buffer.as_mut_slice()[length - 1] = 0x5A;
            assert_eq!(buffer.as_slice()[length - 1], 0x5A);
        }
    }

    #[test]
    fn test_backing_file_survives_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.jpeg");
        {
            let mut buffer = MappedBuffer::create(&path, 16).unwrap();
            buffer.copy_from(b"abc").unwrap();
        }
        let contents = std::fs::read(&path).unwrap();
        // mapped bytes plus the sentinel
        assert_eq!(contents.len(), 17);
        assert_eq!(&contents[..3], b"abc");
        assert_eq!(contents[16], MAPPED_SENTINEL);
    }

    #[test]
    fn test_recreate_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.jpeg");
        drop(MappedBuffer::create(&path, 64).unwrap());
        let buffer = MappedBuffer::create(&path, 8).unwrap();
        assert_eq!(buffer.len(), 8);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 9);
    }

    #[test]
    fn test_zero_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = MappedBuffer::create(&dir.path().join("zero"), 0);
        assert!(matches!(result, Err(PhotoError::Configuration(_))));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = MappedBuffer::create(&dir.path().join("missing/buf"), 8);
        assert!(matches!(result, Err(PhotoError::Io { .. })));
    }

    #[test]
    fn test_write_past_end_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = MappedBuffer::create(&dir.path().join("buf"), 4).unwrap();
        assert!(buffer.write_at(2, &[1, 2]).is_ok());
        assert!(matches!(
            buffer.write_at(3, &[1, 2]),
            Err(PhotoError::BufferOverflow {
                needed: 5,
                capacity: 4
            })
        ));
    }
}
