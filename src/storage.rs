//! The block device abstraction that images are built against.
//!
//! A device is an offset-addressed, fixed-size, random-access byte store
//! with an explicit flush. The builder holds exactly one device for the
//! duration of a build; there is no sharing and no locking.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Every size in the on-disk layout is a multiple of this.
pub const SECTOR_SIZE: usize = 512;

// TODO: relax the 512-byte sector assumption (4Kn media) once something
// needs it; today every producer and consumer of these offsets fixes 512.

pub trait BlockDevice {
    /// Reads `buf.len()` bytes at `offset`. Short reads are errors.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes all of `buf` at `offset`. Short writes are errors.
    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Synchronously persists buffered writes to the backing store.
    fn flush(&mut self) -> Result<()>;

    /// Total size of the medium in bytes.
    fn media_size(&self) -> u64;

    /// Preferred allocation granularity in bytes.
    fn allocation_unit(&self) -> u32 {
        SECTOR_SIZE as u32
    }
}

fn out_of_range(offset: u64) -> Error {
    Error::ImageIo {
        offset,
        source: io::Error::new(io::ErrorKind::InvalidInput, "access past end of medium"),
    }
}

/// A device backed by a host file, pre-extended to its full size at
/// creation so every offset inside the image is writable up front. The
/// extended region reads back as zeroes; the data path relies on that for
/// tail slack and for freshly formatted FAT and root regions.
#[derive(Debug)]
pub struct FileBlockDevice {
    file: File,
    media_size: u64,
}

impl FileBlockDevice {
    /// Opens `path` read-write in create-always mode and extends it to
    /// `media_size` bytes.
    pub fn create(path: &Path, media_size: u64) -> Result<Self> {
        let host_err = |source| Error::HostIo {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(host_err)?;

        file.set_len(media_size).map_err(host_err)?;

        Ok(Self { file, media_size })
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.media_size => Ok(()),
            _ => Err(out_of_range(offset)),
        }
    }
}

impl BlockDevice for FileBlockDevice {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;

        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(buf))
            .map_err(|source| Error::ImageIo { offset, source })
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;

        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(buf))
            .map_err(|source| Error::ImageIo { offset, source })
    }

    fn flush(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|source| Error::ImageIo { offset: 0, source })
    }

    fn media_size(&self) -> u64 {
        self.media_size
    }
}

/// An in-memory device. Used by the unit tests and handy for embedders
/// that want to build an image without touching the host filesystem.
#[derive(Debug, Clone)]
pub struct MemBlockDevice {
    data: Vec<u8>,
}

impl MemBlockDevice {
    pub fn new(media_size: u64) -> Self {
        Self {
            data: vec![0; media_size as usize],
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl BlockDevice for MemBlockDevice {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| out_of_range(offset))?;

        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| out_of_range(offset))?;

        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn media_size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_roundtrip() {
        let mut dev = MemBlockDevice::new(4096);

        dev.write(1000, b"hello").unwrap();

        let mut buf = [0u8; 5];
        dev.read(1000, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn mem_rejects_out_of_range() {
        let mut dev = MemBlockDevice::new(512);

        assert!(dev.write(510, &[0u8; 4]).is_err());
        assert!(dev.read(u64::MAX, &mut [0u8; 1]).is_err());
    }

    #[test]
    fn file_device_is_pre_extended_and_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");

        let mut dev = FileBlockDevice::create(&path, 8192).unwrap();
        assert_eq!(dev.media_size(), 8192);

        // The extended tail reads back as zeroes without any write.
        let mut buf = [0xAAu8; 512];
        dev.read(8192 - 512, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        dev.write(0, b"MBR!").unwrap();
        dev.flush().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8192);
    }

    #[test]
    fn file_device_rejects_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileBlockDevice::create(&dir.path().join("d.img"), 1024).unwrap();

        assert!(dev.write(1024, &[1]).is_err());
        assert!(dev.read(1020, &mut [0u8; 8]).is_err());
    }
}
