//! Streaming host files into freshly allocated cluster chains.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use log::trace;

use crate::error::{Error, Result};
use crate::storage::BlockDevice;
use crate::tree::Attributes;

use super::dir::{DirHandle, EntryHandle};
use super::FatVolume;

const COPY_CHUNK: usize = 8 * 1024;

impl<D: BlockDevice> FatVolume<D> {
    /// Creates `name` in `dir` and fills it with the bytes of `source`.
    ///
    /// The chain is contiguous by construction, so the data lands in one
    /// sequential sweep of the device. A source that delivers fewer
    /// bytes than it was sized at fails the build.
    pub fn write_file(
        &mut self,
        dir: &mut DirHandle,
        name: &str,
        source: &Path,
    ) -> Result<EntryHandle> {
        let host_err = |e: io::Error| Error::HostIo {
            path: source.to_path_buf(),
            source: e,
        };

        let size = std::fs::metadata(source).map_err(host_err)?.len();
        if size > u32::MAX as u64 {
            return Err(Error::FileTooLarge {
                path: source.to_path_buf(),
            });
        }

        // Place the entry first (this is "open"); the chain and size are
        // patched in once the bytes are down (this is "close").
        let entry = self.insert_entry(dir, name, Attributes::ARCHIVE.bits(), 0, 0)?;

        let clusters = size.div_ceil(self.plan.cluster_size as u64) as u32;
        let mut first_cluster = 0;

        if clusters > 0 {
            first_cluster = self.allocate_chain(clusters)?;

            trace!(
                "streaming {size} byte(s) of `{}` into cluster {first_cluster}",
                source.display(),
            );

            let mut reader = File::open(source).map_err(host_err)?;
            let mut buf = [0u8; COPY_CHUNK];
            let mut offset = self.plan.cluster_offset(first_cluster);
            let mut remaining = size;

            while remaining > 0 {
                let chunk = remaining.min(COPY_CHUNK as u64) as usize;

                reader.read_exact(&mut buf[..chunk]).map_err(|e| {
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        Error::SourceTruncated {
                            path: source.to_path_buf(),
                        }
                    } else {
                        host_err(e)
                    }
                })?;

                self.device.write(offset, &buf[..chunk])?;

                offset += chunk as u64;
                remaining -= chunk as u64;
            }
        }

        self.set_entry_extent(&entry, first_cluster, size as u32)?;

        Ok(entry)
    }
}
