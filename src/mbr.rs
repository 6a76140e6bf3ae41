//! The Master Boot Record and boot-code installation.
//!
//! The boot blobs are opaque: the caller hands us machine code and we
//! splice it around the structures formatting already wrote (the BPB,
//! the FSInfo fields, the signatures).

use crate::error::{Error, Result};
use crate::fat::types::FatVariant;
use crate::plan::{Plan, PARTITION_START_LBA};
use crate::storage::{BlockDevice, SECTOR_SIZE};

/// Bytes of sector 0 available for MBR boot code.
pub const MBR_BOOT_CODE_SIZE: usize = 446;

/// A FAT12/16 PBR blob is one full sector.
pub const PBR_CODE_SIZE_1216: usize = SECTOR_SIZE;

/// A FAT32 PBR blob covers the boot sector and the two sectors after it.
pub const PBR_CODE_SIZE_32: usize = 3 * SECTOR_SIZE;

/// CHS placeholder for LBA-only partitions.
const CHS_LBA_MARKER: [u8; 3] = [0xFE, 0xFF, 0xFF];

/// Writes sector 0: optional boot code, partition entry 0 describing the
/// single FAT partition, three zeroed entries, and the `0x55AA` tag.
pub fn install_mbr<D: BlockDevice>(
    device: &mut D,
    boot_code: Option<&[u8]>,
    variant: FatVariant,
    partition_sectors: u64,
) -> Result<()> {
    let mut sector = [0u8; SECTOR_SIZE];
    device.read(0, &mut sector)?;

    if let Some(code) = boot_code {
        // Pad or truncate to the 446 bytes ahead of the table.
        sector[..MBR_BOOT_CODE_SIZE].fill(0);
        let used = code.len().min(MBR_BOOT_CODE_SIZE);
        sector[..used].copy_from_slice(&code[..used]);
    }

    let entry = &mut sector[446..462];
    entry.fill(0);
    entry[0] = 0x80; // bootable
    entry[1..4].copy_from_slice(&CHS_LBA_MARKER);
    entry[4] = variant.partition_type();
    entry[5..8].copy_from_slice(&CHS_LBA_MARKER);
    entry[8..12].copy_from_slice(&(PARTITION_START_LBA as u32).to_le_bytes());
    entry[12..16].copy_from_slice(&(partition_sectors as u32).to_le_bytes());

    sector[462..510].fill(0);
    sector[510] = 0x55;
    sector[511] = 0xAA;

    device.write(0, &sector)
}

/// Splices caller boot code into the already formatted PBR.
///
/// FAT12/16 blobs are exactly one sector: the jump and the code region
/// are taken from the blob, the BPB bytes `[3, 0x3E)` and the boot
/// signature stay as formatted. FAT32 blobs are exactly three sectors:
/// sector 0 is spliced the same way around `[3, 0x5A)`, sectors 1 and 2
/// are written through to the two sectors after the PBR (the FSInfo
/// fields in sector 1 are re-patched when the volume is finalized).
pub fn install_pbr_code<D: BlockDevice>(device: &mut D, plan: &Plan, blob: &[u8]) -> Result<()> {
    let pbr_offset = PARTITION_START_LBA * SECTOR_SIZE as u64;

    let bpb_end = match plan.variant {
        FatVariant::Fat12 | FatVariant::Fat16 => {
            if blob.len() != PBR_CODE_SIZE_1216 {
                return Err(Error::InvalidBootCode {
                    expected: PBR_CODE_SIZE_1216,
                    actual: blob.len(),
                });
            }
            0x3E
        }
        FatVariant::Fat32 => {
            if blob.len() != PBR_CODE_SIZE_32 {
                return Err(Error::InvalidBootCode {
                    expected: PBR_CODE_SIZE_32,
                    actual: blob.len(),
                });
            }
            0x5A
        }
    };

    let mut sector = [0u8; SECTOR_SIZE];
    device.read(pbr_offset, &mut sector)?;

    sector[..3].copy_from_slice(&blob[..3]);
    sector[bpb_end..510].copy_from_slice(&blob[bpb_end..510]);

    device.write(pbr_offset, &sector)?;

    // The FAT32 continuation sectors go through verbatim.
    for (i, chunk) in blob[SECTOR_SIZE..].chunks(SECTOR_SIZE).enumerate() {
        device.write(pbr_offset + ((i + 1) * SECTOR_SIZE) as u64, chunk)?;
    }

    Ok(())
}
