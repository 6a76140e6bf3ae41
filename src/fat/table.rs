//! File Allocation Table maintenance: entry packing at the variant's
//! width and chain writes, mirrored to both FAT copies.

use crate::error::Result;
use crate::plan::Plan;
use crate::storage::{BlockDevice, SECTOR_SIZE};

use super::types::{Cluster, FatVariant, SectorIdx};

/// Writer for the on-image FAT region.
///
/// All entry updates flow through a one-sector write-through cache; a
/// dirty sector is flushed to both FAT copies at once, which keeps the
/// copies in lockstep without a second bookkeeping pass.
#[derive(Debug)]
pub struct FatTable {
    variant: FatVariant,
    /// Absolute sector of FAT copy #1.
    fat_start: SectorIdx,
    sectors_per_fat: u32,

    cached_sector: Option<SectorIdx>,
    dirty: bool,
    buf: [u8; SECTOR_SIZE],
}

impl FatTable {
    pub fn new(plan: &Plan) -> Self {
        Self {
            variant: plan.variant,
            fat_start: plan.fat_start_sector(0),
            sectors_per_fat: plan.sectors_per_fat,
            cached_sector: None,
            dirty: false,
            buf: [0; SECTOR_SIZE],
        }
    }

    /// Sets the FAT entry for `cluster` in both copies.
    pub fn set<D: BlockDevice>(&mut self, device: &mut D, cluster: Cluster, value: u32) -> Result<()> {
        match self.variant {
            FatVariant::Fat12 => {
                // Entries are packed three bytes per two clusters; an odd
                // cluster owns the high 12 bits of its byte pair.
                let offset = cluster as u64 * 3 / 2;

                if cluster % 2 == 0 {
                    self.update_byte(device, offset, 0xFF, value as u8)?;
                    self.update_byte(device, offset + 1, 0x0F, (value >> 8) as u8)
                } else {
                    self.update_byte(device, offset, 0xF0, (value << 4) as u8)?;
                    self.update_byte(device, offset + 1, 0xFF, (value >> 4) as u8)
                }
            }
            FatVariant::Fat16 => {
                let offset = cluster as u64 * 2;
                for (i, byte) in (value as u16).to_le_bytes().into_iter().enumerate() {
                    self.update_byte(device, offset + i as u64, 0xFF, byte)?;
                }
                Ok(())
            }
            FatVariant::Fat32 => {
                // The top four bits are reserved and stay zero.
                let offset = cluster as u64 * 4;
                for (i, byte) in (value & 0x0FFF_FFFF).to_le_bytes().into_iter().enumerate() {
                    self.update_byte(device, offset + i as u64, 0xFF, byte)?;
                }
                Ok(())
            }
        }
    }

    /// Writes the chain `first → first+1 → … → first+count-1 → EOC`.
    pub fn write_chain<D: BlockDevice>(
        &mut self,
        device: &mut D,
        first: Cluster,
        count: u32,
    ) -> Result<()> {
        for i in 0..count {
            let value = if i + 1 < count {
                first + i + 1
            } else {
                self.variant.end_of_chain()
            };

            self.set(device, first + i, value)?;
        }

        Ok(())
    }

    /// Entries 0 and 1: the media descriptor padded with 1-bits, and the
    /// end-of-chain template (whose FAT32 value carries the clean-shutdown
    /// bits).
    pub fn write_reserved_entries<D: BlockDevice>(&mut self, device: &mut D) -> Result<()> {
        self.set(device, 0, self.variant.media_entry())?;
        self.set(device, 1, self.variant.end_of_chain())
    }

    /// Flushes the cached sector, if dirty, to both FAT copies.
    pub fn flush<D: BlockDevice>(&mut self, device: &mut D) -> Result<()> {
        if let (Some(sector), true) = (self.cached_sector, self.dirty) {
            device.write(sector * SECTOR_SIZE as u64, &self.buf)?;
            device.write(
                (sector + self.sectors_per_fat as u64) * SECTOR_SIZE as u64,
                &self.buf,
            )?;
            self.dirty = false;
        }

        Ok(())
    }

    fn update_byte<D: BlockDevice>(
        &mut self,
        device: &mut D,
        fat_byte: u64,
        mask: u8,
        bits: u8,
    ) -> Result<()> {
        let sector = self.fat_start + fat_byte / SECTOR_SIZE as u64;

        if self.cached_sector != Some(sector) {
            self.flush(device)?;
            device.read(sector * SECTOR_SIZE as u64, &mut self.buf)?;
            self.cached_sector = Some(sector);
        }

        let byte = &mut self.buf[(fat_byte % SECTOR_SIZE as u64) as usize];
        *byte = (*byte & !mask) | (bits & mask);
        self.dirty = true;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemBlockDevice;

    fn table_for(variant: FatVariant) -> (FatTable, MemBlockDevice) {
        let plan = Plan {
            variant,
            cluster_size: 512,
            cluster_count: 4000,
            sectors_per_fat: 16,
            total_sectors: 6000,
        };

        (FatTable::new(&plan), MemBlockDevice::new(6000 * 512))
    }

    fn fat_bytes(dev: &MemBlockDevice, copy: u64) -> &[u8] {
        let start = (72 + copy * 16) as usize * 512;
        &dev.as_slice()[start..start + 16 * 512]
    }

    fn entry12(fat: &[u8], cluster: usize) -> u32 {
        let off = cluster * 3 / 2;
        let pair = u16::from_le_bytes([fat[off], fat[off + 1]]) as u32;
        if cluster % 2 == 0 {
            pair & 0xFFF
        } else {
            pair >> 4
        }
    }

    #[test]
    fn fat12_neighbours_do_not_clobber_each_other() {
        let (mut table, mut dev) = table_for(FatVariant::Fat12);

        table.set(&mut dev, 2, 0xABC).unwrap();
        table.set(&mut dev, 3, 0x123).unwrap();
        table.set(&mut dev, 4, 0xFFF).unwrap();
        table.flush(&mut dev).unwrap();

        let fat = fat_bytes(&dev, 0);
        assert_eq!(entry12(fat, 2), 0xABC);
        assert_eq!(entry12(fat, 3), 0x123);
        assert_eq!(entry12(fat, 4), 0xFFF);
    }

    #[test]
    fn fat12_entry_straddling_a_sector_boundary() {
        let (mut table, mut dev) = table_for(FatVariant::Fat12);

        // Cluster 341 occupies bytes 511..=512 of the FAT.
        table.set(&mut dev, 341, 0xDEF).unwrap();
        table.flush(&mut dev).unwrap();

        assert_eq!(entry12(fat_bytes(&dev, 0), 341), 0xDEF);
    }

    #[test]
    fn chains_terminate_with_eoc_and_mirror() {
        let (mut table, mut dev) = table_for(FatVariant::Fat16);

        table.write_reserved_entries(&mut dev).unwrap();
        table.write_chain(&mut dev, 2, 3).unwrap();
        table.flush(&mut dev).unwrap();

        let fat = fat_bytes(&dev, 0);
        let entry = |i: usize| u16::from_le_bytes([fat[i * 2], fat[i * 2 + 1]]);

        assert_eq!(entry(0), 0xFFF8);
        assert_eq!(entry(1), 0xFFFF);
        assert_eq!(entry(2), 3);
        assert_eq!(entry(3), 4);
        assert_eq!(entry(4), 0xFFFF);
        assert_eq!(entry(5), 0);

        assert_eq!(fat_bytes(&dev, 0), fat_bytes(&dev, 1));
    }

    #[test]
    fn fat32_entries_are_masked_to_28_bits() {
        let (mut table, mut dev) = table_for(FatVariant::Fat32);

        table.set(&mut dev, 2, 0xFFFF_FFFF).unwrap();
        table.flush(&mut dev).unwrap();

        let fat = fat_bytes(&dev, 0);
        assert_eq!(
            u32::from_le_bytes(fat[8..12].try_into().unwrap()),
            0x0FFF_FFFF
        );
    }

    #[test]
    fn cache_survives_interleaved_sectors() {
        let (mut table, mut dev) = table_for(FatVariant::Fat16);

        // 256 entries per sector: these two alternate sectors.
        table.set(&mut dev, 2, 0x1111).unwrap();
        table.set(&mut dev, 300, 0x2222).unwrap();
        table.set(&mut dev, 3, 0x3333).unwrap();
        table.flush(&mut dev).unwrap();

        let fat = fat_bytes(&dev, 0);
        let entry = |i: usize| u16::from_le_bytes([fat[i * 2], fat[i * 2 + 1]]);
        assert_eq!(entry(2), 0x1111);
        assert_eq!(entry(300), 0x2222);
        assert_eq!(entry(3), 0x3333);
    }
}
