//! The FAT core: volume state, formatting, and the cluster allocator.
//!
//! A [`FatVolume`] owns its block device for the duration of a build and
//! is the only writer of FAT state. Allocation is bump-style: the image
//! is built exactly once with no deletions, so chains are consecutive
//! and a free list would have nothing to do.

use log::{debug, info};

use crate::error::{Error, Result};
use crate::plan::{Plan, FIXED_ROOT_ENTRIES, PARTITION_START_LBA};
use crate::storage::{BlockDevice, SECTOR_SIZE};

pub mod boot_sector;
pub mod dir;
pub mod file;
pub mod table;
pub mod types;

use boot_sector::BiosParameterBlock;
use dir::DirHandle;
use table::FatTable;
use types::{Cluster, Timestamp, FIRST_DATA_CLUSTER};

/// The FAT32 root chain starts at the first data cluster.
pub const ROOT_DIR_CLUSTER: Cluster = 2;

pub struct FatVolume<D: BlockDevice> {
    device: D,
    plan: Plan,
    table: FatTable,
    timestamp: Timestamp,
    next_free: Cluster,
}

impl<D: BlockDevice> FatVolume<D> {
    pub fn new(device: D, plan: Plan, timestamp: Timestamp) -> Self {
        Self {
            device,
            table: FatTable::new(&plan),
            plan,
            timestamp,
            next_free: FIRST_DATA_CLUSTER,
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Writes the empty filesystem: BPB, zeroed FATs with their reserved
    /// entries, and the (fixed or chained) root directory.
    pub fn format(&mut self) -> Result<()> {
        let bpb = BiosParameterBlock::for_plan(&self.plan, self.timestamp.volume_serial());

        let mut sector = [0u8; SECTOR_SIZE];
        bpb.encode(&mut sector);
        self.device
            .write(PARTITION_START_LBA * SECTOR_SIZE as u64, &sector)?;

        // Zero both FAT copies and, on FAT12/16, the fixed root region.
        let zero = [0u8; SECTOR_SIZE];
        for sector_idx in self.plan.fat_start_sector(0)..self.plan.first_data_sector() {
            self.device
                .write(sector_idx * SECTOR_SIZE as u64, &zero)?;
        }

        self.table.write_reserved_entries(&mut self.device)?;

        if self.plan.variant.is_fat32() {
            let root = self.allocate_chain(1)?;
            debug_assert_eq!(root, ROOT_DIR_CLUSTER);

            // Fresh devices read back zero, but don't rely on it for the
            // one cluster that must scan as an empty directory.
            let root_offset = self.plan.cluster_offset(root);
            for s in 0..self.plan.sectors_per_cluster() as u64 {
                self.device
                    .write(root_offset + s * SECTOR_SIZE as u64, &zero)?;
            }

            let free_clusters = self.free_clusters();
            let next_free = self.next_free;
            boot_sector::patch_fs_info(&mut self.device, free_clusters, next_free)?;
        }

        info!(
            "formatted {:?} volume: {} clusters of {} bytes",
            self.plan.variant, self.plan.cluster_count, self.plan.cluster_size,
        );

        Ok(())
    }

    /// A handle on the root directory's entry table.
    pub fn root_dir(&self) -> DirHandle {
        if self.plan.variant.is_fat32() {
            DirHandle::chain(ROOT_DIR_CLUSTER)
        } else {
            DirHandle::fixed_root(self.plan.root_dir_sector(), FIXED_ROOT_ENTRIES)
        }
    }

    /// Claims `count` consecutive clusters and links them into a chain
    /// ending in EOC, mirrored across both FAT copies.
    pub(crate) fn allocate_chain(&mut self, count: u32) -> Result<Cluster> {
        debug_assert!(count > 0);

        let capacity_end = FIRST_DATA_CLUSTER + self.plan.cluster_count;
        match self.next_free.checked_add(count) {
            Some(end) if end <= capacity_end => {}
            _ => {
                return Err(Error::NoSpace {
                    requested: count,
                    available: capacity_end - self.next_free,
                })
            }
        }

        let first = self.next_free;
        self.table.write_chain(&mut self.device, first, count)?;
        self.next_free = first + count;

        debug!("allocated clusters {first}..{}", self.next_free);

        Ok(first)
    }

    pub fn free_clusters(&self) -> u32 {
        self.plan.cluster_count - (self.next_free - FIRST_DATA_CLUSTER)
    }

    /// Flushes all pending FAT state, refreshes FSInfo on FAT32, syncs
    /// the device, and hands it back.
    pub fn finalize(mut self) -> Result<D> {
        self.table.flush(&mut self.device)?;

        if self.plan.variant.is_fat32() {
            let free_clusters = self.free_clusters();
            let next_free = self.next_free;
            boot_sector::patch_fs_info(&mut self.device, free_clusters, next_free)?;
        }

        self.device.flush()?;
        Ok(self.device)
    }

    /// Best-effort flush on the failure path, so the half-built output
    /// is consistent on disk even though it is invalid.
    pub fn abort(mut self) -> D {
        let _ = self.table.flush(&mut self.device);
        let _ = self.device.flush();
        self.device
    }
}
