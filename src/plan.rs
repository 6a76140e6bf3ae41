//! The size planner: computes, ahead of any I/O on the image, how big the
//! output must be and which FAT variant it will carry.
//!
//! The planner is pure: the same tree, the same source-file sizes, and
//! the same knobs always produce the same plan.

use log::debug;

use crate::error::{Error, Result};
use crate::fat::dir::entry_slots;
use crate::fat::types::{Cluster, FatVariant, FIRST_DATA_CLUSTER};
use crate::storage::SECTOR_SIZE;
use crate::tree::{Inode, InodeKind};

/// Sectors set aside ahead of the first FAT: the MBR, the gap up to the
/// partition, the PBR, and the in-partition reserved area.
pub const RESERVED_IMAGE_SECTORS: u64 = 72;

/// Where the single primary partition starts.
pub const PARTITION_START_LBA: u64 = 8;

/// The fixed FAT12/16 root directory holds exactly this many 32-byte
/// entry slots.
pub const FIXED_ROOT_ENTRIES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub variant: FatVariant,
    /// Cluster size in bytes (power of two, 512..=65536).
    pub cluster_size: u32,
    /// Data-area clusters, as an independent reader of the finished image
    /// would count them.
    pub cluster_count: u32,
    /// Sectors in one FAT copy.
    pub sectors_per_fat: u32,
    /// Whole-image size in sectors.
    pub total_sectors: u64,
}

impl Plan {
    pub fn sectors_per_cluster(&self) -> u8 {
        (self.cluster_size as usize / SECTOR_SIZE) as u8
    }

    pub fn image_bytes(&self) -> u64 {
        self.total_sectors * SECTOR_SIZE as u64
    }

    pub fn partition_sectors(&self) -> u64 {
        self.total_sectors - PARTITION_START_LBA
    }

    /// In-partition reserved sector count (the PBR is sector 0 of these).
    pub fn reserved_sectors(&self) -> u16 {
        (RESERVED_IMAGE_SECTORS - PARTITION_START_LBA) as u16
    }

    /// Absolute sector of FAT copy 0 or 1.
    pub fn fat_start_sector(&self, copy: u32) -> u64 {
        RESERVED_IMAGE_SECTORS + copy as u64 * self.sectors_per_fat as u64
    }

    /// Entry slots in the fixed root; 0 for FAT32 (whose root is a chain).
    pub fn root_entry_count(&self) -> u16 {
        match self.variant {
            FatVariant::Fat32 => 0,
            _ => FIXED_ROOT_ENTRIES as u16,
        }
    }

    pub fn root_dir_sectors(&self) -> u64 {
        (self.root_entry_count() as u64 * 32).div_ceil(SECTOR_SIZE as u64)
    }

    /// Absolute sector of the fixed FAT12/16 root region.
    pub fn root_dir_sector(&self) -> u64 {
        self.fat_start_sector(2)
    }

    pub fn first_data_sector(&self) -> u64 {
        self.root_dir_sector() + self.root_dir_sectors()
    }

    /// Absolute byte offset of a data cluster.
    pub fn cluster_offset(&self, cluster: Cluster) -> u64 {
        let relative = (cluster - FIRST_DATA_CLUSTER) as u64;
        (self.first_data_sector() + relative * self.sectors_per_cluster() as u64)
            * SECTOR_SIZE as u64
    }
}

/// Sizes the image for `root` with cluster size `cluster_size` and at
/// least `slack` bytes of free space.
pub fn plan_image(root: &Inode, cluster_size: u32, slack: u64) -> Result<Plan> {
    if !cluster_size.is_power_of_two() || !(512..=65536).contains(&cluster_size) {
        return Err(Error::InvalidClusterSize { size: cluster_size });
    }

    let c = cluster_size as u64;
    let slack_clusters = slack.div_ceil(c);

    // First fit: FAT12/16, where the root is a fixed 512-entry region
    // outside the data area.
    let payload = tree_payload(root, c, FIXED_ROOT_ENTRIES)?;
    let payload_clusters = payload / c + slack_clusters;
    let root_clusters = dir_table_bytes(FIXED_ROOT_ENTRIES.max(root_slots(root)), c) / c;
    let data_clusters = payload_clusters - root_clusters;

    let (variant, cluster_count, occupied_clusters) = match FatVariant::for_cluster_count(
        clamp_cluster_count(data_clusters),
    ) {
        variant @ (FatVariant::Fat12 | FatVariant::Fat16) => {
            (variant, data_clusters, payload_clusters)
        }
        FatVariant::Fat32 => {
            // Re-fit with the chained root, which lives in the data area
            // and takes only what its entries need.
            let payload = tree_payload(root, c, 1)?;
            let clusters = payload / c + slack_clusters;

            // A volume can land in the gap where it counts as FAT32 with
            // a fixed root but falls under the threshold with a chained
            // one; stay on FAT32 and pad the data area up.
            let clusters = clusters.max(65525);

            (FatVariant::Fat32, clusters, clusters)
        }
    };

    let cluster_count = clamp_cluster_count(cluster_count);
    let fat_bytes = variant.fat_bytes(cluster_count as u64 + 2);
    let sectors_per_fat = fat_bytes.div_ceil(SECTOR_SIZE as u64) as u32;

    let sectors_per_cluster = c / SECTOR_SIZE as u64;
    let total_sectors = occupied_clusters * sectors_per_cluster
        + 2 * sectors_per_fat as u64
        + RESERVED_IMAGE_SECTORS;

    let plan = Plan {
        variant,
        cluster_size,
        cluster_count,
        sectors_per_fat,
        total_sectors,
    };

    debug!(
        "planned {:?}: {} clusters of {} bytes, {} sectors per FAT, image {} bytes",
        plan.variant,
        plan.cluster_count,
        plan.cluster_size,
        plan.sectors_per_fat,
        plan.image_bytes(),
    );

    Ok(plan)
}

fn clamp_cluster_count(clusters: u64) -> u32 {
    // FAT32 entries are 28 bits; the planner never gets near this but the
    // cast below should not be able to lie.
    clusters.min(0x0FFF_FFF0) as u32
}

fn round_up_to_cluster(bytes: u64, c: u64) -> u64 {
    bytes.div_ceil(c) * c
}

/// Bytes a directory table with `slots` 32-byte entries occupies.
fn dir_table_bytes(slots: usize, c: u64) -> u64 {
    round_up_to_cluster(slots as u64 * 32, c)
}

fn root_slots(root: &Inode) -> usize {
    root.children().map(|child| entry_slots(child.name())).sum()
}

/// Cluster-rounded bytes for the whole tree, with the root directory
/// sized at no fewer than `root_min` entry slots.
fn tree_payload(root: &Inode, c: u64, root_min: usize) -> Result<u64> {
    let mut total = dir_table_bytes(root_slots(root).max(root_min), c);

    for child in root.children() {
        total += subtree_payload(child, c)?;
    }

    Ok(total)
}

fn subtree_payload(inode: &Inode, c: u64) -> Result<u64> {
    match inode.kind() {
        InodeKind::Directory { .. } => {
            let slots: usize = inode
                .children()
                .map(|child| entry_slots(child.name()))
                .sum();

            // Even an empty directory occupies one cluster.
            let mut total = dir_table_bytes(slots.max(1), c);

            for child in inode.children() {
                total += subtree_payload(child, c)?;
            }

            Ok(total)
        }
        InodeKind::File { source } => {
            let size = std::fs::metadata(source)
                .map_err(|e| Error::HostIo {
                    path: source.clone(),
                    source: e,
                })?
                .len();

            Ok(round_up_to_cluster(size, c))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(dir: &std::path::Path, name: &str, len: usize) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![0xAB; len]).unwrap();
        path
    }

    #[test]
    fn minimal_manifest_plans_a_fat12_volume() {
        let tmp = tempfile::tempdir().unwrap();
        let source = write_source(tmp.path(), "a.bin", 5);

        let mut root = Inode::root();
        let mut foo = Inode::new_directory("foo".into(), None);
        foo.add_child(Inode::new_file("a.txt".into(), None, source))
            .unwrap();
        root.add_child(foo).unwrap();

        let plan = plan_image(&root, 32768, 0).unwrap();

        // Root (fixed minimum), `foo`, and the file: one cluster each;
        // the fixed root sits outside the data area.
        assert_eq!(plan.variant, FatVariant::Fat12);
        assert_eq!(plan.cluster_count, 2);
        assert_eq!(plan.sectors_per_fat, 1);
        assert_eq!(plan.total_sectors, 3 * 64 + 2 + RESERVED_IMAGE_SECTORS);
        assert_eq!(plan.image_bytes() % 512, 0);
    }

    #[test]
    fn slack_rounds_up_to_clusters() {
        let root = Inode::root();

        let base = plan_image(&root, 32768, 0).unwrap();
        let one = plan_image(&root, 32768, 1).unwrap();
        let full = plan_image(&root, 32768, 32768).unwrap();

        assert_eq!(one.total_sectors, base.total_sectors + 64);
        assert_eq!(full.total_sectors, one.total_sectors);
    }

    #[test]
    fn variant_scales_with_requested_free_space() {
        let root = Inode::root();
        let c = 4096u64;

        let fat16 = plan_image(&root, 4096, 10_000 * c).unwrap();
        assert_eq!(fat16.variant, FatVariant::Fat16);

        let fat32 = plan_image(&root, 4096, 70_000 * c).unwrap();
        assert_eq!(fat32.variant, FatVariant::Fat32);
        assert!(fat32.cluster_count >= 65525);
        assert_eq!(fat32.root_entry_count(), 0);
    }

    #[test]
    fn variant_boundary_is_exact() {
        let root = Inode::root();
        let c = 4096u64;

        let fat16 = plan_image(&root, 4096, 65524 * c).unwrap();
        assert_eq!(fat16.variant, FatVariant::Fat16);
        assert_eq!(fat16.cluster_count, 65524);

        let fat32 = plan_image(&root, 4096, 65525 * c).unwrap();
        assert_eq!(fat32.variant, FatVariant::Fat32);
        assert!(fat32.cluster_count >= 65525);
    }

    #[test]
    fn cluster_size_must_be_a_reasonable_power_of_two() {
        let root = Inode::root();

        assert!(matches!(
            plan_image(&root, 1000, 0),
            Err(Error::InvalidClusterSize { .. })
        ));
        assert!(matches!(
            plan_image(&root, 256, 0),
            Err(Error::InvalidClusterSize { .. })
        ));
        assert!(matches!(
            plan_image(&root, 131072, 0),
            Err(Error::InvalidClusterSize { .. })
        ));
    }

    #[test]
    fn layout_offsets_are_consistent() {
        let root = Inode::root();
        let plan = plan_image(&root, 32768, 0).unwrap();

        assert_eq!(plan.fat_start_sector(0), RESERVED_IMAGE_SECTORS);
        assert_eq!(
            plan.fat_start_sector(1),
            RESERVED_IMAGE_SECTORS + plan.sectors_per_fat as u64
        );
        assert_eq!(plan.root_dir_sectors(), 32);
        assert_eq!(
            plan.first_data_sector(),
            plan.root_dir_sector() + plan.root_dir_sectors()
        );
        assert_eq!(
            plan.cluster_offset(3) - plan.cluster_offset(2),
            plan.cluster_size as u64
        );
    }
}
