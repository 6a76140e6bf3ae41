//! The image builder driver: plan, format, install boot code, then
//! materialize the tree in one deterministic pass.

use std::path::Path;

use log::info;

use crate::error::Result;
use crate::fat::dir::DirHandle;
use crate::fat::types::Timestamp;
use crate::fat::FatVolume;
use crate::manifest;
use crate::mbr;
use crate::plan::{plan_image, Plan};
use crate::storage::{BlockDevice, FileBlockDevice};
use crate::tree::{Inode, InodeKind};

pub const DEFAULT_CLUSTER_SIZE: u32 = 32 * 1024;
pub const DEFAULT_FREE_SPACE: u64 = 1024 * 1024;

/// Caller-supplied boot code blobs; all optional. Only the PBR blob
/// matching the chosen variant is consulted.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub mbr_code: Option<Vec<u8>>,
    pub pbr_code_1216: Option<Vec<u8>>,
    pub pbr_code_32: Option<Vec<u8>>,
}

/// Parses `manifest_path`, sizes the image, and builds it into
/// `output_path`. The output file is created only after the manifest
/// parses, so a bad manifest leaves nothing behind.
pub fn build_image_file(
    manifest_path: &Path,
    output_path: &Path,
    cluster_size: u32,
    free_space: u64,
    timestamp: Timestamp,
    options: &BuildOptions,
) -> Result<Plan> {
    let root = manifest::parse_file(manifest_path)?;
    let plan = plan_image(&root, cluster_size, free_space)?;

    info!(
        "building {:?} image of {} bytes into {}",
        plan.variant,
        plan.image_bytes(),
        output_path.display(),
    );

    let device = FileBlockDevice::create(output_path, plan.image_bytes())?;
    build_image(device, &root, plan, timestamp, options)?;

    Ok(plan)
}

/// Builds the planned image for `root` onto `device` and hands the
/// device back. On failure the device is still flushed, leaving the
/// partial output consistent on disk (but invalid).
pub fn build_image<D: BlockDevice>(
    device: D,
    root: &Inode,
    plan: Plan,
    timestamp: Timestamp,
    options: &BuildOptions,
) -> Result<D> {
    let mut fs = FatVolume::new(device, plan, timestamp);

    match drive(&mut fs, root, &plan, options) {
        Ok(()) => fs.finalize(),
        Err(e) => {
            fs.abort();
            Err(e)
        }
    }
}

fn drive<D: BlockDevice>(
    fs: &mut FatVolume<D>,
    root: &Inode,
    plan: &Plan,
    options: &BuildOptions,
) -> Result<()> {
    mbr::install_mbr(
        fs.device_mut(),
        options.mbr_code.as_deref(),
        plan.variant,
        plan.partition_sectors(),
    )?;

    fs.format()?;

    let pbr_code = if plan.variant.is_fat32() {
        &options.pbr_code_32
    } else {
        &options.pbr_code_1216
    };

    if let Some(blob) = pbr_code {
        mbr::install_pbr_code(fs.device_mut(), plan, blob)?;
    }

    let mut root_dir = fs.root_dir();
    materialize(fs, &mut root_dir, root)
}

/// Depth-first walk in child-name order. Each inode is fully
/// materialized (directory created, or file streamed) before its
/// attributes are applied; a directory's attributes land after its
/// subtree so the walk matches the single-pass build order.
fn materialize<D: BlockDevice>(
    fs: &mut FatVolume<D>,
    dir: &mut DirHandle,
    inode: &Inode,
) -> Result<()> {
    for child in inode.children() {
        let entry = match child.kind() {
            InodeKind::Directory { .. } => {
                let (entry, mut child_dir) = fs.create_dir(dir, child.name())?;
                materialize(fs, &mut child_dir, child)?;
                entry
            }
            InodeKind::File { source } => fs.write_file(dir, child.name(), source)?,
        };

        if let Some(attributes) = child.explicit_attributes() {
            fs.set_attributes(&entry, attributes)?;
        }
    }

    Ok(())
}
