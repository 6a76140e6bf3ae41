use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::warn;

use fatimg::builder::{self, BuildOptions};
use fatimg::Timestamp;

/// Builds a bootable FAT disk image from a manifest.
#[derive(Debug, Parser)]
#[command(name = "fatimg", version)]
struct Args {
    /// Manifest describing the directory tree to build.
    #[arg(long)]
    input: PathBuf,

    /// Path of the image to produce.
    #[arg(long)]
    output: PathBuf,

    /// MBR boot code (up to 446 bytes used).
    #[arg(long)]
    mbr_code: Option<PathBuf>,

    /// FAT12/16 partition boot code (exactly 512 bytes).
    #[arg(long = "pbr-code-1216")]
    pbr_code_1216: Option<PathBuf>,

    /// FAT32 partition boot code (exactly 1536 bytes).
    #[arg(long = "pbr-code-32")]
    pbr_code_32: Option<PathBuf>,

    /// Cluster size in bytes (a power of two).
    #[arg(long, default_value_t = builder::DEFAULT_CLUSTER_SIZE)]
    cluster_size: u32,

    /// Free space to reserve in the image, in bytes.
    #[arg(long, default_value_t = builder::DEFAULT_FREE_SPACE)]
    free_space: u64,

    /// Unix timestamp to stamp entries with, for reproducible builds.
    /// Falls back to SOURCE_DATE_EPOCH, then to the wall clock.
    #[arg(long)]
    timestamp: Option<i64>,
}

fn read_blob(path: &Option<PathBuf>) -> anyhow::Result<Option<Vec<u8>>> {
    path.as_ref()
        .map(|p| std::fs::read(p).with_context(|| format!("reading boot code {}", p.display())))
        .transpose()
}

fn resolve_timestamp(flag: Option<i64>) -> anyhow::Result<Timestamp> {
    let injected = match flag {
        Some(seconds) => Some(seconds),
        None => match std::env::var("SOURCE_DATE_EPOCH") {
            Ok(value) => Some(
                value
                    .parse::<i64>()
                    .context("SOURCE_DATE_EPOCH is not a valid Unix timestamp")?,
            ),
            Err(_) => None,
        },
    };

    match injected {
        Some(seconds) => {
            Timestamp::from_unix(seconds).context("timestamp is outside the representable range")
        }
        None => Ok(Timestamp::now()),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let options = BuildOptions {
        mbr_code: read_blob(&args.mbr_code)?,
        pbr_code_1216: read_blob(&args.pbr_code_1216)?,
        pbr_code_32: read_blob(&args.pbr_code_32)?,
    };

    if args.timestamp.is_none() && std::env::var_os("SOURCE_DATE_EPOCH").is_none() {
        warn!("no injected timestamp; the build will not be reproducible");
    }

    let timestamp = resolve_timestamp(args.timestamp)?;

    let plan = builder::build_image_file(
        &args.input,
        &args.output,
        args.cluster_size,
        args.free_space,
        timestamp,
        &options,
    )
    .with_context(|| format!("building {}", args.output.display()))?;

    log::info!(
        "wrote {} ({:?}, {} bytes)",
        args.output.display(),
        plan.variant,
        plan.image_bytes(),
    );

    Ok(())
}
