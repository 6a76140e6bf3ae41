//! Shared type definitions for the FAT core.

use chrono::{Datelike, Local, TimeZone, Timelike, Utc};

pub type Cluster = u32;
pub type SectorIdx = u64;

/// The first allocatable data cluster; indices 0 and 1 are reserved for
/// the media descriptor and the end-of-chain template.
pub const FIRST_DATA_CLUSTER: Cluster = 2;

pub const MEDIA_DESCRIPTOR: u8 = 0xF8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatVariant {
    Fat12,
    Fat16,
    Fat32,
}

impl FatVariant {
    /// Variant as an independent reader would derive it from the number
    /// of data clusters.
    pub fn for_cluster_count(clusters: u32) -> Self {
        if clusters < 4085 {
            FatVariant::Fat12
        } else if clusters < 65525 {
            FatVariant::Fat16
        } else {
            FatVariant::Fat32
        }
    }

    /// The value written to terminate a chain.
    pub fn end_of_chain(self) -> u32 {
        match self {
            FatVariant::Fat12 => 0xFFF,
            FatVariant::Fat16 => 0xFFFF,
            FatVariant::Fat32 => 0x0FFF_FFFF,
        }
    }

    /// FAT entry 0: the media descriptor in the low byte, padded with
    /// 1-bits to the entry width.
    pub fn media_entry(self) -> u32 {
        match self {
            FatVariant::Fat12 => 0xF00 | MEDIA_DESCRIPTOR as u32,
            FatVariant::Fat16 => 0xFF00 | MEDIA_DESCRIPTOR as u32,
            FatVariant::Fat32 => 0x0FFF_FF00 | MEDIA_DESCRIPTOR as u32,
        }
    }

    /// Bytes needed to hold `entries` FAT entries at this variant's width
    /// (1.5, 2, or 4 bytes).
    pub fn fat_bytes(self, entries: u64) -> u64 {
        match self {
            FatVariant::Fat12 => (entries * 3).div_ceil(2),
            FatVariant::Fat16 => entries * 2,
            FatVariant::Fat32 => entries * 4,
        }
    }

    pub fn fs_type_label(self) -> &'static [u8; 8] {
        match self {
            FatVariant::Fat12 => b"FAT12   ",
            FatVariant::Fat16 => b"FAT16   ",
            FatVariant::Fat32 => b"FAT32   ",
        }
    }

    /// MBR partition type byte (the LBA-addressed kinds).
    pub fn partition_type(self) -> u8 {
        match self {
            FatVariant::Fat12 | FatVariant::Fat16 => 0x0E,
            FatVariant::Fat32 => 0x0C,
        }
    }

    pub fn is_fat32(self) -> bool {
        matches!(self, FatVariant::Fat32)
    }
}

/// A build timestamp, already packed into the on-disk date and time words.
///
/// One value is captured at build start and shared by the creation,
/// access, and modification fields of every entry, so a build is stable
/// within the 2-second resolution of the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub date: u16,
    pub time: u16,
}

impl Timestamp {
    /// Packs a calendar date and wall time. Years outside the
    /// representable 1980..=2107 range are clamped.
    pub fn from_parts(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        let year = (year - 1980).clamp(0, 127) as u16;

        Self {
            date: (year << 9) | ((month as u16) << 5) | day as u16,
            time: ((hour as u16) << 11) | ((minute as u16) << 5) | (second as u16 / 2),
        }
    }

    fn from_datetime<Tz: TimeZone>(dt: &chrono::DateTime<Tz>) -> Self {
        Self::from_parts(
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
        )
    }

    /// The wall clock, in local time like the interactive tools the
    /// images are inspected with.
    pub fn now() -> Self {
        Self::from_datetime(&Local::now())
    }

    /// An injected Unix timestamp (UTC), for reproducible builds.
    pub fn from_unix(seconds: i64) -> Option<Self> {
        Utc.timestamp_opt(seconds, 0)
            .single()
            .map(|dt| Self::from_datetime(&dt))
    }

    /// The volume serial is derived from the timestamp so that otherwise
    /// identical builds are byte-identical.
    pub fn volume_serial(&self) -> u32 {
        ((self.date as u32) << 16) | self.time as u32
    }
}
