//! The error taxonomy for a whole build.
//!
//! Every failure is fatal to the build; errors carry enough context (path,
//! manifest line, byte offset) for the caller's diagnostic and nothing else.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Lexer- or grammar-level problems in the manifest.
    #[error("manifest line {line}: {message}")]
    ManifestParse { line: usize, message: String },

    /// An intermediate path component that does not exist.
    #[error("missing parent directory `{component}` in `{path}` (manifest line {line})")]
    MissingParent {
        path: String,
        component: String,
        line: usize,
    },

    /// An intermediate path component that exists but is a file.
    #[error("`{component}` in `{path}` is not a directory (manifest line {line})")]
    NotADirectory {
        path: String,
        component: String,
        line: usize,
    },

    #[error("duplicate entry `{path}` (manifest line {line})")]
    DuplicateEntry { path: String, line: usize },

    /// Host-side I/O: a missing source file, an unreadable manifest, an
    /// output file that cannot be created or extended.
    #[error("{}: {source}", path.display())]
    HostIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A source file delivered fewer bytes than it was sized at.
    #[error("{}: source file shrank while it was being copied", path.display())]
    SourceTruncated { path: PathBuf },

    /// The image-side block device failed underneath us.
    #[error("image I/O at byte offset {offset}: {source}")]
    ImageIo {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("boot code blob must be exactly {expected} bytes, got {actual}")]
    InvalidBootCode { expected: usize, actual: usize },

    #[error("cluster size {size} is not a power of two between 512 and 65536")]
    InvalidClusterSize { size: u32 },

    /// The data region ran out of clusters. The planner sizes the image so
    /// that this cannot happen; hitting it means the sources changed under
    /// our feet or there is a sizing bug.
    #[error("no space: {requested} cluster(s) requested with {available} free")]
    NoSpace { requested: u32, available: u32 },

    /// The fixed FAT12/16 root directory is limited to 512 entries.
    #[error("root directory is full (512 entry slots)")]
    RootDirFull,

    #[error("{}: file does not fit in a FAT filesystem (4 GiB limit)", path.display())]
    FileTooLarge { path: PathBuf },

    #[error("name `{name}` does not fit in 255 UTF-16 code units")]
    NameTooLong { name: String },

    #[error("no free short-name tail for `{name}`")]
    ShortNameExhausted { name: String },
}
