//! The in-memory directory tree a manifest compiles into.
//!
//! The tree is a strict hierarchy: each parent uniquely owns its children
//! and children are kept name-ordered so that walks (and therefore the
//! produced images) are deterministic across runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bitflags::bitflags;

bitflags! {
    /// The on-disk attribute byte of a directory entry.
    ///
    /// `VOLUME_ID` and `DIRECTORY` are derived by the encoder and never
    /// stored on an inode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

impl Attributes {
    /// The bits a manifest may set on an entry.
    pub const USER_MASK: Attributes = Attributes::ARCHIVE
        .union(Attributes::SYSTEM)
        .union(Attributes::HIDDEN)
        .union(Attributes::READ_ONLY);

    /// What an entry gets when the manifest does not say otherwise.
    pub const DEFAULT: Attributes = Attributes::ARCHIVE;
}

#[derive(Debug)]
pub enum InodeKind {
    Directory { children: BTreeMap<String, Inode> },
    File { source: PathBuf },
}

#[derive(Debug)]
pub struct Inode {
    name: String,
    /// `None` when the manifest line carried no attrs token; an explicit
    /// token is kept apart even when its bits equal the default.
    attributes: Option<Attributes>,
    kind: InodeKind,
}

impl Inode {
    /// The root of a tree: a directory with an empty name.
    pub fn root() -> Self {
        Self::new_directory(String::new(), None)
    }

    pub fn new_directory(name: String, attributes: Option<Attributes>) -> Self {
        Self {
            name,
            attributes,
            kind: InodeKind::Directory {
                children: BTreeMap::new(),
            },
        }
    }

    pub fn new_file(name: String, attributes: Option<Attributes>, source: PathBuf) -> Self {
        Self {
            name,
            attributes,
            kind: InodeKind::File { source },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes.unwrap_or(Attributes::DEFAULT)
    }

    /// The attrs the manifest actually spelled out, if any.
    pub fn explicit_attributes(&self) -> Option<Attributes> {
        self.attributes
    }

    pub fn kind(&self) -> &InodeKind {
        &self.kind
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, InodeKind::Directory { .. })
    }

    /// The host path a file's bytes come from; `None` for directories.
    pub fn source(&self) -> Option<&Path> {
        match &self.kind {
            InodeKind::File { source } => Some(source),
            InodeKind::Directory { .. } => None,
        }
    }

    /// Children in name order. Empty for files.
    pub fn children(&self) -> impl Iterator<Item = &Inode> {
        match &self.kind {
            InodeKind::Directory { children } => Some(children.values()),
            InodeKind::File { .. } => None,
        }
        .into_iter()
        .flatten()
    }

    pub fn child_count(&self) -> usize {
        match &self.kind {
            InodeKind::Directory { children } => children.len(),
            InodeKind::File { .. } => 0,
        }
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Inode> {
        match &mut self.kind {
            InodeKind::Directory { children } => children.get_mut(name),
            InodeKind::File { .. } => None,
        }
    }

    /// Adds `child` to a directory. Hands the child back if the name is
    /// already taken (or if `self` is a file).
    pub fn add_child(&mut self, child: Inode) -> std::result::Result<(), Inode> {
        match &mut self.kind {
            InodeKind::Directory { children } => {
                if children.contains_key(child.name()) {
                    return Err(child);
                }

                children.insert(child.name.clone(), child);
                Ok(())
            }
            InodeKind::File { .. } => Err(child),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_come_back_name_ordered() {
        let mut root = Inode::root();
        for name in ["zeta", "alpha", "mid"] {
            root.add_child(Inode::new_directory(name.into(), None)).unwrap();
        }

        let names: Vec<_> = root.children().map(|c| c.name().to_owned()).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn duplicate_children_are_rejected() {
        let mut root = Inode::root();
        root.add_child(Inode::new_directory("a".into(), None)).unwrap();

        assert!(root
            .add_child(Inode::new_file("a".into(), None, "src/a.bin".into()))
            .is_err());
    }

    #[test]
    fn files_take_no_children() {
        let mut file = Inode::new_file("f".into(), None, "x".into());
        assert!(file
            .add_child(Inode::new_directory("d".into(), None))
            .is_err());
        assert_eq!(file.child_count(), 0);
    }

    #[test]
    fn explicit_attributes_stay_apart_from_the_default() {
        let defaulted = Inode::new_directory("d".into(), None);
        assert_eq!(defaulted.attributes(), Attributes::DEFAULT);
        assert_eq!(defaulted.explicit_attributes(), None);

        let spelled_out = Inode::new_directory("e".into(), Some(Attributes::ARCHIVE));
        assert_eq!(spelled_out.attributes(), Attributes::DEFAULT);
        assert_eq!(
            spelled_out.explicit_attributes(),
            Some(Attributes::ARCHIVE)
        );
    }
}
