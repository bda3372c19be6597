//! File system node

use std::collections::BTreeMap;
use std::ffi::OsString;

use libfs::types::{DevHandle, FsIndex};

/// Node data
#[derive(Debug)]
pub enum NodeData {
    /// Directory
    Directory(BTreeMap<OsString, FsIndex>),
    /// Regular file
    Regular(Vec<u8>),
}

/// File node
#[derive(Debug)]
pub struct Node {
    /// device
    pub dev: DevHandle,

    /// names pointing at this node
    pub links: u32,

    /// references held by lookups in flight
    pub refs: usize,

    /// contents
    pub data: NodeData,
}

impl Node {
    /// Creates an unlinked node
    pub const fn new(dev: DevHandle, data: NodeData) -> Self {
        Self {
            dev,
            links: 0,
            refs: 0,
            data,
        }
    }

    pub const fn is_dir(&self) -> bool {
        matches!(self.data, NodeData::Directory(_))
    }

    pub const fn is_file(&self) -> bool {
        matches!(self.data, NodeData::Regular(_))
    }

    /// Directory entries, `None` for a file
    pub const fn entries(&self) -> Option<&BTreeMap<OsString, FsIndex>> {
        match self.data {
            NodeData::Directory(ref entries) => Some(entries),
            NodeData::Regular(_) => None,
        }
    }

    pub fn size(&self) -> u64 {
        match self.data {
            NodeData::Directory(_) => 0,
            NodeData::Regular(ref bytes) => bytes.len() as u64,
        }
    }

    /// Whether nothing keeps the node alive
    pub const fn is_orphan(&self) -> bool {
        self.links == 0 && self.refs == 0
    }
}
