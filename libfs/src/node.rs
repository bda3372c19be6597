//! Node operations implemented by every filesystem server

use crate::errno::Errno;
use crate::flags::LookupFlags;
use crate::types::{DevHandle, FsHandle, FsIndex, Triplet};

use std::fmt::{self, Debug};

/// Node operations of a filesystem.
///
/// A `Node` is a counted reference. Every node returned by [`root`],
/// [`match_child`], [`create`] or [`resolve`] must be given back exactly once,
/// through [`release`] or [`destroy`]. Implementations synchronize their own
/// node storage: the lookup engine calls them concurrently without locks.
///
/// [`root`]: NodeOps::root
/// [`match_child`]: NodeOps::match_child
/// [`create`]: NodeOps::create
/// [`resolve`]: NodeOps::resolve
/// [`release`]: NodeOps::release
/// [`destroy`]: NodeOps::destroy
pub trait NodeOps: Send + Sync {
    /// A counted reference to a node
    type Node: Send;

    /// Gets the root node of a device
    fn root(&self, dev: DevHandle) -> Option<Self::Node>;

    /// Whether the node holds named children
    fn is_container(&self, node: &Self::Node) -> bool;

    /// Finds the child called `name`
    fn match_child(&self, parent: &Self::Node, name: &[u8]) -> Option<Self::Node>;

    fn is_directory(&self, node: &Self::Node) -> bool;

    fn is_file(&self, node: &Self::Node) -> bool;

    /// Allocates a new unlinked node. `flags` tells a directory from a file.
    fn create(&self, dev: DevHandle, flags: LookupFlags) -> Option<Self::Node>;

    /// Gets an existing node by index
    fn resolve(&self, dev: DevHandle, index: FsIndex) -> Option<Self::Node>;

    /// Adds the name `name` for `child` in the directory `parent`
    /// # Errors
    /// Returns the backend status on failure
    fn link(&self, parent: &Self::Node, child: &Self::Node, name: &[u8]) -> Result<(), Errno>;

    /// Removes the name of `child` from `parent`
    /// # Errors
    /// Returns the backend status on failure
    fn unlink(&self, parent: &Self::Node, child: &Self::Node) -> Result<(), Errno>;

    /// Frees an unlinked node. Consumes the reference.
    /// # Errors
    /// Returns the backend status on failure
    fn destroy(&self, node: Self::Node) -> Result<(), Errno>;

    /// Drops a reference
    fn release(&self, node: Self::Node);

    fn index_of(&self, node: &Self::Node) -> FsIndex;

    fn size_of(&self, node: &Self::Node) -> u64;

    fn links_of(&self, node: &Self::Node) -> u32;
}

/// A node reference released on drop
pub struct NodeRef<'a, O: NodeOps + ?Sized> {
    /// owner
    ops: &'a O,
    /// `None` only after `into_inner`
    node: Option<O::Node>,
}

impl<'a, O: NodeOps + ?Sized> NodeRef<'a, O> {
    #[inline]
    pub fn new(ops: &'a O, node: O::Node) -> Self {
        Self {
            ops,
            node: Some(node),
        }
    }

    /// Gets the node
    /// # Panics
    /// Never: the node is only taken by `into_inner`, which consumes the guard
    #[must_use]
    #[inline]
    pub fn node(&self) -> &O::Node {
        match self.node {
            Some(ref node) => node,
            None => unreachable!("node reference taken"),
        }
    }

    /// Takes the reference out without releasing it
    #[must_use]
    #[inline]
    pub fn into_inner(mut self) -> O::Node {
        match self.node.take() {
            Some(node) => node,
            None => unreachable!("node reference taken"),
        }
    }

    /// The global identity of the node
    #[must_use]
    #[inline]
    pub fn triplet(&self, fs_handle: FsHandle, dev_handle: DevHandle) -> Triplet {
        let node = self.node();
        Triplet {
            fs_handle,
            dev_handle,
            index: self.ops.index_of(node),
            size: self.ops.size_of(node),
            link_count: self.ops.links_of(node),
        }
    }
}

impl<O: NodeOps + ?Sized> Drop for NodeRef<'_, O> {
    #[inline]
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            self.ops.release(node);
        }
    }
}

impl<O: NodeOps + ?Sized> Debug for NodeRef<'_, O> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("NodeRef");
        if let Some(ref node) = self.node {
            let _ = s.field("index", &self.ops.index_of(node));
        }
        s.finish()
    }
}
