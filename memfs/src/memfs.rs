use crate::node::{Node, NodeData};

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_queue::SegQueue;
use libfs::ops::{OpMounted, ReplyMounted};
use libfs::types::{DevHandle, FsIndex};
use libfs::{lookup, Errno, FileSystem, FsContext, LookupFlags, NodeOps, Operation};
use tracing::debug;

/// Default maximum number of live nodes
pub const DEFAULT_NODE_LIMIT: usize = 4096;

/// In-memory filesystem
#[derive(Debug, Clone)]
pub struct MemFs {
    /// shared node table
    nodes: Arc<NodeTable>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    #[must_use]
    pub fn new() -> Self {
        Self::with_node_limit(DEFAULT_NODE_LIMIT)
    }

    /// Creates a filesystem holding at most `limit` nodes
    #[must_use]
    pub fn with_node_limit(limit: usize) -> Self {
        Self {
            nodes: Arc::new(NodeTable {
                slab: Mutex::default(),
                free: SegQueue::new(),
                limit,
            }),
        }
    }

    /// Number of live nodes, roots included
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.lock().live
    }

    /// Replaces the contents of a regular file
    pub fn write_file(&self, dev: DevHandle, index: FsIndex, data: &[u8]) -> Result<(), Errno> {
        let mut slab = self.nodes.lock();
        let node = slab
            .get_mut(index)
            .filter(|node| node.dev == dev)
            .ok_or(Errno::NOENT)?;
        match node.data {
            NodeData::Regular(ref mut bytes) => {
                bytes.clear();
                bytes.extend_from_slice(data);
                Ok(())
            }
            NodeData::Directory(_) => Err(Errno::ISDIR),
        }
    }
}

#[async_trait::async_trait]
impl FileSystem for MemFs {
    async fn dispatch(&self, cx: FsContext, op: Operation) -> io::Result<()> {
        match op {
            Operation::Lookup(op) => lookup::serve(Arc::clone(&self.nodes), cx, op).await,
            Operation::Mounted(op) => do_mounted(&self.nodes, cx, op),
            _ => cx.reply_err(Errno::NOSYS),
        }
    }
}

#[tracing::instrument(skip(nodes))]
fn do_mounted(nodes: &NodeTable, cx: FsContext, op: OpMounted) -> io::Result<()> {
    match nodes.mount(op.dev_handle()) {
        Ok(reply) => {
            debug!(?reply);
            cx.reply(&op, reply)
        }
        Err(errno) => cx.reply_err(errno),
    }
}

/// Slots of nodes
#[derive(Debug, Default)]
struct Slab {
    /// indexed by `FsIndex`
    slots: Vec<Option<Node>>,
    /// occupied slots
    live: usize,
    /// root directory of each mounted device
    roots: BTreeMap<DevHandle, FsIndex>,
}

/// Converts an index into a slot number
fn slot_of(index: FsIndex) -> Option<usize> {
    usize::try_from(index.as_raw()).ok()
}

impl Slab {
    fn get(&self, index: FsIndex) -> Option<&Node> {
        self.slots.get(slot_of(index)?)?.as_ref()
    }

    fn get_mut(&mut self, index: FsIndex) -> Option<&mut Node> {
        self.slots.get_mut(slot_of(index)?)?.as_mut()
    }

    /// Takes a reference to a live node
    fn acquire(&mut self, index: FsIndex) -> Option<NodeHandle> {
        let node = self.get_mut(index)?;
        node.refs = node.refs.wrapping_add(1);
        Some(NodeHandle { index, name: None })
    }
}

/// The node storage of [`MemFs`]
#[derive(Debug)]
struct NodeTable {
    /// nodes
    slab: Mutex<Slab>,
    /// recycled slots
    free: SegQueue<usize>,
    /// maximum number of live nodes
    limit: usize,
}

/// A counted reference to a node
#[derive(Debug)]
struct NodeHandle {
    /// node index
    index: FsIndex,
    /// the entry name it was found by, if any
    name: Option<OsString>,
}

impl NodeTable {
    fn lock(&self) -> MutexGuard<'_, Slab> {
        self.slab.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a node in a free slot
    fn alloc(&self, slab: &mut Slab, node: Node) -> Option<FsIndex> {
        if slab.live >= self.limit {
            debug!(limit = self.limit, "node limit reached");
            return None;
        }
        let slot = match self.free.pop() {
            Some(slot) => {
                slab.slots[slot] = Some(node);
                slot
            }
            None => {
                slab.slots.push(Some(node));
                slab.slots.len().wrapping_sub(1)
            }
        };
        slab.live = slab.live.wrapping_add(1);
        Some(FsIndex(slot as u64))
    }

    /// Frees a node nothing keeps alive
    fn collect(&self, slab: &mut Slab, index: FsIndex) {
        let slot = match slot_of(index) {
            Some(slot) => slot,
            None => return,
        };
        let orphan = slab.slots.get(slot).and_then(Option::as_ref).map_or(false, Node::is_orphan);
        if orphan {
            debug!(%index, "free node");
            slab.slots[slot] = None;
            slab.live = slab.live.wrapping_sub(1);
            self.free.push(slot);
        }
    }

    /// Sets up the root directory of a device
    fn mount(&self, dev: DevHandle) -> Result<ReplyMounted, Errno> {
        let mut slab = self.lock();
        let existing = slab.roots.get(&dev).copied();
        let root_index = match existing {
            Some(index) => index,
            None => {
                let mut root = Node::new(dev, NodeData::Directory(BTreeMap::new()));
                root.links = 1;
                let index = self.alloc(&mut slab, root).ok_or(Errno::NOSPC)?;
                let _ = slab.roots.insert(dev, index);
                index
            }
        };
        let root = slab.get(root_index).ok_or(Errno::NOENT)?;
        Ok(ReplyMounted {
            root_index,
            size: root.size(),
            link_count: root.links,
        })
    }

    /// Reads a property of a referenced node
    fn with_node<T>(&self, handle: &NodeHandle, default: T, f: impl FnOnce(&Node) -> T) -> T {
        self.lock().get(handle.index).map_or(default, f)
    }
}

impl NodeOps for NodeTable {
    type Node = NodeHandle;

    fn root(&self, dev: DevHandle) -> Option<NodeHandle> {
        let mut slab = self.lock();
        let index = *slab.roots.get(&dev)?;
        slab.acquire(index)
    }

    fn is_container(&self, node: &NodeHandle) -> bool {
        self.with_node(node, false, |node| {
            node.entries().map_or(false, |entries| !entries.is_empty())
        })
    }

    fn match_child(&self, parent: &NodeHandle, name: &[u8]) -> Option<NodeHandle> {
        let mut slab = self.lock();
        let name = OsStr::from_bytes(name);
        let index = *slab.get(parent.index)?.entries()?.get(name)?;
        let mut handle = slab.acquire(index)?;
        handle.name = Some(name.to_owned());
        Some(handle)
    }

    fn is_directory(&self, node: &NodeHandle) -> bool {
        self.with_node(node, false, Node::is_dir)
    }

    fn is_file(&self, node: &NodeHandle) -> bool {
        self.with_node(node, false, Node::is_file)
    }

    fn create(&self, dev: DevHandle, flags: LookupFlags) -> Option<NodeHandle> {
        let data = if flags.contains(LookupFlags::DIRECTORY) {
            NodeData::Directory(BTreeMap::new())
        } else {
            NodeData::Regular(Vec::new())
        };
        let mut node = Node::new(dev, data);
        node.refs = 1;

        let mut slab = self.lock();
        let index = self.alloc(&mut slab, node)?;
        debug!(%index, "created node");
        Some(NodeHandle { index, name: None })
    }

    fn resolve(&self, dev: DevHandle, index: FsIndex) -> Option<NodeHandle> {
        let mut slab = self.lock();
        if slab.get(index)?.dev != dev {
            return None;
        }
        slab.acquire(index)
    }

    fn link(&self, parent: &NodeHandle, child: &NodeHandle, name: &[u8]) -> Result<(), Errno> {
        let name = OsStr::from_bytes(name);
        let mut slab = self.lock();

        let child_is_dir = {
            let node = slab.get(child.index).ok_or(Errno::NOENT)?;
            node.is_dir() && node.links > 0
        };
        if child_is_dir {
            // a directory has a single name
            return Err(Errno::LIMIT);
        }

        match slab.get_mut(parent.index).map(|node| &mut node.data) {
            Some(NodeData::Directory(entries)) => {
                if entries.contains_key(name) {
                    return Err(Errno::EXIST);
                }
                let _ = entries.insert(name.to_owned(), child.index);
            }
            Some(NodeData::Regular(_)) => return Err(Errno::NOTDIR),
            None => return Err(Errno::NOENT),
        }

        if let Some(node) = slab.get_mut(child.index) {
            node.links = node.links.wrapping_add(1);
        }
        Ok(())
    }

    fn unlink(&self, parent: &NodeHandle, child: &NodeHandle) -> Result<(), Errno> {
        let mut slab = self.lock();

        let child_has_entries = slab
            .get(child.index)
            .ok_or(Errno::NOENT)?
            .entries()
            .map_or(false, |entries| !entries.is_empty());
        if child_has_entries {
            return Err(Errno::NOTEMPTY);
        }

        let entries = match slab.get_mut(parent.index).map(|node| &mut node.data) {
            Some(NodeData::Directory(entries)) => entries,
            Some(NodeData::Regular(_)) => return Err(Errno::NOTDIR),
            None => return Err(Errno::NOENT),
        };
        // a hard-linked node has several names; remove the one it was found by
        let name = match child.name {
            Some(ref name) if entries.get(name) == Some(&child.index) => name.clone(),
            Some(_) => return Err(Errno::NOENT),
            None => entries
                .iter()
                .find(|&(_, &index)| index == child.index)
                .map(|(name, _)| name.clone())
                .ok_or(Errno::NOENT)?,
        };
        let _ = entries.remove(&name);

        if let Some(node) = slab.get_mut(child.index) {
            node.links = node.links.saturating_sub(1);
        }
        debug!(index = %child.index, ?name, "unlinked");
        Ok(())
    }

    fn destroy(&self, node: NodeHandle) -> Result<(), Errno> {
        let mut slab = self.lock();
        let entry = slab.get_mut(node.index).ok_or(Errno::NOENT)?;
        entry.refs = entry.refs.saturating_sub(1);
        let linked = entry.links > 0;
        self.collect(&mut slab, node.index);
        if linked {
            return Err(Errno::BUSY);
        }
        Ok(())
    }

    fn release(&self, node: NodeHandle) {
        let mut slab = self.lock();
        if let Some(entry) = slab.get_mut(node.index) {
            entry.refs = entry.refs.saturating_sub(1);
        }
        self.collect(&mut slab, node.index);
    }

    fn index_of(&self, node: &NodeHandle) -> FsIndex {
        node.index
    }

    fn size_of(&self, node: &NodeHandle) -> u64 {
        self.with_node(node, 0, Node::size)
    }

    fn links_of(&self, node: &NodeHandle) -> u32 {
        self.with_node(node, 0, |node| node.links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use libfs::kernel::{self, ipc_call};
    use libfs::loopback::LoopbackVfs;
    use libfs::ops::ReplyLookup;
    use libfs::plb::AddressSpace;
    use libfs::types::{FsHandle, FsInfo, Triplet};
    use libfs::Server;

    use async_std::task::{self, JoinHandle};

    const FS: FsHandle = FsHandle(7);
    const DEV: DevHandle = DevHandle(1);
    const NONE: FsIndex = FsIndex(0);

    async fn start(fs: MemFs) -> (Arc<LoopbackVfs>, JoinHandle<io::Result<()>>) {
        let vfs = Arc::new(LoopbackVfs::new(FS));
        let server = Server::register(FsInfo::new("memfs").unwrap(), fs)
            .address_space(Arc::new(AddressSpace::new(AddressSpace::DEFAULT_LIMIT)))
            .initialize(&*vfs)
            .await
            .unwrap();
        assert_eq!(server.fs_handle(), FS);
        (vfs, task::spawn(server.run()))
    }

    async fn stop(vfs: &LoopbackVfs, server: JoinHandle<io::Result<()>>) {
        vfs.hang_up();
        server.await.unwrap();
    }

    fn found(ret: Result<ReplyLookup, Errno>) -> Triplet {
        match ret {
            Ok(ReplyLookup::Found(triplet)) => triplet,
            ret => panic!("unexpected answer: {:?}", ret),
        }
    }

    #[test]
    fn mount_and_resolve_root() {
        task::block_on(async {
            let (vfs, server) = start(MemFs::new()).await;

            let err = vfs.lookup("/", DEV, LookupFlags::empty(), NONE).await;
            assert_eq!(err, Err(Errno::NOENT));

            let root = vfs.mounted(DEV).await.unwrap();
            assert_eq!(root.link_count, 1);
            assert_eq!(vfs.mounted(DEV).await.unwrap(), root);

            let t = found(vfs.lookup("/", DEV, LookupFlags::DIRECTORY, NONE).await);
            assert_eq!(t.fs_handle, FS);
            assert_eq!(t.dev_handle, DEV);
            assert_eq!(t.index, root.root_index);

            stop(&vfs, server).await;
        });
    }

    #[test]
    fn create_and_check_types() {
        task::block_on(async {
            let fs = MemFs::new();
            let (vfs, server) = start(fs.clone()).await;
            let _ = vfs.mounted(DEV).await.unwrap();

            let dir_flags = LookupFlags::CREATE | LookupFlags::DIRECTORY;
            let a = found(vfs.lookup("/a", DEV, dir_flags, NONE).await);
            let b = found(vfs.lookup("/a/b", DEV, LookupFlags::CREATE, NONE).await);
            assert_eq!(b.link_count, 1);
            assert_ne!(a.index, b.index);

            fs.write_file(DEV, b.index, b"hello").unwrap();
            let t = found(vfs.lookup("/a/b", DEV, LookupFlags::FILE, NONE).await);
            assert_eq!(t.index, b.index);
            assert_eq!(t.size, 5);

            let excl = LookupFlags::CREATE | LookupFlags::EXCLUSIVE;
            assert_eq!(vfs.lookup("/a/b", DEV, excl, NONE).await, Err(Errno::EXIST));
            let again = found(vfs.lookup("/a/b", DEV, LookupFlags::CREATE, NONE).await);
            assert_eq!(again.index, b.index);

            let flags = LookupFlags::DIRECTORY;
            assert_eq!(vfs.lookup("/a/b", DEV, flags, NONE).await, Err(Errno::NOTDIR));
            let flags = LookupFlags::FILE;
            assert_eq!(vfs.lookup("/a", DEV, flags, NONE).await, Err(Errno::ISDIR));
            let flags = LookupFlags::CREATE;
            assert_eq!(vfs.lookup("/a/b/c", DEV, flags, NONE).await, Err(Errno::NOTDIR));
            assert_eq!(vfs.lookup("/x/y", DEV, flags, NONE).await, Err(Errno::NOENT));

            let parent = found(vfs.lookup("/a/b", DEV, LookupFlags::PARENT, NONE).await);
            assert_eq!(parent.index, a.index);

            assert_eq!(fs.node_count(), 3);
            stop(&vfs, server).await;
        });
    }

    #[test]
    fn unlink_frees_node() {
        task::block_on(async {
            let fs = MemFs::new();
            let (vfs, server) = start(fs.clone()).await;
            let _ = vfs.mounted(DEV).await.unwrap();

            let dir_flags = LookupFlags::CREATE | LookupFlags::DIRECTORY;
            let a = found(vfs.lookup("/a", DEV, dir_flags, NONE).await);
            let b = found(vfs.lookup("/a/b", DEV, LookupFlags::CREATE, NONE).await);

            let ret = vfs.lookup("/a", DEV, LookupFlags::UNLINK, NONE).await;
            match ret {
                Ok(ReplyLookup::Unlinked { status, triplet }) => {
                    assert_eq!(status, Errno::NOTEMPTY);
                    assert_eq!(triplet.index, a.index);
                }
                ret => panic!("unexpected answer: {:?}", ret),
            }

            let ret = vfs.lookup("/a/b", DEV, LookupFlags::UNLINK, NONE).await;
            match ret {
                Ok(ReplyLookup::Unlinked { status, triplet }) => {
                    assert_eq!(status, Errno::OK);
                    assert_eq!(triplet.index, b.index);
                    assert_eq!(triplet.link_count, 1);
                }
                ret => panic!("unexpected answer: {:?}", ret),
            }
            assert_eq!(fs.node_count(), 2);

            let flags = LookupFlags::empty();
            assert_eq!(vfs.lookup("/a/b", DEV, flags, NONE).await, Err(Errno::NOENT));
            let flags = LookupFlags::UNLINK;
            assert_eq!(vfs.lookup("/", DEV, flags, NONE).await, Err(Errno::BUSY));

            stop(&vfs, server).await;
        });
    }

    #[test]
    fn link_existing_node() {
        task::block_on(async {
            let (vfs, server) = start(MemFs::new()).await;
            let _ = vfs.mounted(DEV).await.unwrap();

            let f = found(vfs.lookup("/f", DEV, LookupFlags::CREATE, NONE).await);
            let g = found(vfs.lookup("/g", DEV, LookupFlags::LINK, f.index).await);
            assert_eq!(g.index, f.index);
            assert_eq!(g.link_count, 2);

            let flags = LookupFlags::LINK;
            assert_eq!(vfs.lookup("/g", DEV, flags, f.index).await, Err(Errno::EXIST));
            let missing = FsIndex(1000);
            assert_eq!(vfs.lookup("/h", DEV, flags, missing).await, Err(Errno::NOSPC));

            let dir_flags = LookupFlags::CREATE | LookupFlags::DIRECTORY;
            let d = found(vfs.lookup("/d", DEV, dir_flags, NONE).await);
            assert_eq!(vfs.lookup("/e", DEV, flags, d.index).await, Err(Errno::LIMIT));

            stop(&vfs, server).await;
        });
    }

    #[test]
    fn unlink_removes_the_resolved_name() {
        task::block_on(async {
            let fs = MemFs::new();
            let (vfs, server) = start(fs.clone()).await;
            let _ = vfs.mounted(DEV).await.unwrap();

            let f = found(vfs.lookup("/f", DEV, LookupFlags::CREATE, NONE).await);
            let g = found(vfs.lookup("/g", DEV, LookupFlags::LINK, f.index).await);
            assert_eq!(g.link_count, 2);

            let ret = vfs.lookup("/g", DEV, LookupFlags::UNLINK, NONE).await;
            match ret {
                Ok(ReplyLookup::Unlinked { status, triplet }) => {
                    assert_eq!(status, Errno::OK);
                    assert_eq!(triplet.index, f.index);
                    assert_eq!(triplet.link_count, 2);
                }
                ret => panic!("unexpected answer: {:?}", ret),
            }

            let flags = LookupFlags::empty();
            assert_eq!(vfs.lookup("/g", DEV, flags, NONE).await, Err(Errno::NOENT));
            let t = found(vfs.lookup("/f", DEV, flags, NONE).await);
            assert_eq!(t.index, f.index);
            assert_eq!(t.link_count, 1);
            assert_eq!(fs.node_count(), 2);

            stop(&vfs, server).await;
        });
    }

    #[test]
    fn node_limit() {
        task::block_on(async {
            let fs = MemFs::with_node_limit(2);
            let (vfs, server) = start(fs.clone()).await;
            let _ = vfs.mounted(DEV).await.unwrap();

            let flags = LookupFlags::CREATE;
            let _ = found(vfs.lookup("/a", DEV, flags, NONE).await);
            assert_eq!(vfs.lookup("/b", DEV, flags, NONE).await, Err(Errno::NOSPC));
            assert_eq!(fs.node_count(), 2);

            stop(&vfs, server).await;
        });
    }

    #[test]
    fn long_name_creates_nothing() {
        task::block_on(async {
            let fs = MemFs::new();
            let (vfs, server) = start(fs.clone()).await;
            let _ = vfs.mounted(DEV).await.unwrap();

            let path = format!("/{}", "n".repeat(kernel::NAME_MAX));
            let flags = LookupFlags::CREATE;
            assert_eq!(vfs.lookup(&path, DEV, flags, NONE).await, Err(Errno::NAMETOOLONG));
            assert_eq!(fs.node_count(), 1);

            stop(&vfs, server).await;
        });
    }

    #[test]
    fn concurrent_lookups() {
        task::block_on(async {
            let (vfs, server) = start(MemFs::new()).await;
            let _ = vfs.mounted(DEV).await.unwrap();

            let mut created = Vec::new();
            for i in 0..16 {
                let path = format!("/file{}", i);
                let t = found(vfs.lookup(&path, DEV, LookupFlags::CREATE, NONE).await);
                created.push((path, t.index));
            }

            let tasks: Vec<_> = created
                .into_iter()
                .map(|(path, index)| {
                    let vfs = Arc::clone(&vfs);
                    task::spawn(async move {
                        let t = found(vfs.lookup(&path, DEV, LookupFlags::FILE, NONE).await);
                        assert_eq!(t.index, index);
                    })
                })
                .collect();
            for t in tasks {
                t.await;
            }

            stop(&vfs, server).await;
        });
    }

    #[test]
    fn unknown_method() {
        task::block_on(async {
            let (vfs, server) = start(MemFs::new()).await;

            let answer = vfs
                .call(ipc_call {
                    method: 4242,
                    args: [0; kernel::IPC_ARGS],
                })
                .await;
            assert_eq!(answer.retval, Errno::NOSYS.as_raw());

            stop(&vfs, server).await;
        });
    }
}
