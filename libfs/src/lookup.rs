//! Path lookup
//!
//! Resolves a canonical path stored in the PLB against the nodes of a
//! filesystem and produces the answer to a `VFS_LOOKUP` call.

use crate::context::FsContext;
use crate::errno::Errno;
use crate::flags::LookupFlags;
use crate::kernel::NAME_MAX;
use crate::node::{NodeOps, NodeRef};
use crate::ops::{OpLookup, ReplyLookup};
use crate::plb::PathBuffer;
use crate::types::FsHandle;
use crate::utils::DisplayBytes;

use std::convert::TryFrom;
use std::sync::Arc;
use std::{io, mem};

use blocking::unblock;
use smallvec::SmallVec;
use tracing::{debug, error};

/// Path separator
const SLASH: u8 = b'/';

/// A path component collected from the PLB
type Component = SmallVec<[u8; 64]>;

/// How a separator inside a component is treated
#[derive(Debug, Clone, Copy)]
enum Separator {
    /// ends the component
    End,
    /// fails the lookup with `ENOENT`
    Reject,
}

/// Walks `[next, last]` of the PLB
struct Cursor<'p> {
    plb: &'p PathBuffer,
    next: u64,
    last: u64,
}

impl<'p> Cursor<'p> {
    fn new(plb: &'p PathBuffer, op: &OpLookup) -> Self {
        let next = op.next();
        let mut last = op.last();
        if last < next {
            // the path wraps around the end of the buffer
            let cap = u64::try_from(plb.capacity()).unwrap_or(u64::MAX);
            last = last.saturating_add(cap);
        }
        Self { plb, next, last }
    }

    fn has_more(&self) -> bool {
        self.next <= self.last
    }

    fn peek(&self) -> u8 {
        self.plb.char_at(self.next)
    }

    fn advance(&mut self) {
        self.next = self.next.wrapping_add(1);
    }

    /// Collects characters up to the next separator or the end of the path
    fn component(&mut self, sep: Separator) -> Result<Component, Errno> {
        let mut name = Component::new();
        while self.has_more() {
            let c = self.peek();
            if c == SLASH {
                match sep {
                    Separator::End => break,
                    Separator::Reject => {
                        debug!(name = %DisplayBytes(&name), "excess components");
                        return Err(Errno::NOENT);
                    }
                }
            }
            if name.len() + 1 >= NAME_MAX {
                debug!(len = name.len() + 1, "component length overflow");
                return Err(Errno::NAMETOOLONG);
            }
            name.push(c);
            self.advance();
        }
        Ok(name)
    }
}

/// Looks up the path of `op`.
///
/// Every node reference taken during the walk is released before returning.
/// # Errors
/// Returns the status of a bare error answer
#[tracing::instrument(level = "debug", skip(ops, plb))]
pub fn lookup<O: NodeOps + ?Sized>(
    ops: &O,
    plb: &PathBuffer,
    fs_handle: FsHandle,
    op: &OpLookup,
) -> Result<ReplyLookup, Errno> {
    let dev = op.dev_handle();
    let flags = op.flags();
    let mut cursor = Cursor::new(plb, op);

    let mut cur = match ops.root(dev) {
        Some(root) => NodeRef::new(ops, root),
        None => {
            debug!(%dev, "no root for device");
            return Err(Errno::NOENT);
        }
    };
    let mut par: Option<NodeRef<'_, O>> = None;

    if cursor.has_more() && cursor.peek() == SLASH {
        cursor.advance();
    }

    while cursor.has_more() && ops.is_container(cur.node()) {
        let name = cursor.component(Separator::End)?;
        cursor.advance(); // eat slash

        if name.is_empty() {
            debug!("empty component");
            return Err(Errno::NOENT);
        }

        let child = match ops.match_child(cur.node(), &name) {
            Some(child) => child,
            None => {
                if cursor.has_more() {
                    debug!(name = %DisplayBytes(&name), "missing intermediate component");
                    return Err(Errno::NOENT);
                }
                if flags.wants_new_link() {
                    if !ops.is_directory(cur.node()) {
                        return Err(Errno::NOTDIR);
                    }
                    return link_new(ops, fs_handle, op, &cur, &name);
                }
                if flags.contains(LookupFlags::PARENT) {
                    return Ok(ReplyLookup::Found(cur.triplet(fs_handle, dev)));
                }
                debug!(name = %DisplayBytes(&name), "no such entry");
                return Err(Errno::NOENT);
            }
        };

        // descend one level, releasing the grandparent
        par = Some(mem::replace(&mut cur, NodeRef::new(ops, child)));
    }

    if cursor.has_more() {
        // `cur` has no children but the path goes on
        if !flags.wants_new_link() {
            return Err(Errno::NOENT);
        }
        if !ops.is_directory(cur.node()) {
            return Err(Errno::NOTDIR);
        }
        let name = cursor.component(Separator::Reject)?;
        return link_new(ops, fs_handle, op, &cur, &name);
    }

    if flags.contains(LookupFlags::PARENT) {
        cur = match par.take() {
            Some(parent) => parent,
            None => {
                debug!("root has no parent");
                return Err(Errno::NOENT);
            }
        };
    }

    if flags.contains(LookupFlags::UNLINK) {
        let parent = match par {
            Some(ref parent) => parent,
            None => {
                debug!("cannot unlink the root");
                return Err(Errno::BUSY);
            }
        };
        let old_link_count = ops.links_of(cur.node());
        let status = Errno::from(ops.unlink(parent.node(), cur.node()));
        let mut triplet = cur.triplet(fs_handle, dev);
        triplet.link_count = old_link_count;
        return Ok(ReplyLookup::Unlinked { status, triplet });
    }

    if flags.rejects_existing() {
        return Err(Errno::EXIST);
    }
    if flags.contains(LookupFlags::FILE) && ops.is_directory(cur.node()) {
        return Err(Errno::ISDIR);
    }
    if flags.contains(LookupFlags::DIRECTORY) && ops.is_file(cur.node()) {
        return Err(Errno::NOTDIR);
    }

    Ok(ReplyLookup::Found(cur.triplet(fs_handle, dev)))
}

/// Creates a node (`CREATE`) or resolves `op.index()` (`LINK`) and links it
/// into `parent` as `name`.
fn link_new<O: NodeOps + ?Sized>(
    ops: &O,
    fs_handle: FsHandle,
    op: &OpLookup,
    parent: &NodeRef<'_, O>,
    name: &[u8],
) -> Result<ReplyLookup, Errno> {
    let dev = op.dev_handle();
    let flags = op.flags();
    let creating = flags.contains(LookupFlags::CREATE);

    let node = if creating {
        ops.create(dev, flags)
    } else {
        ops.resolve(dev, op.index())
    };
    let node = match node {
        Some(node) => NodeRef::new(ops, node),
        None => {
            debug!(creating, index = %op.index(), "no node to link");
            return Err(Errno::NOSPC);
        }
    };

    if let Err(errno) = ops.link(parent.node(), node.node(), name) {
        debug!(name = %DisplayBytes(name), %errno, "failed to link");
        if creating {
            if let Err(err) = ops.destroy(node.into_inner()) {
                error!(%err, "failed to destroy an orphan node");
            }
        }
        return Err(errno);
    }

    Ok(ReplyLookup::Found(node.triplet(fs_handle, dev)))
}

/// Answers a `VFS_LOOKUP` call.
///
/// The walk runs on the blocking thread pool since node operations may block
/// on the backing storage.
/// # Errors
/// Returns [`io::Error`] when VFS has hung up
#[inline]
pub async fn serve<O: NodeOps + 'static>(
    ops: Arc<O>,
    cx: FsContext,
    op: OpLookup,
) -> io::Result<()> {
    let plb = Arc::clone(cx.plb());
    let fs_handle = cx.fs_handle();
    let (op, ret) = unblock(move || {
        let ret = lookup(&*ops, &plb, fs_handle, &op);
        (op, ret)
    })
    .await;
    match ret {
        Ok(reply) => cx.reply(&op, reply),
        Err(errno) => cx.reply_err(errno),
    }
}
