//! An in-process VFS coordinator
//!
//! [`LoopbackVfs`] owns a PLB and plays the VFS side of registration and
//! path lookup against a single filesystem server running in the same
//! process.

use crate::errno::Errno;
use crate::flags::LookupFlags;
use crate::kernel::{self, ipc_answer, ipc_call, PLB_SIZE};
use crate::ops::{encode_errno, OpLookup, OpMounted, ReplyLookup, ReplyMounted};
use crate::plb::{PathBuffer, PlbWriter, Region};
use crate::transport::{AnswerSender, Call, CallbackChannel, PendingCall, VfsSession};
use crate::types::{DevHandle, FsHandle, FsIndex, FsInfo};

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_std::channel::{self, Sender};
use tracing::debug;

/// Registration state
#[derive(Debug, Default)]
struct State {
    /// descriptor sent by the server
    info: Option<FsInfo>,
    /// the registration call, answered after the callback connection is made
    pending_register: Option<AnswerSender>,
    /// the callback connection
    callback: Option<Sender<Call>>,
}

/// Bytes of the PLB taken by lookups in flight
#[derive(Debug, Default)]
struct PlbRing {
    /// absolute offset of the next path
    head: u64,
    /// absolute start -> length
    in_use: BTreeMap<u64, usize>,
}

/// The VFS side of a single filesystem server
#[derive(Debug)]
pub struct LoopbackVfs {
    /// handle assigned on registration
    fs_handle: FsHandle,
    /// the PLB
    plb: PlbWriter,
    /// PLB space bookkeeping
    ring: Mutex<PlbRing>,
    /// registration state
    state: Mutex<State>,
    /// call ids
    next_id: AtomicU64,
}

/// Locks a mutex, ignoring poison
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A path stored in the PLB for the duration of one lookup
struct PlbSlot<'a> {
    /// owner
    vfs: &'a LoopbackVfs,
    /// absolute offset of the first character
    start: u64,
    /// path length
    len: usize,
}

impl Drop for PlbSlot<'_> {
    fn drop(&mut self) {
        let _ = lock(&self.vfs.ring).in_use.remove(&self.start);
    }
}

impl PlbSlot<'_> {
    /// `[next, last]` as offsets into the buffer
    fn bounds(&self) -> (u64, u64) {
        let cap = self.vfs.capacity();
        let len = u64::try_from(self.len).unwrap_or(u64::MAX);
        let next = self.start % cap;
        let last = self.start.wrapping_add(len).wrapping_sub(1) % cap;
        (next, last)
    }
}

impl LoopbackVfs {
    /// Creates a coordinator with a PLB of [`PLB_SIZE`] bytes
    #[must_use]
    #[inline]
    pub fn new(fs_handle: FsHandle) -> Self {
        Self::with_plb_capacity(fs_handle, PLB_SIZE)
    }

    /// Creates a coordinator with a PLB of `capacity` bytes
    /// # Panics
    /// Panics if `capacity` is zero
    #[must_use]
    #[inline]
    pub fn with_plb_capacity(fs_handle: FsHandle, capacity: usize) -> Self {
        Self {
            fs_handle,
            plb: PlbWriter::new(capacity),
            ring: Mutex::default(),
            state: Mutex::default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// The descriptor of the registered filesystem
    #[must_use]
    #[inline]
    pub fn fs_info(&self) -> Option<FsInfo> {
        lock(&self.state).info
    }

    /// PLB capacity as an offset
    fn capacity(&self) -> u64 {
        u64::try_from(self.plb.capacity()).unwrap_or(u64::MAX)
    }

    /// Sends a call on the callback connection and waits for the answer.
    /// Answers [`Errno::HANGUP`] when there is no server to call.
    #[inline]
    pub async fn call(&self, call: ipc_call) -> ipc_answer {
        let callback = lock(&self.state).callback.clone();
        let callback = match callback {
            Some(tx) => tx,
            None => return encode_errno(Errno::HANGUP),
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (answer, pending) = PendingCall::new();
        if callback.send(Call { id, call, answer }).await.is_err() {
            return encode_errno(Errno::HANGUP);
        }
        pending.wait().await
    }

    /// Looks up an absolute path on `dev_handle`
    /// # Errors
    /// Returns [`Errno::INVAL`] if `path` is not absolute,
    /// [`Errno::LIMIT`] if the PLB has no room for it,
    /// or the status answered by the server
    #[inline]
    pub async fn lookup(
        &self,
        path: &str,
        dev_handle: DevHandle,
        flags: LookupFlags,
        index: FsIndex,
    ) -> Result<ReplyLookup, Errno> {
        let bytes = path.as_bytes();
        if bytes.first() != Some(&b'/') {
            return Err(Errno::INVAL);
        }

        let slot = self.store_path(bytes)?;
        let (next, last) = slot.bounds();
        let op = OpLookup::new(next, last, dev_handle, flags, index);
        debug!(?op, path, "lookup");

        let answer = self.call(op.to_call()).await;
        drop(slot);
        ReplyLookup::decode(&op, &answer)
    }

    /// Tells the server that `dev_handle` has been mounted
    /// # Errors
    /// Returns the status answered by the server
    #[inline]
    pub async fn mounted(&self, dev_handle: DevHandle) -> Result<ReplyMounted, Errno> {
        let op = OpMounted::new(dev_handle);
        let answer = self.call(op.to_call()).await;
        ReplyMounted::decode(&answer)
    }

    /// Closes the callback connection. The server stops once calls in flight
    /// have been delivered.
    #[inline]
    pub fn hang_up(&self) {
        if let Some(tx) = lock(&self.state).callback.take() {
            let _ = tx.close();
        }
    }

    /// Copies a path into free PLB space
    fn store_path(&self, bytes: &[u8]) -> Result<PlbSlot<'_>, Errno> {
        let cap = self.capacity();
        let len = u64::try_from(bytes.len()).map_err(|_| Errno::LIMIT)?;

        let start = {
            let mut ring = lock(&self.ring);
            let tail = ring.in_use.keys().next().copied().unwrap_or(ring.head);
            let used = ring.head.wrapping_sub(tail);
            if used.saturating_add(len) > cap {
                return Err(Errno::LIMIT);
            }
            let start = ring.head;
            ring.head = ring.head.wrapping_add(len);
            let _ = ring.in_use.insert(start, bytes.len());
            start
        };

        let slot = PlbSlot {
            vfs: self,
            start,
            len: bytes.len(),
        };
        self.plb.write_at(start, bytes);
        Ok(slot)
    }

    /// Answers the registration call, if it is still pending
    fn answer_register(state: &mut State, answer: ipc_answer) {
        if let Some(tx) = state.pending_register.take() {
            let _ = tx.send(answer);
        }
    }
}

#[async_trait::async_trait]
impl VfsSession for LoopbackVfs {
    fn send(&self, call: ipc_call) -> PendingCall {
        let (tx, pending) = PendingCall::new();
        if call.method != kernel::VFS_REGISTER {
            let _ = tx.send(encode_errno(Errno::NOSYS));
            return pending;
        }

        let mut state = lock(&self.state);
        if state.pending_register.is_some() || state.callback.is_some() {
            let _ = tx.send(encode_errno(Errno::EXIST));
        } else {
            state.pending_register = Some(tx);
        }
        pending
    }

    async fn data_write(&self, data: &[u8]) -> Result<(), Errno> {
        let mut state = lock(&self.state);
        if state.pending_register.is_none() {
            return Err(Errno::INVAL);
        }
        match FsInfo::from_bytes(data) {
            Ok(info) => {
                debug!(?info, "filesystem descriptor");
                state.info = Some(info);
                Ok(())
            }
            Err(errno) => {
                Self::answer_register(&mut state, encode_errno(errno));
                Err(errno)
            }
        }
    }

    async fn connect_to_me(&self) -> Result<CallbackChannel, Errno> {
        let mut state = lock(&self.state);
        if state.pending_register.is_none() || state.info.is_none() {
            return Err(Errno::INVAL);
        }
        let (tx, rx) = channel::unbounded();
        state.callback = Some(tx);

        let mut answer = encode_errno(Errno::OK);
        answer.args[0] = u64::from(self.fs_handle.as_raw());
        Self::answer_register(&mut state, answer);
        Ok(rx)
    }

    async fn share_in(&self, region: Region) -> Result<PathBuffer, Errno> {
        self.plb.share_into(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_std::task;

    #[test]
    fn lookup_without_server() {
        task::block_on(async {
            let vfs = LoopbackVfs::new(FsHandle(1));
            let err = vfs
                .lookup("/a", DevHandle(1), LookupFlags::empty(), FsIndex(0))
                .await
                .unwrap_err();
            assert_eq!(err, Errno::HANGUP);

            let err = vfs
                .lookup("a", DevHandle(1), LookupFlags::empty(), FsIndex(0))
                .await
                .unwrap_err();
            assert_eq!(err, Errno::INVAL);
        });
    }

    #[test]
    fn plb_space_is_reused() {
        let vfs = LoopbackVfs::with_plb_capacity(FsHandle(1), 8);
        {
            let slot = vfs.store_path(b"/abcde").unwrap();
            assert_eq!(slot.bounds(), (0, 5));
            assert_eq!(vfs.store_path(b"/xyz").err(), Some(Errno::LIMIT));
        }
        let slot = vfs.store_path(b"/xyz").unwrap();
        assert_eq!(slot.bounds(), (6, 1));
    }

    #[test]
    fn bad_descriptor_answers_registration() {
        task::block_on(async {
            let vfs = LoopbackVfs::new(FsHandle(1));
            let pending = vfs.send(ipc_call {
                method: kernel::VFS_REGISTER,
                args: [0; kernel::IPC_ARGS],
            });
            assert_eq!(vfs.data_write(b"short").await, Err(Errno::INVAL));
            assert_eq!(pending.wait().await.retval, Errno::INVAL.as_raw());
        });
    }
}
