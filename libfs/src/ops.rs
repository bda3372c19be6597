//! VFS operations

use crate::errno::Errno;
use crate::flags::LookupFlags;
use crate::kernel::{self, ipc_answer, ipc_call};
use crate::types::{DevHandle, FsHandle, FsIndex, Triplet};

use std::convert::TryFrom;

/// Self is a reply of T
pub trait IsReplyOf<T> {}

/// Encodes a reply into an answer
pub trait Encode {
    /// Builds the raw answer
    fn encode(&self) -> ipc_answer;
}

/// Errors of decoding a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown method {0}")]
    UnknownMethod(u32),

    #[error("invalid lookup flags {0:#x}")]
    InvalidFlags(u64),

    #[error("NumOverflow")]
    NumOverflow,
}

impl DecodeError {
    /// The status answered to a call that failed to decode
    #[must_use]
    #[inline]
    pub const fn errno(self) -> Errno {
        match self {
            Self::UnknownMethod(_) => Errno::NOSYS,
            Self::InvalidFlags(_) | Self::NumOverflow => Errno::INVAL,
        }
    }
}

macro_rules! declare_relation {
    ($op:ty => $reply:ty) => {
        impl IsReplyOf<$op> for $reply {}
    };
}

/// VFS operations
#[derive(Debug)]
#[non_exhaustive]
pub enum Operation {
    Lookup(OpLookup),
    Mounted(OpMounted),
}

impl Operation {
    /// Decodes a call
    /// # Errors
    /// Returns [`DecodeError`] if the method is unknown or the arguments are malformed
    #[inline]
    pub fn decode(call: &ipc_call) -> Result<Self, DecodeError> {
        match call.method {
            kernel::VFS_LOOKUP => Ok(Self::Lookup(OpLookup::decode(call)?)),
            kernel::VFS_MOUNTED => Ok(Self::Mounted(OpMounted::decode(call)?)),
            method => Err(DecodeError::UnknownMethod(method)),
        }
    }
}

/// Narrows an argument into a smaller integer
fn narrow<T: TryFrom<u64>>(arg: u64) -> Result<T, DecodeError> {
    T::try_from(arg).map_err(|_| DecodeError::NumOverflow)
}

/// `VFS_LOOKUP`: args = `[next, last, dev_handle, lflag, index]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpLookup {
    /// first character of the path in the PLB
    next: u64,
    /// last character of the path in the PLB
    last: u64,
    /// device
    dev_handle: DevHandle,
    /// lookup flags
    flags: LookupFlags,
    /// node to link, with [`LookupFlags::LINK`]
    index: FsIndex,
}

impl OpLookup {
    #[must_use]
    #[inline]
    pub const fn new(
        next: u64,
        last: u64,
        dev_handle: DevHandle,
        flags: LookupFlags,
        index: FsIndex,
    ) -> Self {
        Self {
            next,
            last,
            dev_handle,
            flags,
            index,
        }
    }

    fn decode(call: &ipc_call) -> Result<Self, DecodeError> {
        let [next, last, dev, lflag, index] = call.args;
        let raw_flags: u32 = narrow(lflag).map_err(|_| DecodeError::InvalidFlags(lflag))?;
        let flags = LookupFlags::from_bits(raw_flags).ok_or(DecodeError::InvalidFlags(lflag))?;
        Ok(Self {
            next: u64::from(narrow::<u32>(next)?),
            last: u64::from(narrow::<u32>(last)?),
            dev_handle: DevHandle(narrow(dev)?),
            flags,
            index: FsIndex(index),
        })
    }

    /// Encodes the operation into a call
    #[must_use]
    #[inline]
    pub fn to_call(&self) -> ipc_call {
        ipc_call {
            method: kernel::VFS_LOOKUP,
            args: [
                self.next,
                self.last,
                u64::from(self.dev_handle.as_raw()),
                u64::from(self.flags.bits()),
                self.index.as_raw(),
            ],
        }
    }

    #[must_use]
    #[inline]
    pub const fn next(&self) -> u64 {
        self.next
    }

    #[must_use]
    #[inline]
    pub const fn last(&self) -> u64 {
        self.last
    }

    #[must_use]
    #[inline]
    pub const fn dev_handle(&self) -> DevHandle {
        self.dev_handle
    }

    #[must_use]
    #[inline]
    pub const fn flags(&self) -> LookupFlags {
        self.flags
    }

    #[must_use]
    #[inline]
    pub const fn index(&self) -> FsIndex {
        self.index
    }
}

/// Reply of `VFS_LOOKUP`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyLookup {
    /// The path resolved to a node (or to its parent with [`LookupFlags::PARENT`])
    Found(Triplet),
    /// Outcome of [`LookupFlags::UNLINK`]. `link_count` is the count before removal.
    Unlinked {
        /// status of the unlink
        status: Errno,
        /// the unlinked node
        triplet: Triplet,
    },
}

declare_relation!(OpLookup => ReplyLookup);

impl ReplyLookup {
    /// Decodes an answer to `VFS_LOOKUP`.
    /// A bare error answer is returned as `Err`.
    /// # Errors
    /// Returns the status of an error answer
    #[inline]
    pub fn decode(op: &OpLookup, answer: &ipc_answer) -> Result<Self, Errno> {
        let status = Errno::from_raw(answer.retval);
        let [fs_handle, dev_handle, index, size, link_count] = answer.args;
        let triplet = Triplet {
            fs_handle: FsHandle(narrow(fs_handle).map_err(|_| Errno::INVAL)?),
            dev_handle: DevHandle(narrow(dev_handle).map_err(|_| Errno::INVAL)?),
            index: FsIndex(index),
            size,
            link_count: narrow(link_count).map_err(|_| Errno::INVAL)?,
        };
        if op.flags().contains(LookupFlags::UNLINK) && !is_bare_status(status) {
            return Ok(Self::Unlinked { status, triplet });
        }
        status.into_result()?;
        Ok(Self::Found(triplet))
    }

    #[must_use]
    #[inline]
    pub const fn triplet(&self) -> &Triplet {
        match self {
            Self::Found(triplet) | Self::Unlinked { triplet, .. } => triplet,
        }
    }
}

impl Encode for ReplyLookup {
    #[inline]
    fn encode(&self) -> ipc_answer {
        let (status, t) = match *self {
            Self::Found(ref t) => (Errno::OK, t),
            Self::Unlinked { status, ref triplet } => (status, triplet),
        };
        ipc_answer {
            retval: status.as_raw(),
            args: [
                u64::from(t.fs_handle.as_raw()),
                u64::from(t.dev_handle.as_raw()),
                t.index.as_raw(),
                t.size,
                u64::from(t.link_count),
            ],
        }
    }
}

/// `VFS_MOUNTED`: args = `[dev_handle, ..]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpMounted {
    /// mounted device
    dev_handle: DevHandle,
}

impl OpMounted {
    #[must_use]
    #[inline]
    pub const fn new(dev_handle: DevHandle) -> Self {
        Self { dev_handle }
    }

    fn decode(call: &ipc_call) -> Result<Self, DecodeError> {
        Ok(Self {
            dev_handle: DevHandle(narrow(call.args[0])?),
        })
    }

    /// Encodes the operation into a call
    #[must_use]
    #[inline]
    pub fn to_call(&self) -> ipc_call {
        ipc_call {
            method: kernel::VFS_MOUNTED,
            args: [u64::from(self.dev_handle.as_raw()), 0, 0, 0, 0],
        }
    }

    #[must_use]
    #[inline]
    pub const fn dev_handle(&self) -> DevHandle {
        self.dev_handle
    }
}

/// Reply of `VFS_MOUNTED`: the root node of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyMounted {
    pub root_index: FsIndex,
    pub size: u64,
    pub link_count: u32,
}

declare_relation!(OpMounted => ReplyMounted);

impl ReplyMounted {
    /// Decodes an answer to `VFS_MOUNTED`
    /// # Errors
    /// Returns the status of an error answer
    #[inline]
    pub fn decode(answer: &ipc_answer) -> Result<Self, Errno> {
        Errno::from_raw(answer.retval).into_result()?;
        Ok(Self {
            root_index: FsIndex(answer.args[0]),
            size: answer.args[1],
            link_count: narrow(answer.args[2]).map_err(|_| Errno::INVAL)?,
        })
    }
}

impl Encode for ReplyMounted {
    #[inline]
    fn encode(&self) -> ipc_answer {
        ipc_answer {
            retval: Errno::OK.as_raw(),
            args: [
                self.root_index.as_raw(),
                self.size,
                u64::from(self.link_count),
                0,
                0,
            ],
        }
    }
}

/// Statuses a lookup only ever answers without a triplet.
/// An unlink status from the backend must not be one of these.
const fn is_bare_status(status: Errno) -> bool {
    matches!(
        status,
        Errno::NOENT | Errno::BUSY | Errno::INVAL | Errno::NAMETOOLONG | Errno::NOSYS | Errno::HANGUP
    )
}

/// Encodes a bare status answer
#[must_use]
#[inline]
pub const fn encode_errno(errno: Errno) -> ipc_answer {
    ipc_answer {
        retval: errno.as_raw(),
        args: [0; kernel::IPC_ARGS],
    }
}
