//! The context of a call

use crate::errno::Errno;
use crate::kernel::ipc_answer;
use crate::ops::{encode_errno, Encode, IsReplyOf};
use crate::plb::PathBuffer;
use crate::transport::AnswerSender;
use crate::types::FsHandle;

use std::fmt::{self, Debug};
use std::io;
use std::sync::Arc;

/// Identifies a call
#[derive(Debug, Clone, Copy)]
pub struct CallHeader {
    /// call id
    pub id: u64,
    /// method number
    pub method: u32,
}

/// The context of a call. Consumed by answering, so a call is answered at
/// most once.
pub struct FsContext {
    /// header
    header: CallHeader,
    /// answer channel
    answer: AnswerSender,
    /// assigned by VFS
    fs_handle: FsHandle,
    /// the shared PLB
    plb: Arc<PathBuffer>,
}

impl Debug for FsContext {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsContext")
            .field("header", &self.header)
            .field("fs_handle", &self.fs_handle)
            .finish()
    }
}

impl FsContext {
    #[must_use]
    #[inline]
    pub fn new(
        header: CallHeader,
        answer: AnswerSender,
        fs_handle: FsHandle,
        plb: Arc<PathBuffer>,
    ) -> Self {
        Self {
            header,
            answer,
            fs_handle,
            plb,
        }
    }

    #[must_use]
    #[inline]
    pub const fn header(&self) -> &CallHeader {
        &self.header
    }

    #[must_use]
    #[inline]
    pub const fn fs_handle(&self) -> FsHandle {
        self.fs_handle
    }

    #[must_use]
    #[inline]
    pub const fn plb(&self) -> &Arc<PathBuffer> {
        &self.plb
    }

    /// Sends a reply
    /// # Errors
    /// Returns [`io::Error`] when VFS has hung up
    #[inline]
    pub fn reply<T, R>(self, _: &T, reply: R) -> io::Result<()>
    where
        R: IsReplyOf<T> + Encode,
    {
        self.answer(reply.encode())
    }

    /// Sends errno
    /// # Errors
    /// Returns [`io::Error`] when VFS has hung up
    #[inline]
    pub fn reply_err(self, errno: Errno) -> io::Result<()> {
        self.answer(encode_errno(errno))
    }

    fn answer(self, answer: ipc_answer) -> io::Result<()> {
        let id = self.header.id;
        self.answer.send(answer).map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("VFS hung up before call {} was answered", id),
            )
        })
    }
}
