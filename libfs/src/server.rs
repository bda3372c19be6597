//! Filesystem server

use crate::context::{CallHeader, FsContext};
use crate::errno::Errno;
use crate::fs::FileSystem;
use crate::ops::Operation;
use crate::plb::{AddressSpace, PathBuffer};
use crate::register::{register, Registration};
use crate::transport::{Call, CallbackChannel, VfsSession};
use crate::types::{FsHandle, FsInfo};

use std::io;
use std::sync::Arc;

use async_std::task;
use tracing::{debug, debug_span, error};
use tracing_futures::Instrument;

/// The builder of [`Server`]
#[derive(Debug)]
pub struct ServerBuilder<F> {
    /// filesystem descriptor
    info: FsInfo,
    /// where the PLB is mapped
    space: Arc<AddressSpace>,
    /// file system
    fs: F,
}

impl<F> ServerBuilder<F>
where
    F: FileSystem + 'static,
{
    /// Starts to build a [`Server`]
    #[inline]
    pub fn new(info: FsInfo, fs: F) -> Self {
        Self {
            info,
            space: AddressSpace::current(),
            fs,
        }
    }

    /// Maps the PLB into `space` instead of the process address space
    #[must_use]
    #[inline]
    pub fn address_space(mut self, space: Arc<AddressSpace>) -> Self {
        self.space = space;
        self
    }

    /// Registers the filesystem with VFS and returns a [`Server`]
    /// # Errors
    /// Returns the status of the failed registration step
    #[inline]
    pub async fn initialize<S>(self, vfs: &S) -> Result<Server<F>, Errno>
    where
        S: VfsSession + ?Sized,
    {
        debug!(info = ?self.info, "registering");

        let Registration {
            fs_handle,
            callback,
            plb,
        } = register(vfs, &self.info, &self.space).await?;

        debug!(%fs_handle, "registered");

        Ok(Server {
            fs_handle,
            callback,
            plb,
            fs: Arc::new(self.fs),
        })
    }
}

/// Filesystem server
#[derive(Debug)]
pub struct Server<F> {
    /// assigned by VFS
    fs_handle: FsHandle,
    /// calls from VFS
    callback: CallbackChannel,
    /// the shared PLB
    plb: Arc<PathBuffer>,
    /// Arc file system
    fs: Arc<F>,
}

impl<F> Server<F>
where
    F: FileSystem + 'static,
{
    /// Starts to build a [`Server`] for the filesystem described by `info`
    #[inline]
    pub fn register(info: FsInfo, fs: F) -> ServerBuilder<F> {
        ServerBuilder::new(info, fs)
    }

    #[must_use]
    #[inline]
    pub const fn fs_handle(&self) -> FsHandle {
        self.fs_handle
    }

    #[must_use]
    #[inline]
    pub const fn fs(&self) -> &Arc<F> {
        &self.fs
    }

    /// Serves calls until VFS hangs up
    /// # Errors
    /// Returns [`io::Error`]
    #[inline]
    pub async fn run(self) -> io::Result<()> {
        loop {
            debug!("waiting for call");

            let Call { id, call, answer } = match self.callback.recv().await {
                Ok(call) => call,
                Err(_) => break,
            };

            let fs = Arc::clone(&self.fs);
            let header = CallHeader {
                id,
                method: call.method,
            };
            let cx = FsContext::new(header, answer, self.fs_handle, Arc::clone(&self.plb));
            let span = debug_span!("call", id = cx.header().id, method = cx.header().method);

            debug!("spawn task");

            let _ = task::spawn(
                async move {
                    let ret = match Operation::decode(&call) {
                        Ok(op) => {
                            debug!(?op, "got call");
                            fs.dispatch(cx, op).await
                        }
                        Err(err) => {
                            debug!(%err, "failed to decode call");
                            cx.reply_err(err.errno())
                        }
                    };
                    if let Err(err) = ret {
                        error!(%err);
                    }
                }
                .instrument(span),
            ); // task is detached here
        }

        debug!("shutdown");

        Ok(())
    }
}
