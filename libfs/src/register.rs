//! Registration of a filesystem server with VFS

use crate::errno::Errno;
use crate::kernel::{self, ipc_call, PLB_SIZE};
use crate::plb::{AddressSpace, PathBuffer};
use crate::transport::{CallbackChannel, VfsSession};
use crate::types::{FsHandle, FsInfo};

use std::convert::TryFrom;
use std::sync::Arc;

use tracing::debug;

/// The outcome of a successful registration
#[derive(Debug)]
pub struct Registration {
    /// assigned by VFS
    pub fs_handle: FsHandle,
    /// calls from VFS
    pub callback: CallbackChannel,
    /// the PLB shared by VFS
    pub plb: Arc<PathBuffer>,
}

/// Registers a filesystem server.
///
/// VFS answers the registration call out-of-order, after the descriptor
/// record, the callback connection and the PLB share went through. The call
/// is always waited for, whatever step fails.
/// # Errors
/// Returns the status of the first failing step, or the refusal answered by VFS
#[tracing::instrument(skip(vfs, space))]
pub async fn register<S: VfsSession + ?Sized>(
    vfs: &S,
    info: &FsInfo,
    space: &Arc<AddressSpace>,
) -> Result<Registration, Errno> {
    let req = vfs.send(ipc_call {
        method: kernel::VFS_REGISTER,
        args: [0; kernel::IPC_ARGS],
    });

    let ret = handshake(vfs, info, space).await;

    let answer = req.wait().await;
    debug!(retval = answer.retval, "registration answered");

    // the answer only counts once every local step went through
    let (callback, plb) = ret?;
    Errno::from_raw(answer.retval).into_result()?;
    let fs_handle = FsHandle(u32::try_from(answer.args[0]).map_err(|_| Errno::INVAL)?);

    Ok(Registration {
        fs_handle,
        callback,
        plb: Arc::new(plb),
    })
}

/// Steps between the registration call and its answer
async fn handshake<S: VfsSession + ?Sized>(
    vfs: &S,
    info: &FsInfo,
    space: &Arc<AddressSpace>,
) -> Result<(CallbackChannel, PathBuffer), Errno> {
    vfs.data_write(info.as_bytes()).await?;

    let callback = vfs.connect_to_me().await?;

    let region = match space.reserve(PLB_SIZE) {
        Some(region) => region,
        None => {
            debug!(available = space.available(), "no address space for the PLB");
            return Err(Errno::NOMEM);
        }
    };

    let plb = vfs.share_in(region).await?;
    Ok((callback, plb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackVfs;
    use crate::ops::encode_errno;
    use crate::plb::Region;
    use crate::transport::PendingCall;

    use async_std::task;

    fn info() -> FsInfo {
        FsInfo::new("testfs").unwrap()
    }

    #[test]
    fn register_ok() {
        task::block_on(async {
            let vfs = LoopbackVfs::new(FsHandle(3));
            let space = Arc::new(AddressSpace::new(AddressSpace::DEFAULT_LIMIT));

            let reg = register(&vfs, &info(), &space).await.unwrap();
            assert_eq!(reg.fs_handle, FsHandle(3));
            assert_eq!(reg.plb.capacity(), PLB_SIZE);
            assert_eq!(vfs.fs_info().unwrap().name(), b"testfs");
            assert_eq!(space.available(), AddressSpace::DEFAULT_LIMIT - PLB_SIZE);
        });
    }

    #[test]
    fn register_without_address_space() {
        task::block_on(async {
            let vfs = LoopbackVfs::new(FsHandle(3));
            let space = Arc::new(AddressSpace::new(0));

            let err = register(&vfs, &info(), &space).await.unwrap_err();
            assert_eq!(err, Errno::NOMEM);
        });
    }

    #[test]
    fn register_share_mismatch() {
        task::block_on(async {
            let vfs = LoopbackVfs::with_plb_capacity(FsHandle(3), PLB_SIZE / 2);
            let space = Arc::new(AddressSpace::new(AddressSpace::DEFAULT_LIMIT));

            let err = register(&vfs, &info(), &space).await.unwrap_err();
            assert_eq!(err, Errno::INVAL);
            // the region is given back
            assert_eq!(space.available(), AddressSpace::DEFAULT_LIMIT);
        });
    }

    #[test]
    fn register_twice_reports_first_failure() {
        task::block_on(async {
            let vfs = LoopbackVfs::new(FsHandle(3));
            let space = Arc::new(AddressSpace::new(AddressSpace::DEFAULT_LIMIT));

            let _reg = register(&vfs, &info(), &space).await.unwrap();

            // VFS refuses with EXIST, but the descriptor write fails first
            let err = register(&vfs, &info(), &space).await.unwrap_err();
            assert_eq!(err, Errno::INVAL);
            assert_eq!(space.available(), AddressSpace::DEFAULT_LIMIT - PLB_SIZE);
        });
    }

    /// Answers every step but refuses the registration itself
    struct RefusingVfs(LoopbackVfs);

    #[async_trait::async_trait]
    impl VfsSession for RefusingVfs {
        fn send(&self, _: ipc_call) -> PendingCall {
            let (tx, pending) = PendingCall::new();
            let _ = tx.send(encode_errno(Errno::LIMIT));
            pending
        }

        async fn data_write(&self, _: &[u8]) -> Result<(), Errno> {
            Ok(())
        }

        async fn connect_to_me(&self) -> Result<CallbackChannel, Errno> {
            let (_, rx) = async_std::channel::unbounded();
            Ok(rx)
        }

        async fn share_in(&self, region: Region) -> Result<PathBuffer, Errno> {
            self.0.share_in(region).await
        }
    }

    #[test]
    fn refusal_after_local_steps() {
        task::block_on(async {
            let vfs = RefusingVfs(LoopbackVfs::new(FsHandle(3)));
            let space = Arc::new(AddressSpace::new(AddressSpace::DEFAULT_LIMIT));

            let err = register(&vfs, &info(), &space).await.unwrap_err();
            assert_eq!(err, Errno::LIMIT);
            assert_eq!(space.available(), AddressSpace::DEFAULT_LIMIT);

            // a local failure still wins over the refusal
            let space = Arc::new(AddressSpace::new(0));
            let err = register(&vfs, &info(), &space).await.unwrap_err();
            assert_eq!(err, Errno::NOMEM);
        });
    }
}
