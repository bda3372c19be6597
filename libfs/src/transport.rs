//! Phones between a filesystem server and VFS

use crate::errno::Errno;
use crate::kernel::{ipc_answer, ipc_call};
use crate::ops::encode_errno;
use crate::plb::{PathBuffer, Region};

use futures::channel::oneshot;

/// The answering end of a call
pub type AnswerSender = oneshot::Sender<ipc_answer>;

/// A call delivered to a server, waiting for its answer
#[derive(Debug)]
pub struct Call {
    /// call id, unique per phone
    pub id: u64,
    /// the call itself
    pub call: ipc_call,
    /// where the answer goes
    pub answer: AnswerSender,
}

/// The callback connection on which VFS calls a server
pub type CallbackChannel = async_std::channel::Receiver<Call>;

/// A call sent without waiting for its answer
#[derive(Debug)]
pub struct PendingCall(oneshot::Receiver<ipc_answer>);

impl PendingCall {
    /// Creates a pending call and the sender of its answer
    #[must_use]
    #[inline]
    pub fn new() -> (AnswerSender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self(rx))
    }

    /// Waits for the answer. A peer hanging up answers [`Errno::HANGUP`].
    #[inline]
    pub async fn wait(self) -> ipc_answer {
        match self.0.await {
            Ok(answer) => answer,
            Err(oneshot::Canceled) => encode_errno(Errno::HANGUP),
        }
    }
}

/// A phone to VFS
#[async_trait::async_trait]
pub trait VfsSession: Send + Sync {
    /// Sends a call. The answer may arrive after unrelated calls complete.
    fn send(&self, call: ipc_call) -> PendingCall;

    /// Transfers a block of data to VFS
    async fn data_write(&self, data: &[u8]) -> Result<(), Errno>;

    /// Asks VFS to open a callback connection to this server
    async fn connect_to_me(&self) -> Result<CallbackChannel, Errno>;

    /// Asks VFS to map its PLB read-only into `region`
    async fn share_in(&self, region: Region) -> Result<PathBuffer, Errno>;
}
