//! Filesystem server

use crate::context::FsContext;
use crate::ops::Operation;

use std::io;

/// A filesystem server
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    /// dispatch operations. Every call must be answered through `cx`.
    async fn dispatch(&self, cx: FsContext, op: Operation) -> io::Result<()>;
}
