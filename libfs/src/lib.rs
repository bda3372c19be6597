//! Filesystem server library
//!
//! Resolves paths stored in a shared Path Lookup Buffer against the nodes of
//! a filesystem, registers the filesystem with VFS and answers its calls.

#![deny(clippy::all)]

mod utils;

// wire modules
#[allow(non_camel_case_types)]
pub mod kernel;
pub mod ops;

// safe modules
mod context;
mod errno;
mod flags;
mod fs;
mod node;
mod register;
mod server;

pub mod lookup;
pub mod loopback;
pub mod plb;
pub mod transport;
pub mod types;

pub use self::context::{CallHeader, FsContext};
pub use self::errno::Errno;
pub use self::flags::LookupFlags;
pub use self::fs::FileSystem;
pub use self::node::{NodeOps, NodeRef};
pub use self::ops::Operation;
pub use self::register::{register, Registration};
pub use self::server::{Server, ServerBuilder};
