//! VFS protocol abi types
//!
//! Method numbers, lookup flag bits and the fixed-size records exchanged
//! between a filesystem server and the VFS coordinator.

/// Page size of the shared mappings
pub const PAGE_SIZE: usize = 4096;

/// Capacity of the Path Lookup Buffer
pub const PLB_SIZE: usize = 2 * PAGE_SIZE;

/// Maximum length of a path component, including the terminating NUL
pub const NAME_MAX: usize = 256;

/// Maximum length of a filesystem name in [`vfs_info`]
pub const FS_NAME_MAX: usize = 20;

/// Number of payload arguments carried by a call or an answer
pub const IPC_ARGS: usize = 5;

/* VFS methods */

/// Registers a filesystem server. Answered out-of-order.
pub const VFS_REGISTER: u32 = 1024;
/// Resolves a path stored in the PLB.
pub const VFS_LOOKUP: u32 = 1025;
/// Notifies a server that one of its devices was mounted.
pub const VFS_MOUNTED: u32 = 1026;

/* Lookup flags */

/// Lookup will succeed only if the object is a regular file.
pub const L_FILE: u32 = 1 << 0;
/// Lookup will succeed only if the object is a directory.
pub const L_DIRECTORY: u32 = 1 << 1;
/// When used with `L_CREATE`, the lookup fails if the object already exists.
pub const L_EXCLUSIVE: u32 = 1 << 2;
/// Creates the object if it does not exist.
pub const L_CREATE: u32 = 1 << 3;
/// Links an existing node under a new name.
pub const L_LINK: u32 = 1 << 4;
/// Removes the object's name from its parent.
pub const L_UNLINK: u32 = 1 << 5;
/// Resolves the parent of the object instead of the object itself.
pub const L_PARENT: u32 = 1 << 6;

/// Filesystem descriptor record sent to VFS during registration
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct vfs_info {
    /// NUL-padded filesystem name
    pub name: [u8; FS_NAME_MAX + 1],
}

/// Raw call as delivered over a phone
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ipc_call {
    pub method: u32,
    pub args: [u64; IPC_ARGS],
}

/// Raw answer to an [`ipc_call`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ipc_answer {
    pub retval: i32,
    pub args: [u64; IPC_ARGS],
}
