//! Identities shared between VFS and filesystem servers

use crate::errno::Errno;
use crate::kernel::{self, FS_NAME_MAX};

use std::fmt::{self, Debug};

use memchr::memchr;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident($raw:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub $raw);

        impl $name {
            #[must_use]
            #[inline]
            pub const fn as_raw(self) -> $raw {
                self.0
            }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

handle_type!(
    /// Filesystem handle assigned by VFS during registration
    FsHandle(u32)
);

handle_type!(
    /// Device handle of a mounted instance
    DevHandle(u32)
);

handle_type!(
    /// Node index, unique within a device
    FsIndex(u64)
);

/// The global identity of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet {
    pub fs_handle: FsHandle,
    pub dev_handle: DevHandle,
    pub index: FsIndex,
    pub size: u64,
    pub link_count: u32,
}

/// Filesystem descriptor record
#[derive(Clone, Copy)]
pub struct FsInfo(kernel::vfs_info);

impl FsInfo {
    /// Creates a descriptor for the filesystem called `name`
    /// # Errors
    /// Returns [`Errno::INVAL`] if the name is empty, too long or contains a NUL byte
    #[inline]
    pub fn new(name: &str) -> Result<Self, Errno> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > FS_NAME_MAX || memchr(0, bytes).is_some() {
            return Err(Errno::INVAL);
        }
        let mut raw = [0_u8; FS_NAME_MAX + 1];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(kernel::vfs_info { name: raw }))
    }

    /// Filesystem name (without NUL)
    #[must_use]
    #[inline]
    pub fn name(&self) -> &[u8] {
        let raw = &self.0.name;
        let len = memchr(0, raw).unwrap_or(raw.len());
        &raw[..len]
    }

    /// The fixed-size wire record
    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0.name
    }

    /// Parses a wire record
    /// # Errors
    /// Returns [`Errno::INVAL`] if the record has the wrong size or is not NUL-terminated
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Errno> {
        if bytes.len() != FS_NAME_MAX + 1 || bytes[FS_NAME_MAX] != 0 {
            return Err(Errno::INVAL);
        }
        let mut raw = [0_u8; FS_NAME_MAX + 1];
        raw.copy_from_slice(bytes);
        let info = Self(kernel::vfs_info { name: raw });
        if info.name().is_empty() {
            return Err(Errno::INVAL);
        }
        Ok(info)
    }
}

impl Debug for FsInfo {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsInfo")
            .field("name", &String::from_utf8_lossy(self.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_info_record() {
        let info = FsInfo::new("tmpfs").unwrap();
        assert_eq!(info.name(), b"tmpfs");
        assert_eq!(info.as_bytes().len(), FS_NAME_MAX + 1);

        let parsed = FsInfo::from_bytes(info.as_bytes()).unwrap();
        assert_eq!(parsed.name(), b"tmpfs");
    }

    #[test]
    fn fs_info_rejects_bad_names() {
        assert_eq!(FsInfo::new("").unwrap_err(), Errno::INVAL);
        assert_eq!(FsInfo::new("a\0b").unwrap_err(), Errno::INVAL);
        assert_eq!(
            FsInfo::new("a-very-long-filesystem-name").unwrap_err(),
            Errno::INVAL
        );
        assert!(FsInfo::new("exactly-twenty-chars").is_ok());

        assert_eq!(FsInfo::from_bytes(b"short").unwrap_err(), Errno::INVAL);
        assert_eq!(
            FsInfo::from_bytes(&[b'x'; FS_NAME_MAX + 1]).unwrap_err(),
            Errno::INVAL
        );
    }
}
