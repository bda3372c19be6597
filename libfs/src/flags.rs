//! Lookup flags

use crate::kernel;

use bitflags::bitflags;

bitflags! {
    /// Request modifiers of a `VFS_LOOKUP` call
    pub struct LookupFlags: u32 {
        const FILE = kernel::L_FILE;
        const DIRECTORY = kernel::L_DIRECTORY;
        const EXCLUSIVE = kernel::L_EXCLUSIVE;
        const CREATE = kernel::L_CREATE;
        const LINK = kernel::L_LINK;
        const UNLINK = kernel::L_UNLINK;
        const PARENT = kernel::L_PARENT;
    }
}

impl LookupFlags {
    /// The miss on the last component should produce a new link
    #[must_use]
    #[inline]
    pub const fn wants_new_link(self) -> bool {
        self.intersects(Self::CREATE.union(Self::LINK))
    }

    /// Hitting an existing name is an error
    #[must_use]
    #[inline]
    pub const fn rejects_existing(self) -> bool {
        self.contains(Self::CREATE.union(Self::EXCLUSIVE)) || self.contains(Self::LINK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        assert!(LookupFlags::CREATE.wants_new_link());
        assert!(LookupFlags::LINK.wants_new_link());
        assert!(!(LookupFlags::PARENT | LookupFlags::FILE).wants_new_link());

        assert!(!LookupFlags::CREATE.rejects_existing());
        assert!(!LookupFlags::EXCLUSIVE.rejects_existing());
        assert!((LookupFlags::CREATE | LookupFlags::EXCLUSIVE).rejects_existing());
        assert!(LookupFlags::LINK.rejects_existing());
    }

    #[test]
    fn unknown_bits_are_rejected() {
        assert!(LookupFlags::from_bits(1 << 7).is_none());
        assert_eq!(
            LookupFlags::from_bits(kernel::L_CREATE | kernel::L_DIRECTORY),
            Some(LookupFlags::CREATE | LookupFlags::DIRECTORY)
        );
    }
}
