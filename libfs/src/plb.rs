//! Path Lookup Buffer
//!
//! The PLB is a circular byte buffer owned by the VFS coordinator. Paths are
//! written into it by the coordinator and read, never written, by filesystem
//! servers after the buffer has been shared into their address space.

use crate::errno::Errno;
use crate::kernel::PAGE_SIZE;

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Memory backing a PLB. Shared between the owner and every mapping.
type PlbMemory = Arc<[AtomicU8]>;

/// Allocates the memory of a PLB with the given capacity
fn alloc_memory(capacity: usize) -> PlbMemory {
    (0..capacity).map(|_| AtomicU8::new(0)).collect()
}

/// The owner side of a PLB
pub struct PlbWriter {
    /// shared memory
    mem: PlbMemory,
}

impl Debug for PlbWriter {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlbWriter")
            .field("capacity", &self.mem.len())
            .finish()
    }
}

impl PlbWriter {
    /// Creates a zeroed PLB
    /// # Panics
    /// Panics if `capacity` is zero
    #[must_use]
    #[inline]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "empty path lookup buffer");
        Self {
            mem: alloc_memory(capacity),
        }
    }

    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    /// Stores `bytes` starting at the absolute offset `pos`, wrapping around
    /// the end of the buffer.
    /// # Panics
    /// Panics if `bytes` does not fit into the buffer
    #[inline]
    pub fn write_at(&self, pos: u64, bytes: &[u8]) {
        assert!(bytes.len() <= self.capacity(), "path does not fit the PLB");
        let cap = self.capacity();
        let start = wrap(pos, cap);
        for (i, &b) in bytes.iter().enumerate() {
            let idx = start.wrapping_add(i) % cap;
            self.mem[idx].store(b, Ordering::Release);
        }
    }

    /// Maps the buffer read-only into a reserved region
    /// # Errors
    /// Returns [`Errno::INVAL`] if the region size does not match the capacity
    #[inline]
    pub fn share_into(&self, region: Region) -> Result<PathBuffer, Errno> {
        if region.size() != self.capacity() {
            return Err(Errno::INVAL);
        }
        Ok(PathBuffer {
            mem: Arc::clone(&self.mem),
            _region: region,
        })
    }
}

/// Reduces an absolute offset modulo the capacity
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn wrap(pos: u64, cap: usize) -> usize {
    // the remainder is smaller than `cap`
    (pos % (cap as u64)) as usize
}

/// A read-only view of a PLB mapped into the server's address space
pub struct PathBuffer {
    /// shared memory
    mem: PlbMemory,
    /// the address space backing the mapping
    _region: Region,
}

impl Debug for PathBuffer {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathBuffer")
            .field("capacity", &self.mem.len())
            .finish()
    }
}

impl PathBuffer {
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    /// Returns the character at the absolute offset `pos`
    #[must_use]
    #[inline]
    pub fn char_at(&self, pos: u64) -> u8 {
        self.mem[wrap(pos, self.capacity())].load(Ordering::Acquire)
    }
}

/// Bookkeeping of the mappable part of an address space
#[derive(Debug)]
pub struct AddressSpace {
    /// mappable bytes
    limit: usize,
    /// reserved bytes
    used: AtomicUsize,
}

impl AddressSpace {
    /// Mappable area of the process address space
    pub const DEFAULT_LIMIT: usize = 1 << 30;

    #[must_use]
    #[inline]
    pub const fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// The address space of this process
    #[must_use]
    #[inline]
    pub fn current() -> Arc<Self> {
        use once_cell::sync::Lazy;
        static CURRENT: Lazy<Arc<AddressSpace>> =
            Lazy::new(|| Arc::new(AddressSpace::new(AddressSpace::DEFAULT_LIMIT)));
        Arc::clone(&*CURRENT)
    }

    #[must_use]
    #[inline]
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.used.load(Ordering::Acquire))
    }

    /// Reserves a page-aligned region able to hold `size` bytes.
    /// Returns `None` when the address space is exhausted.
    #[inline]
    pub fn reserve(self: &Arc<Self>, size: usize) -> Option<Region> {
        let pages = size.checked_add(PAGE_SIZE - 1)? / PAGE_SIZE;
        let reserved = pages.checked_mul(PAGE_SIZE)?;
        let mut used = self.used.load(Ordering::Acquire);
        loop {
            let next = used.checked_add(reserved).filter(|&n| n <= self.limit)?;
            match self
                .used
                .compare_exchange_weak(used, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(cur) => used = cur,
            }
        }
        Some(Region {
            space: Arc::clone(self),
            size,
            reserved,
        })
    }
}

/// A reserved piece of address space. Given back when dropped.
#[derive(Debug)]
pub struct Region {
    /// owner
    space: Arc<AddressSpace>,
    /// requested size
    size: usize,
    /// reserved bytes, page-aligned
    reserved: usize,
}

impl Region {
    #[must_use]
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        let _ = self.space.used.fetch_sub(self.reserved, Ordering::AcqRel);
    }
}
