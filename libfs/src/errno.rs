//! Status codes carried in answers

use std::fmt;

/// A protocol status code. `Errno::OK` means success.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    #[must_use]
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[must_use]
    #[inline]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    #[must_use]
    #[inline]
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Converts a status into a `Result`, mapping `OK` to `Ok(())`
    /// # Errors
    /// Returns `Err(self)` when the status is not `OK`
    #[inline]
    pub const fn into_result(self) -> Result<(), Self> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::OK => "OK",
            Self::NOENT => "ENOENT",
            Self::NOMEM => "ENOMEM",
            Self::BUSY => "EBUSY",
            Self::EXIST => "EEXIST",
            Self::NOTDIR => "ENOTDIR",
            Self::ISDIR => "EISDIR",
            Self::INVAL => "EINVAL",
            Self::NOSPC => "ENOSPC",
            Self::NAMETOOLONG => "ENAMETOOLONG",
            Self::NOSYS => "ENOSYS",
            Self::NOTEMPTY => "ENOTEMPTY",
            Self::LIMIT => "ELIMIT",
            Self::HANGUP => "EHANGUP",
            _ => "E?",
        }
    }
}

impl Errno {
    pub const OK: Self = Self(0);
    pub const NOENT: Self = Self(libc::ENOENT);
    pub const NOMEM: Self = Self(libc::ENOMEM);
    pub const BUSY: Self = Self(libc::EBUSY);
    pub const EXIST: Self = Self(libc::EEXIST);
    pub const NOTDIR: Self = Self(libc::ENOTDIR);
    pub const ISDIR: Self = Self(libc::EISDIR);
    pub const INVAL: Self = Self(libc::EINVAL);
    pub const NOSPC: Self = Self(libc::ENOSPC);
    pub const NAMETOOLONG: Self = Self(libc::ENAMETOOLONG);
    pub const NOSYS: Self = Self(libc::ENOSYS);
    pub const NOTEMPTY: Self = Self(libc::ENOTEMPTY);
    /// too many links
    pub const LIMIT: Self = Self(libc::EMLINK);
    /// the peer hung up
    pub const HANGUP: Self = Self(libc::ECONNRESET);
}

impl fmt::Debug for Errno {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Errno::{}({})", self.name(), self.0)
    }
}

impl fmt::Display for Errno {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.name(), self.0)
    }
}

impl std::error::Error for Errno {}

impl From<Result<(), Errno>> for Errno {
    #[inline]
    fn from(ret: Result<(), Errno>) -> Self {
        match ret {
            Ok(()) => Self::OK,
            Err(errno) => errno,
        }
    }
}
