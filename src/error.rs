use libc::{
    EACCES, EBUSY, EILSEQ, EINVAL, ELOOP, EMFILE, ENAMETOOLONG, ENFILE, ENODEV, ENOENT, ENOMEM,
    ENOTDIR, ENXIO,
};

/// Generic result type for traversal setup/engine operations
pub type Result<T> = core::result::Result<T, Error>;

/**
Per-node error classification at the traversal boundary.

Every kind maps from the errno of a failed `open`/`statx`/`getdents64`
and is packed, as an integer, into the low bits of the record's state
word. The discriminants are therefore stable and must stay below 2^30
(they share the word with the two tag bits).
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u32)]
pub enum ErrorKind {
    #[error("access denied")]
    AccessDenied = 0,
    #[error("file not found")]
    FileNotFound,
    #[error("not a directory")]
    NotDir,
    #[error("name too long")]
    NameTooLong,
    #[error("symlink loop")]
    SymLinkLoop,
    #[error("device busy")]
    DeviceBusy,
    #[error("no such device")]
    NoDevice,
    #[error("process file descriptor quota exceeded")]
    ProcessFdQuotaExceeded,
    #[error("system file descriptor quota exceeded")]
    SystemFdQuotaExceeded,
    #[error("system resources exhausted")]
    SystemResources,
    #[error("bad path name")]
    BadPathName,
    #[error("too many directory entries")]
    TooManyResults,
    #[error("unexpected I/O error")]
    Unexpected,
}

impl ErrorKind {
    /// Classifies a raw errno value from `open`/`statx`/`getdents64`.
    #[must_use]
    pub const fn from_errno(errno: i32) -> Self {
        match errno {
            EACCES => Self::AccessDenied,
            ENOENT => Self::FileNotFound,
            ENOTDIR => Self::NotDir,
            ENAMETOOLONG => Self::NameTooLong,
            ELOOP => Self::SymLinkLoop,
            EBUSY => Self::DeviceBusy,
            ENODEV | ENXIO => Self::NoDevice,
            EMFILE => Self::ProcessFdQuotaExceeded,
            ENFILE => Self::SystemFdQuotaExceeded,
            ENOMEM => Self::SystemResources,
            EINVAL | EILSEQ => Self::BadPathName,
            _ => Self::Unexpected,
        }
    }

    /// The integer payload stored in an errored state word.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Inverse of [`as_raw`](Self::as_raw); unknown payloads decode as `Unexpected`.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::AccessDenied,
            1 => Self::FileNotFound,
            2 => Self::NotDir,
            3 => Self::NameTooLong,
            4 => Self::SymLinkLoop,
            5 => Self::DeviceBusy,
            6 => Self::NoDevice,
            7 => Self::ProcessFdQuotaExceeded,
            8 => Self::SystemFdQuotaExceeded,
            9 => Self::SystemResources,
            10 => Self::BadPathName,
            11 => Self::TooManyResults,
            _ => Self::Unexpected,
        }
    }
}

/**
Fatal (infrastructural) traversal failures.

Per-node failures never surface here; they live in the record's state
word and keep the cascade running. This type is for the cases where the
engine itself cannot continue.
*/
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Setting up or driving the io_uring submission queue failed.
    #[error("io_uring: {0}")]
    Ring(#[source] std::io::Error),
    /// The root path contains an interior nul byte and cannot reach the kernel.
    #[error("path contains a nul byte")]
    NulInPath,
}

#[cfg(test)]
mod tests {
    use super::ErrorKind;

    #[test]
    fn errno_classification() {
        assert_eq!(ErrorKind::from_errno(libc::EACCES), ErrorKind::AccessDenied);
        assert_eq!(ErrorKind::from_errno(libc::ENOENT), ErrorKind::FileNotFound);
        assert_eq!(ErrorKind::from_errno(libc::ELOOP), ErrorKind::SymLinkLoop);
        assert_eq!(ErrorKind::from_errno(libc::EIO), ErrorKind::Unexpected);
    }

    #[test]
    fn raw_round_trip() {
        for kind in [
            ErrorKind::AccessDenied,
            ErrorKind::FileNotFound,
            ErrorKind::NotDir,
            ErrorKind::NameTooLong,
            ErrorKind::SymLinkLoop,
            ErrorKind::DeviceBusy,
            ErrorKind::NoDevice,
            ErrorKind::ProcessFdQuotaExceeded,
            ErrorKind::SystemFdQuotaExceeded,
            ErrorKind::SystemResources,
            ErrorKind::BadPathName,
            ErrorKind::TooManyResults,
            ErrorKind::Unexpected,
        ] {
            assert_eq!(ErrorKind::from_raw(kind.as_raw()), kind);
        }
    }
}
