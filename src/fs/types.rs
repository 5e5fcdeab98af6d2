/// A buffer used to hold the bytes returned by `getdents64` calls
pub type SyscallBuffer = crate::fs::AlignedBuffer<u8, BUFFER_SIZE>;

/// A thin wrapper around a raw file descriptor for internal IO.
/// Ownership (and closing) is the holder's business: the directory
/// stream closes on drop unless the descriptor is taken out for an
/// asynchronous close.
#[derive(Debug)]
#[repr(transparent)]
pub struct FileDes(pub(crate) i32);

impl FileDes {
    #[must_use]
    #[inline]
    pub const fn raw(&self) -> i32 {
        self.0
    }
}

#[cfg(not(debug_assertions))]
pub const BUFFER_SIZE: usize = 8 * 4096;

#[cfg(debug_assertions)]
pub const BUFFER_SIZE: usize = 4096; // parallel debug tests chew through stack otherwise
