use core::sync::atomic::AtomicU32;

/**
Parks the calling thread on `word` while it still holds `expected`.

A spurious return (EINTR, a racing change, a stray wake) is fine by
contract: every caller re-examines its condition in a loop. The kernel
itself re-checks `*word == expected` under its internal lock, which is
what closes the gap between our load and the sleep.
*/
#[inline]
pub fn wait(word: &AtomicU32, expected: u32) {
    // SAFETY: the pointer is valid for the duration of the call and the
    // futex word is a plain 32-bit integer as required.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            core::ptr::null::<libc::timespec>(),
        );
    }
}

/// Wakes every thread parked on `word`.
#[inline]
pub fn wake_all(word: &AtomicU32) {
    // SAFETY: as in `wait`
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            i32::MAX,
        );
    }
}
