use crate::ErrorKind;
use crate::fs::{BUFFER_SIZE, FileDes, FileType, SyscallBuffer};
use core::ffi::CStr;
use libc::c_char;

#[inline]
fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Opens a directory for enumeration. `O_NOFOLLOW` keeps the
/// never-follow-symlinks contract at the open itself, not just in the
/// listing.
pub fn open_dir(path: *const c_char) -> Result<FileDes, ErrorKind> {
    // SAFETY: the caller passes a nul-terminated path
    let fd = unsafe {
        libc::open(
            path,
            libc::O_RDONLY | libc::O_NOFOLLOW | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        Err(ErrorKind::from_errno(errno()))
    } else {
        Ok(FileDes(fd))
    }
}

fn statx_raw(dirfd: i32, path: *const c_char, mask: u32) -> Result<libc::statx, i32> {
    let mut buffer = core::mem::MaybeUninit::<libc::statx>::uninit();
    // SAFETY: the kernel fills the buffer on success; path is nul-terminated
    let rc = unsafe {
        libc::statx(
            dirfd,
            path,
            libc::AT_SYMLINK_NOFOLLOW | libc::AT_STATX_DONT_SYNC,
            mask,
            buffer.as_mut_ptr(),
        )
    };
    if rc == 0 {
        // SAFETY: statx returned success, the struct is initialised
        Ok(unsafe { buffer.assume_init() })
    } else {
        Err(errno())
    }
}

/// Reported byte length of the entry at `path`, never following a final
/// symlink and never forcing a remote-filesystem sync.
pub fn statx_size(dirfd: i32, path: *const c_char) -> Result<u64, ErrorKind> {
    statx_raw(dirfd, path, libc::STATX_SIZE)
        .map(|stx| stx.stx_size)
        .map_err(ErrorKind::from_errno)
}

/// Type-only statx, the fallback for filesystems that return `DT_UNKNOWN`.
fn statx_file_type(dirfd: i32, path: *const c_char) -> FileType {
    statx_raw(dirfd, path, libc::STATX_TYPE).map_or(FileType::Unknown, |stx| {
        FileType::from_mode(libc::mode_t::from(stx.stx_mode))
    })
}

/// One directory entry as handed out by [`DirStream::next_entry`]:
/// the bare name (no nul, no parent) and its resolved type.
#[derive(Debug)]
pub struct RawEntry<'a> {
    pub name: &'a [u8],
    pub file_type: FileType,
}

/**
Batched `getdents64` reader over an open directory descriptor.

`.` and `..` are skipped, `DT_UNKNOWN` entries are resolved with a
type-only `statx` relative to the directory fd, and syscall failures
surface as `ErrorKind` instead of being folded into end-of-stream (the
traversal protocol needs to distinguish "done" from "broken").

The descriptor is closed on drop unless [`take_fd`](Self::take_fd)
removed it first (the submit/complete engine closes asynchronously).
*/
pub struct DirStream {
    fd: FileDes,
    buffer: Box<SyscallBuffer>,
    offset: usize,
    remaining: usize,
    end_of_stream: bool,
}

impl core::fmt::Debug for DirStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DirStream")
            .field("fd", &self.fd)
            .field("offset", &self.offset)
            .field("remaining", &self.remaining)
            .field("end_of_stream", &self.end_of_stream)
            .finish()
    }
}

impl DirStream {
    pub fn open(path: *const c_char) -> Result<Self, ErrorKind> {
        open_dir(path).map(Self::from_fd)
    }

    #[must_use]
    pub fn from_fd(fd: FileDes) -> Self {
        Self {
            fd,
            buffer: Box::new(SyscallBuffer::new()),
            offset: 0,
            remaining: 0,
            end_of_stream: false,
        }
    }

    /// Detaches the descriptor from the stream; the stream will no
    /// longer close it. Further `next_entry` calls would misbehave, so
    /// callers do this only once iteration is finished.
    pub fn take_fd(&mut self) -> FileDes {
        FileDes(core::mem::replace(&mut self.fd.0, -1))
    }

    fn fill(&mut self) -> Result<bool, ErrorKind> {
        if self.end_of_stream {
            return Ok(false);
        }
        let read = self.buffer.getdents(&self.fd);
        if read < 0 {
            self.end_of_stream = true;
            return Err(ErrorKind::from_errno(errno()));
        }
        self.remaining = read as usize;
        self.offset = 0;
        // A batch that left more headroom than the largest possible
        // entry cannot be followed by another non-empty batch, so the
        // confirming zero-byte getdents call can be skipped.
        const MAX_ENTRY: usize = 1024 + 24; // ZFS-sized name + fixed header
        self.end_of_stream = read == 0 || BUFFER_SIZE - MAX_ENTRY >= self.remaining;
        Ok(read != 0)
    }

    /**
    Advances to the next real entry (skipping `.` and `..`).

    Returns `Ok(None)` at end of directory; `Err` carries the errno
    classification of a failed `getdents64`.
    */
    pub fn next_entry(&mut self) -> Result<Option<RawEntry<'_>>, ErrorKind> {
        loop {
            if self.offset >= self.remaining {
                if !self.fill()? {
                    return Ok(None);
                }
                continue;
            }
            // SAFETY: the kernel wrote a valid dirent64 at this offset;
            // record starts are 8-aligned within the aligned buffer.
            let d: *const libc::dirent64 = unsafe { self.buffer.as_ptr().add(self.offset).cast() };
            debug_assert_eq!(d as usize % 8, 0, "dirent not 8-byte aligned");
            // SAFETY: `d` points at a complete record (reclen bounds it)
            let reclen = unsafe { (*d).d_reclen } as usize;
            self.offset += reclen;
            // SAFETY: d_name is nul-terminated within the record
            let name_ptr: *const c_char = unsafe { (&raw const (*d).d_name).cast() };
            // SAFETY: as above
            let name = unsafe { CStr::from_ptr(name_ptr).to_bytes() };
            if name == b"." || name == b".." {
                continue;
            }
            // SAFETY: plain field read of the record
            let d_type = unsafe { (*d).d_type };
            let file_type = match FileType::from_dtype(d_type) {
                FileType::Unknown => statx_file_type(self.fd.0, name_ptr),
                known => known,
            };
            return Ok(Some(RawEntry { name, file_type }));
        }
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        if self.fd.0 >= 0 {
            // SAFETY: the descriptor is owned by this stream
            unsafe { libc::close(self.fd.0) };
        }
    }
}
