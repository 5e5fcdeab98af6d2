use crate::ErrorKind;
use core::ffi::CStr;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Tag bit: set for anything that is not a directory. A `fetch_sub` on a
/// word carrying this bit is a protocol violation, which is what makes it
/// detectable (the bit survives the subtraction short of a huge underflow).
const NOT_A_DIR: u32 = 1 << 31;
/// Second tag bit, only meaningful together with `NOT_A_DIR`.
const ERRORED: u32 = 1 << 30;
/// Payload bit for a file that has received its size.
const FILE_DONE: u32 = 1;
const PAYLOAD_MASK: u32 = ERRORED - 1;

/**
The maximum representable remaining-children count, used as the sentinel
a directory is born with.

Children may complete (and decrement their parent) while the parent is
still listing, before the real child count is known. Starting the
counter at the maximum and subtracting `PENDING_MAX - actual` once
listing finishes makes the counter monotonically non-increasing with no
window where a child could decrement an unwritten count.
*/
pub const PENDING_MAX: u32 = NOT_A_DIR - 1;

/**
Unpacked view of a record's 32-bit state word.

The packing is chosen so that the numeric word value of
`IncompleteDir(n)` is exactly `n` and `CompletedDir` is `0`: a single
atomic `fetch_sub(1)` then both decrements the remaining-children count
and, when it lands on zero, performs the state transition.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Directory with `n >= 1` children (or sentinel slack) outstanding.
    IncompleteDir(u32),
    /// Directory whose whole subtree is accounted for. Packs to `0`.
    CompletedDir,
    /// Non-directory entry awaiting its `statx` result.
    IncompleteFile,
    /// Non-directory entry whose size has been recorded.
    CompletedFile,
    /// Entry whose syscall failed; contributes zero size to its parent.
    Errored(ErrorKind),
}

impl NodeState {
    /// Packs the state into its 32-bit wire form.
    #[must_use]
    pub const fn pack(self) -> u32 {
        match self {
            Self::CompletedDir => 0,
            Self::IncompleteDir(n) => {
                debug_assert!(n >= 1 && n <= PENDING_MAX, "directory count out of range");
                n
            }
            Self::IncompleteFile => NOT_A_DIR,
            Self::CompletedFile => NOT_A_DIR | FILE_DONE,
            Self::Errored(kind) => NOT_A_DIR | ERRORED | kind.as_raw(),
        }
    }

    /// Decodes a raw state word.
    #[must_use]
    pub const fn unpack(word: u32) -> Self {
        if word & NOT_A_DIR == 0 {
            if word == 0 {
                Self::CompletedDir
            } else {
                Self::IncompleteDir(word)
            }
        } else if word & ERRORED != 0 {
            Self::Errored(ErrorKind::from_raw(word & PAYLOAD_MASK))
        } else if word & FILE_DONE != 0 {
            Self::CompletedFile
        } else {
            Self::IncompleteFile
        }
    }

    /// A state no further transition can leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CompletedDir | Self::CompletedFile | Self::Errored(_)
        )
    }
}

/**
A nul-terminated path owned by the traversal's string arena.

Only a pointer is stored; the arena keeps the bytes alive for the whole
traversal (workers donate their chunks before the result list is read),
so a record never dangles. The length is recovered with `strlen` on the
cold paths that need it (listing a directory, printing).
*/
#[derive(Debug, Clone, Copy)]
pub struct PathRef(NonNull<u8>);

impl PathRef {
    /// # Safety
    /// `ptr` must point at a nul-terminated byte string that outlives
    /// every record referencing it.
    #[must_use]
    pub const unsafe fn new(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    #[must_use]
    pub const fn as_ptr(self) -> *const libc::c_char {
        self.0.as_ptr().cast()
    }

    #[must_use]
    pub fn as_cstr(&self) -> &CStr {
        // SAFETY: construction guarantees a live nul-terminated string
        unsafe { CStr::from_ptr(self.as_ptr()) }
    }

    /// The path bytes without the trailing nul.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.as_cstr().to_bytes()
    }
}

/**
One visited filesystem entry in the result list.

Records are append-only and never relocate (the list is segmented), so
`parent` back-edges are plain indices and concurrent workers mutate
`size`/`state` through the atomics without any per-record lock.
*/
#[derive(Debug)]
pub struct Node {
    parent: u32,
    state: AtomicU32,
    size: AtomicU64,
    path: PathRef,
}

// SAFETY: the raw path pointer targets immutable, arena-owned bytes that
// outlive the record list; all mutable fields are atomics.
unsafe impl Send for Node {}
// SAFETY: as above
unsafe impl Sync for Node {}

impl Node {
    /// A directory record, born with the sentinel children count.
    #[must_use]
    pub fn new_dir(parent: u32, path: PathRef) -> Self {
        Self {
            parent,
            state: AtomicU32::new(NodeState::IncompleteDir(PENDING_MAX).pack()),
            size: AtomicU64::new(0),
            path,
        }
    }

    /// A non-directory record awaiting its `statx` completion.
    #[must_use]
    pub fn new_file(parent: u32, path: PathRef) -> Self {
        Self {
            parent,
            state: AtomicU32::new(NodeState::IncompleteFile.pack()),
            size: AtomicU64::new(0),
            path,
        }
    }

    #[must_use]
    pub const fn parent(&self) -> u32 {
        self.parent
    }

    #[must_use]
    pub const fn path(&self) -> &PathRef {
        &self.path
    }

    #[must_use]
    pub fn state(&self) -> NodeState {
        NodeState::unpack(self.state.load(Ordering::Acquire))
    }

    /// Whether this record still awaits a directory listing (as opposed
    /// to a `statx`). Valid only before the record turns terminal.
    #[must_use]
    pub fn is_pending_dir(&self) -> bool {
        self.state.load(Ordering::Relaxed) & NOT_A_DIR == 0
    }

    pub fn set_state(&self, state: NodeState) {
        self.state.store(state.pack(), Ordering::Release);
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Accumulates a completed child's size. Relaxed is enough: the
    /// closing `finish_children` on the same record is `AcqRel` and every
    /// contributor adds before it decrements.
    pub fn add_size(&self, bytes: u64) {
        self.size.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Writes a file's size exactly once, at completion.
    pub fn store_size(&self, bytes: u64) {
        debug_assert_eq!(self.size.load(Ordering::Relaxed), 0, "size written twice");
        self.size.store(bytes, Ordering::Relaxed);
    }

    /**
    Atomically retires `delta` outstanding children and returns the new
    remaining count. A return of `0` means this call performed the
    transition to `CompletedDir`; exactly one caller can observe it.
    */
    pub fn finish_children(&self, delta: u32) -> u32 {
        let previous = self.state.fetch_sub(delta, Ordering::AcqRel);
        debug_assert_eq!(
            previous & NOT_A_DIR,
            0,
            "finish_children on a non-directory state word"
        );
        debug_assert!(previous >= delta, "remaining-children underflow");
        previous - delta
    }
}

#[cfg(test)]
mod tests {
    use super::{NOT_A_DIR, Node, NodeState, PENDING_MAX, PathRef};
    use crate::ErrorKind;
    use core::ptr::NonNull;

    fn static_path() -> PathRef {
        // SAFETY: a 'static literal trivially outlives any record
        unsafe { PathRef::new(NonNull::new(c"x".as_ptr().cast_mut().cast()).unwrap()) }
    }

    #[test]
    fn completed_dir_packs_to_zero() {
        assert_eq!(NodeState::CompletedDir.pack(), 0);
        assert_eq!(NodeState::IncompleteDir(1).pack(), 1);
        assert_eq!(NodeState::IncompleteDir(PENDING_MAX).pack(), PENDING_MAX);
    }

    #[test]
    fn pack_unpack_round_trip() {
        for state in [
            NodeState::CompletedDir,
            NodeState::IncompleteDir(1),
            NodeState::IncompleteDir(12345),
            NodeState::IncompleteDir(PENDING_MAX),
            NodeState::IncompleteFile,
            NodeState::CompletedFile,
            NodeState::Errored(ErrorKind::AccessDenied),
            NodeState::Errored(ErrorKind::TooManyResults),
        ] {
            assert_eq!(NodeState::unpack(state.pack()), state);
        }
    }

    #[test]
    fn non_directory_words_carry_the_poison_bit() {
        assert_ne!(NodeState::IncompleteFile.pack() & NOT_A_DIR, 0);
        assert_ne!(NodeState::CompletedFile.pack() & NOT_A_DIR, 0);
        assert_ne!(
            NodeState::Errored(ErrorKind::Unexpected).pack() & NOT_A_DIR,
            0
        );
    }

    #[test]
    fn single_decrement_completes_a_directory() {
        let node = Node::new_dir(0, static_path());
        // sentinel correction down to one real child
        assert_eq!(node.finish_children(PENDING_MAX - 1), 1);
        assert_eq!(node.state(), NodeState::IncompleteDir(1));
        // the child's completion is the transition
        assert_eq!(node.finish_children(1), 0);
        assert_eq!(node.state(), NodeState::CompletedDir);
    }

    #[test]
    fn empty_directory_completes_on_the_correction_alone() {
        let node = Node::new_dir(0, static_path());
        assert_eq!(node.finish_children(PENDING_MAX), 0);
        assert_eq!(node.state(), NodeState::CompletedDir);
    }

    #[test]
    fn sizes_accumulate() {
        let node = Node::new_dir(0, static_path());
        node.add_size(5);
        node.add_size(7);
        assert_eq!(node.size(), 12);
    }
}
