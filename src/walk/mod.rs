mod progress;
pub mod threaded;
pub mod uring;

pub use progress::Progress;

use crate::applist::AppendList;
use crate::arena::{PathArena, SharedArena};
use crate::error::ErrorKind;
use crate::fs::{DirStream, FileType};
use crate::node::{Node, NodeState, PENDING_MAX};
use core::ffi::CStr;

/// The root record's index; it is its own parent, the only record for
/// which that holds.
pub const ROOT: u32 = 0;

/**
The shared result of one traversal: the record list, the arena that
owns every path string in it, and the progress word the printer polls.

Both backends speak the same protocol against this structure:

1. every directory record is born holding the sentinel children count,
2. a listing appends all child records, then schedules all child
   tasks, then publishes the real count with one atomic subtraction,
3. any terminal transition cascades size and completion upward until a
   still-incomplete ancestor (or the root) is reached.

The record list is append-only and the arena chunks are donated before
readers arrive, so every index and path pointer stays valid for the
lifetime of this value.
*/
pub struct Walk {
    records: AppendList<Node>,
    strings: SharedArena,
    progress: Progress,
}

impl Walk {
    pub(crate) fn new() -> Self {
        Self {
            records: AppendList::new(),
            strings: SharedArena::new(),
            progress: Progress::new(),
        }
    }

    /// Records in creation order; index 0 is the root.
    #[must_use]
    pub fn records(&self) -> &AppendList<Node> {
        &self.records
    }

    #[must_use]
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Takes ownership of a retired worker's path chunks.
    pub(crate) fn adopt_strings(&self, arena: PathArena) {
        self.strings.adopt(arena);
    }

    /// Appends the root record (its own parent, sentinel count).
    pub(crate) fn init_root(&self, path: &CStr, arena: &mut PathArena) -> u32 {
        debug_assert!(self.records.is_empty(), "root must be the first record");
        let path = arena.store(path.to_bytes());
        let index = self.records.append(Node::new_dir(ROOT, path));
        debug_assert_eq!(index, ROOT);
        index
    }

    /**
    Drains a directory stream into fresh child records of `parent`,
    collecting their indices into `children` (cleared first). Appending
    happens here; scheduling is the caller's second pass. Records are
    always appended before any child task can run, which guarantees
    every child index is greater than its parent's.

    Returns the child count and, when the stream failed or overflowed
    the counter, the error alongside however many children were already
    appended.
    */
    pub(crate) fn list_children(
        &self,
        arena: &mut PathArena,
        parent: u32,
        stream: &mut DirStream,
        children: &mut Vec<u32>,
    ) -> (u32, Option<ErrorKind>) {
        children.clear();
        let parent_path = self.records.get(parent).path().as_bytes();
        let mut count: u32 = 0;
        loop {
            match stream.next_entry() {
                Ok(None) => return (count, None),
                Ok(Some(entry)) => {
                    if count == PENDING_MAX {
                        return (count, Some(ErrorKind::TooManyResults));
                    }
                    let path = arena.join(parent_path, entry.name);
                    let node = match entry.file_type {
                        FileType::Directory => Node::new_dir(parent, path),
                        _ => Node::new_file(parent, path),
                    };
                    children.push(self.records.append(node));
                    count += 1;
                }
                Err(kind) => return (count, Some(kind)),
            }
        }
    }

    /**
    Closes out a listing after its children were scheduled.

    A failure before any child was appended marks the directory itself
    errored; a failure after that cannot unwind the live children, so
    the partial count is published and the directory will complete as a
    directory. Either way the parent chain stays live.
    */
    pub(crate) fn finish_directory(&self, node: u32, count: u32, error: Option<ErrorKind>) {
        if let Some(kind) = error {
            if count == 0 {
                self.fail_node(node, kind);
                return;
            }
            tracing::warn!(node, %kind, listed = count, "directory listing truncated");
        }
        // Publish the correction: the subtraction that replaces the
        // sentinel with the real outstanding count. Landing on zero
        // means every child already finished (or there were none).
        let delta = PENDING_MAX - count;
        if delta == 0 {
            // The counter already matches; the final child decrement is
            // the completing transition, not this call.
            return;
        }
        if self.records.get(node).finish_children(delta) == 0 {
            self.cascade(node);
        }
    }

    /// A non-directory got its `statx` answer.
    pub(crate) fn complete_file(&self, node: u32, size: u64) {
        let record = self.records.get(node);
        record.store_size(size);
        record.set_state(NodeState::CompletedFile);
        self.cascade(node);
    }

    /// A node's syscall failed: terminal, zero size contribution, but
    /// still one finished child of its parent.
    pub(crate) fn fail_node(&self, node: u32, kind: ErrorKind) {
        self.records.get(node).set_state(NodeState::Errored(kind));
        self.cascade(node);
    }

    /**
    Propagates a terminal transition upward.

    The size addition precedes the child-count decrement of the same
    parent (the decrement is `AcqRel`), so whichever thread performs a
    parent's final decrement observes every descendant's contribution.
    Only that thread continues the walk, which is what makes the
    cascade race-free without any lock.
    */
    pub(crate) fn cascade(&self, mut node: u32) {
        loop {
            self.progress.record_output();
            if node == ROOT {
                self.progress.finish();
                return;
            }
            let record = self.records.get(node);
            let parent = self.records.get(record.parent());
            parent.add_size(record.size());
            if parent.finish_children(1) != 0 {
                return;
            }
            node = record.parent();
        }
    }
}
