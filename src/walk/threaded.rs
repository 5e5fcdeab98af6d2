use crate::arena::PathArena;
use crate::fs::{DirStream, statx_size};
use crate::pool::{Pool, WorkerScope};
use crate::walk::Walk;
use core::ffi::CStr;
use core::num::NonZeroUsize;
use std::sync::Arc;

/// Per-worker scratch: the path arena (donated at shutdown) and the
/// child-index buffer reused across listings.
struct WorkerState {
    arena: PathArena,
    children: Vec<u32>,
}

/**
Runs a traversal of `root` on the work-stealing pool with synchronous
syscalls and returns once the whole subtree is accounted for.

Tasks are record indices; whether a task means "list this directory"
or "stat this file" is read back from the record's own state word.
The worker that observes the root turning terminal cancels the pool,
which is the backend's termination rule.
*/
pub fn run(root: &CStr, threads: NonZeroUsize) -> Arc<Walk> {
    let started = std::time::Instant::now();
    let walk = Arc::new(Walk::new());

    let mut boot = PathArena::new();
    let root_index = walk.init_root(root, &mut boot);
    walk.adopt_strings(boot);

    let pool: Pool<u32, WorkerState> = Pool::spawn(
        threads,
        |_scope| WorkerState {
            arena: PathArena::new(),
            children: Vec::new(),
        },
        {
            let walk = Arc::clone(&walk);
            move |state, scope, node| process(&walk, state, scope, node)
        },
    );
    pool.run(root_index);

    // Workers exit once the cascade reaches the root and a worker
    // cancels the pool; join hands back the arenas so the path strings
    // outlive their allocating threads.
    for state in pool.join() {
        walk.adopt_strings(state.arena);
    }
    debug_assert!(walk.progress().finished(), "pool drained before the root completed");
    tracing::debug!(elapsed = ?started.elapsed(), records = walk.records().len(), "threaded traversal done");
    walk
}

fn process(walk: &Walk, state: &mut WorkerState, scope: &WorkerScope<'_, u32>, node: u32) {
    let record = walk.records().get(node);
    if record.is_pending_dir() {
        match DirStream::open(record.path().as_ptr()) {
            Ok(mut stream) => {
                let (count, error) =
                    walk.list_children(&mut state.arena, node, &mut stream, &mut state.children);
                // Close before the fan-out: this backend holds a
                // descriptor only for the duration of one listing.
                drop(stream);
                for &child in &state.children {
                    scope.run(child);
                }
                walk.finish_directory(node, count, error);
            }
            Err(kind) => walk.fail_node(node, kind),
        }
    } else {
        match statx_size(libc::AT_FDCWD, record.path().as_ptr()) {
            Ok(size) => walk.complete_file(node, size),
            Err(kind) => walk.fail_node(node, kind),
        }
    }

    if walk.progress().finished() {
        scope.cancel();
    }
}
