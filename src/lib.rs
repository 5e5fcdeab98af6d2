#![allow(clippy::inline_always)]

/*!
duz computes recursive directory sizes the way `du` does, with the work
split between two interchangeable traversal engines: a work-stealing
thread pool over synchronous syscalls ([`walk::threaded`]) and a
single-threaded io_uring submit/complete loop ([`walk::uring`]). Both
fill the same append-only record list, propagate sizes upward through
the same lock-free cascade, and terminate on the same root-completion
rule; the printer just walks the finished list.

Linux only: the design leans on `getdents64`, `statx`, and futexes.
*/

#[cfg(not(target_os = "linux"))]
compile_error!("duz relies on getdents64/statx/futex/io_uring and only builds for Linux targets");

mod applist;
mod arena;
mod error;
pub mod fs;
mod node;
pub mod pool;
mod slab;
pub mod util;
pub mod walk;

pub use applist::AppendList;
pub use arena::{PathArena, SharedArena};
pub use error::{Error, ErrorKind, Result};
pub use node::{Node, NodeState, PENDING_MAX, PathRef};
pub use slab::Slab;
pub use util::HumanSize;
pub use walk::{Progress, Walk};

// this allocator pulled ahead of jemalloc and glibc malloc in testing
#[cfg(feature = "mimalloc")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(test)]
mod test;
