use crate::arena::PathArena;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{DirStream, FileDes};
use crate::slab::Slab;
use crate::walk::Walk;
use core::ffi::CStr;
use io_uring::{IoUring, cqueue, opcode, types};
use std::sync::Arc;

/// Kernel submission ring depth; also the in-flight ceiling, which
/// keeps the completion side from ever overflowing (CQ is 2x SQ).
const QUEUE_DEPTH: u32 = 4096;
/// Completions reaped per loop iteration before overflow retry.
const REAP_BATCH: usize = 64;

/// Task kinds carried in the user token.
const KIND_STAT: u8 = 1;
const KIND_OPEN: u8 = 2;
const KIND_CLOSE: u8 = 3;

/// 64-bit user token: node index (32) | task kind (4) | slab slot (28).
#[inline]
const fn token(node: u32, kind: u8, slot: u32) -> u64 {
    debug_assert!(slot < 1 << 28, "slab slot exceeds its token field");
    node as u64 | ((kind as u64) << 32) | ((slot as u64) << 36)
}

/// A task that could not be queued (ring full or no statx slot free)
/// and waits on the overflow list.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Stat { node: u32 },
    Open { node: u32 },
    Close { fd: i32 },
}

/// Probe for io_uring support; rings are commonly denied inside
/// containers and seccomp sandboxes.
#[must_use]
pub fn available() -> bool {
    IoUring::new(2).is_ok()
}

/**
Runs a traversal of `root` on a single thread driving an io_uring
submission queue, and returns once the outstanding-operation count
drains to zero, which by the protocol happens only after the root
has turned terminal and the trailing directory closes have completed.
*/
pub fn run(root: &CStr) -> Result<Arc<Walk>> {
    let started = std::time::Instant::now();
    let ring = IoUring::new(QUEUE_DEPTH).map_err(Error::Ring)?;
    let walk = Arc::new(Walk::new());
    let mut engine = Engine {
        walk: Arc::clone(&walk),
        ring,
        slab: Slab::new(QUEUE_DEPTH),
        overflow: Vec::new(),
        inflight: 0,
        arena: PathArena::new(),
        children: Vec::new(),
    };

    let root_index = walk.init_root(root, &mut engine.arena);
    engine.enqueue(Pending::Open { node: root_index });
    engine.drive()?;

    debug_assert!(walk.progress().finished(), "queue drained before the root completed");
    walk.adopt_strings(engine.into_arena());
    tracing::debug!(elapsed = ?started.elapsed(), records = walk.records().len(), "io_uring traversal done");
    Ok(walk)
}

struct Engine {
    walk: Arc<Walk>,
    ring: IoUring,
    /// statx output buffers for in-flight stat submissions; slot
    /// addresses are stable while the kernel writes into them.
    slab: Slab<libc::statx>,
    /// LIFO retry list: newest first keeps the working set small.
    overflow: Vec<Pending>,
    inflight: usize,
    arena: PathArena,
    children: Vec<u32>,
}

impl Engine {
    fn into_arena(self) -> PathArena {
        self.arena
    }

    fn drive(&mut self) -> Result<()> {
        let mut completions: Vec<cqueue::Entry> = Vec::with_capacity(REAP_BATCH);
        while self.inflight > 0 || !self.overflow.is_empty() {
            self.flush_overflow();
            let want = usize::from(self.inflight > 0);
            match self.ring.submit_and_wait(want) {
                Ok(_) => {}
                // EINTR: signal during the wait. EBUSY: completion
                // backlog pressure; reaping below relieves it.
                Err(e) if matches!(e.raw_os_error(), Some(libc::EINTR | libc::EBUSY)) => {}
                Err(e) => return Err(Error::Ring(e)),
            }
            completions.clear();
            completions.extend(self.ring.completion().take(REAP_BATCH));
            for entry in &completions {
                self.dispatch(entry);
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, entry: &cqueue::Entry) {
        let data = entry.user_data();
        let node = data as u32;
        let kind = ((data >> 32) & 0xF) as u8;
        let slot = (data >> 36) as u32;
        self.inflight -= 1;

        match kind {
            KIND_STAT => {
                let result = entry.result();
                if result == 0 {
                    // SAFETY: the kernel filled this slot's statx buffer
                    // on a successful completion.
                    let size = unsafe { (*self.slab.get(slot)).stx_size };
                    self.slab.del(slot);
                    self.walk.complete_file(node, size);
                } else {
                    self.slab.del(slot);
                    self.walk.fail_node(node, ErrorKind::from_errno(-result));
                }
            }
            KIND_OPEN => self.dispatch_open(node, entry.result()),
            // Our descriptors are plain directory fds; close cannot
            // meaningfully fail for them and needs no handling.
            KIND_CLOSE => {}
            _ => unreachable!("completion token with unknown task kind"),
        }
    }

    /**
    An `open_dir` completed: iterate the directory synchronously right
    here, append and schedule its children, publish the count
    correction, then hand the descriptor to an async close.
    */
    fn dispatch_open(&mut self, node: u32, result: i32) {
        if result < 0 {
            self.walk.fail_node(node, ErrorKind::from_errno(-result));
            return;
        }
        let mut stream = DirStream::from_fd(FileDes(result));
        let (count, error) = {
            let Self {
                walk,
                arena,
                children,
                ..
            } = self;
            walk.list_children(arena, node, &mut stream, children)
        };
        let fd = stream.take_fd();
        drop(stream);

        for i in 0..self.children.len() {
            let child = self.children[i];
            let task = if self.walk.records().get(child).is_pending_dir() {
                Pending::Open { node: child }
            } else {
                Pending::Stat { node: child }
            };
            self.enqueue(task);
        }
        self.walk.finish_directory(node, count, error);
        self.enqueue(Pending::Close { fd: fd.raw() });
    }

    fn enqueue(&mut self, task: Pending) {
        if !self.try_submit(task) {
            self.overflow.push(task);
        }
    }

    fn flush_overflow(&mut self) {
        while let Some(task) = self.overflow.pop() {
            if !self.try_submit(task) {
                self.overflow.push(task);
                break;
            }
        }
    }

    /// Builds and pushes one submission entry. `false` means transient
    /// back-pressure (ring full, in-flight ceiling, or no statx slot);
    /// the task belongs on the overflow list.
    fn try_submit(&mut self, task: Pending) -> bool {
        if self.inflight >= QUEUE_DEPTH as usize {
            return false;
        }
        let mut stat_slot = None;
        let entry = match task {
            Pending::Stat { node } => {
                let Some(slot) = self.slab.add() else {
                    return false;
                };
                stat_slot = Some(slot);
                let path = self.walk.records().get(node).path().as_ptr();
                opcode::Statx::new(types::Fd(libc::AT_FDCWD), path, self.slab.get(slot).cast())
                    .flags(libc::AT_SYMLINK_NOFOLLOW | libc::AT_STATX_DONT_SYNC)
                    .mask(libc::STATX_SIZE)
                    .build()
                    .user_data(token(node, KIND_STAT, slot))
            }
            Pending::Open { node } => {
                let path = self.walk.records().get(node).path().as_ptr();
                opcode::OpenAt::new(types::Fd(libc::AT_FDCWD), path)
                    .flags(libc::O_RDONLY | libc::O_NOFOLLOW | libc::O_DIRECTORY | libc::O_CLOEXEC)
                    .build()
                    .user_data(token(node, KIND_OPEN, 0))
            }
            Pending::Close { fd } => opcode::Close::new(types::Fd(fd))
                .build()
                .user_data(token(0, KIND_CLOSE, 0)),
        };

        // SAFETY: every pointer the entry carries (path bytes, statx
        // buffer) is owned by the traversal and stays put until the
        // operation completes.
        let pushed = unsafe { self.ring.submission().push(&entry) }.is_ok();
        if pushed {
            self.inflight += 1;
        } else if let Some(slot) = stat_slot {
            self.slab.del(slot);
        }
        pushed
    }
}
