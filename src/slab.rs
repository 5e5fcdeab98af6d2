use core::cell::UnsafeCell;

/// Explicit free-list terminator. An index can never legitimately be
/// `u32::MAX` (the slab caps far below), so a fresh store and an
/// exhausted free list are both unambiguous.
const NONE: u32 = u32::MAX;

/// Capacity of chunk 0; chunk `k` holds `FIRST_CHUNK << k` slots.
const FIRST_CHUNK: usize = 64;

union Slot<T: Copy> {
    next_free: u32,
    value: T,
}

/**
A small-index store for fixed-layout scratch values, here the `statx`
output buffers of in-flight submissions.

Freed slots chain through a `next_free` index embedded in the slot
itself (`u32`, narrower than any stored value). Backing storage is a
list of doubling chunks, so a slot's address is stable while the kernel
writes into it even if the slab grows underneath. Growth is one slot at
a time up to `limit`; past that [`add`](Self::add) returns `None`,
which is the engine's cue to spill the task to its overflow buffer.

Values are `Copy` plain-old-data: the slab never runs destructors.
*/
pub struct Slab<T: Copy> {
    chunks: Vec<Box<[UnsafeCell<Slot<T>>]>>,
    free_head: u32,
    len: u32,
    limit: u32,
}

impl<T: Copy> Slab<T> {
    #[must_use]
    pub const fn new(limit: u32) -> Self {
        Self {
            chunks: Vec::new(),
            free_head: NONE,
            len: 0,
            limit,
        }
    }

    /// Number of slots ever materialised (live + free-listed).
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /**
    Hands out a slot index. The slot contents are whatever was last
    written there; the caller (or the kernel) initialises it.

    Recycles the free list first, then extends the backing by one slot,
    and reports exhaustion with `None` once `limit` slots exist and all
    are live.
    */
    pub fn add(&mut self) -> Option<u32> {
        if self.free_head != NONE {
            let index = self.free_head;
            // SAFETY: a free-listed slot holds the next_free variant,
            // written by `del`.
            self.free_head = unsafe { (*self.slot(index)).next_free };
            return Some(index);
        }
        if self.len == self.limit {
            return None;
        }
        let index = self.len as usize;
        let (chunk, _) = Self::locate(index);
        if chunk == self.chunks.len() {
            let capacity = FIRST_CHUNK << chunk;
            self.chunks.push(
                (0..capacity)
                    .map(|_| UnsafeCell::new(Slot { next_free: NONE }))
                    .collect(),
            );
        }
        self.len += 1;
        Some(index as u32)
    }

    /// Raw pointer to a live slot's value. Stable until `del`.
    ///
    /// # Panics
    /// Panics when the index was never handed out.
    #[must_use]
    pub fn get(&self, index: u32) -> *mut T {
        // SAFETY: place projection only, nothing is read; the slot sits
        // inside a live chunk.
        unsafe { &raw mut (*self.slot(index)).value }
    }

    /// Returns a slot to the free list. The caller must not use the
    /// index (or pointers into it) afterwards until `add` re-issues it.
    pub fn del(&mut self, index: u32) {
        let slot = self.slot(index);
        // SAFETY: the slot is live (owned by the caller until this call)
        // and T: Copy means no destructor is skipped by overwriting.
        unsafe {
            (*slot).next_free = self.free_head;
        }
        self.free_head = index;
    }

    fn slot(&self, index: u32) -> *mut Slot<T> {
        assert!(index < self.len, "slab index was never allocated");
        let (chunk, offset) = Self::locate(index as usize);
        self.chunks[chunk][offset].get()
    }

    const fn locate(index: usize) -> (usize, usize) {
        let q = (index / FIRST_CHUNK) + 1;
        let chunk = (usize::BITS - 1 - q.leading_zeros()) as usize;
        let offset = index + FIRST_CHUNK - (FIRST_CHUNK << chunk);
        (chunk, offset)
    }
}
