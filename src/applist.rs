#![allow(clippy::multiple_unsafe_ops_per_block)]

use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Mutex;

/// Capacity of segment 0; segment `k` holds `FIRST_SEGMENT << k` items.
const FIRST_SEGMENT: usize = 1024;
const FIRST_SHIFT: u32 = FIRST_SEGMENT.trailing_zeros();
/// 22 doubling segments address 1024 * (2^22 - 1) items, comfortably past
/// the u32 index space the traversal actually uses (records cap at 2^31).
const SEGMENTS: usize = 22;

/// Splits an item index into (segment, offset-within-segment).
#[inline]
const fn locate(index: usize) -> (usize, usize) {
    let q = (index >> FIRST_SHIFT) + 1;
    let segment = (usize::BITS - 1 - q.leading_zeros()) as usize;
    let offset = index + FIRST_SEGMENT - (FIRST_SEGMENT << segment);
    (segment, offset)
}

/**
An append-only, concurrently readable segmented vector.

Writes are serialised by a lock; reads are wait-free for any index the
reader has proven in-bounds via [`len`](Self::len). Because segments
double in size and the segment backbone itself is a fixed array of
pointers, no element ever relocates: a `&T` (or raw pointer) obtained
from [`get`](Self::get) stays valid for the list's lifetime. The length
is published with release ordering *after* the slot is written, and
readers load it with acquire ordering, which is the entire
happens-before story for the element bytes.
*/
pub struct AppendList<T> {
    segments: [AtomicPtr<T>; SEGMENTS],
    len: AtomicU32,
    write: Mutex<()>,
}

// SAFETY: element access is gated by the release/acquire len protocol
unsafe impl<T: Send> Send for AppendList<T> {}
// SAFETY: as above
unsafe impl<T: Sync> Sync for AppendList<T> {}

impl<T> AppendList<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segments: [const { AtomicPtr::new(core::ptr::null_mut()) }; SEGMENTS],
            len: AtomicU32::new(0),
            write: Mutex::new(()),
        }
    }

    /// The count of fully published elements.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a value and returns its index.
    pub fn append(&self, value: T) -> u32 {
        let guard = self.write.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let index = self.len.load(Ordering::Relaxed);
        let (segment, offset) = locate(index as usize);
        let base = self.segment_or_alloc(segment);
        // SAFETY: `offset` is within the segment's capacity by construction
        // and no reader touches this slot until `len` is published below.
        unsafe { base.add(offset).write(value) };
        // Publish: release-orders the slot write before the new length.
        self.len.store(index + 1, Ordering::Release);
        drop(guard);
        index
    }

    /// Stable shared reference to a published element.
    ///
    /// # Panics
    /// Panics when `index` has not been published yet.
    #[must_use]
    pub fn get(&self, index: u32) -> &T {
        assert!(index < self.len(), "index beyond published length");
        let (segment, offset) = locate(index as usize);
        let base = self.segments[segment].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "published index must have a segment");
        // SAFETY: index < len (acquire) proves the slot was written and
        // release-published; segments never move or shrink.
        unsafe { &*base.add(offset) }
    }

    /// Iterates published elements in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Drops all elements but keeps the allocated segments.
    /// Exclusive access makes the raw-pointer walk race-free.
    pub fn clear_retaining_capacity(&mut self) {
        let len = *self.len.get_mut() as usize;
        self.drop_elements(len);
        *self.len.get_mut() = 0;
    }

    fn segment_or_alloc(&self, segment: usize) -> *mut T {
        let existing = self.segments[segment].load(Ordering::Acquire);
        if !existing.is_null() {
            return existing;
        }
        let capacity = FIRST_SEGMENT << segment;
        let mut storage: Box<[MaybeUninit<T>]> = Box::new_uninit_slice(capacity);
        let base: *mut T = storage.as_mut_ptr().cast();
        core::mem::forget(storage);
        // The len release-store in `append` is what readers synchronise
        // on, but release the pointer too so the cheap path above works.
        self.segments[segment].store(base, Ordering::Release);
        base
    }

    fn drop_elements(&mut self, len: usize) {
        let mut remaining = len;
        let mut segment = 0;
        while remaining > 0 {
            let capacity = FIRST_SEGMENT << segment;
            let in_segment = remaining.min(capacity);
            let base = *self.segments[segment].get_mut();
            for i in 0..in_segment {
                // SAFETY: exactly the first `in_segment` slots of this
                // segment were initialised by `append`.
                unsafe { base.add(i).drop_in_place() };
            }
            remaining -= in_segment;
            segment += 1;
        }
    }
}

impl<T> Drop for AppendList<T> {
    fn drop(&mut self) {
        let len = *self.len.get_mut() as usize;
        self.drop_elements(len);
        for segment in 0..SEGMENTS {
            let base = *self.segments[segment].get_mut();
            if base.is_null() {
                continue;
            }
            let capacity = FIRST_SEGMENT << segment;
            // SAFETY: reconstructs the allocation made in segment_or_alloc;
            // elements were already dropped above.
            drop(unsafe {
                Box::from_raw(core::ptr::slice_from_raw_parts_mut(
                    base.cast::<MaybeUninit<T>>(),
                    capacity,
                ))
            });
        }
    }
}

impl<T> Default for AppendList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{AppendList, FIRST_SEGMENT, locate};
    use std::sync::Arc;

    #[test]
    fn locate_matches_doubling_layout() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(FIRST_SEGMENT - 1), (0, FIRST_SEGMENT - 1));
        assert_eq!(locate(FIRST_SEGMENT), (1, 0));
        assert_eq!(locate(3 * FIRST_SEGMENT - 1), (1, 2 * FIRST_SEGMENT - 1));
        assert_eq!(locate(3 * FIRST_SEGMENT), (2, 0));
    }

    #[test]
    fn append_spans_segments() {
        let list = AppendList::new();
        let total = 5 * FIRST_SEGMENT + 17;
        for i in 0..total {
            assert_eq!(list.append(i), i as u32);
        }
        assert_eq!(list.len() as usize, total);
        for i in (0..total).step_by(97) {
            assert_eq!(*list.get(i as u32), i);
        }
    }

    #[test]
    fn references_stay_stable_across_growth() {
        let list = AppendList::new();
        list.append(41_u64);
        let first: *const u64 = list.get(0);
        for i in 0..4 * FIRST_SEGMENT {
            list.append(i as u64);
        }
        assert_eq!(first, list.get(0) as *const u64, "element relocated");
    }

    #[test]
    fn concurrent_readers_see_published_prefix() {
        let list = Arc::new(AppendList::new());
        let writer = {
            let list = Arc::clone(&list);
            std::thread::spawn(move || {
                for i in 0..20_000_u32 {
                    list.append(u64::from(i) * 3);
                }
            })
        };
        let reader = {
            let list = Arc::clone(&list);
            std::thread::spawn(move || {
                loop {
                    let len = list.len();
                    if len > 0 {
                        // any published index must read back consistently
                        let i = len - 1;
                        assert_eq!(*list.get(i), u64::from(i) * 3);
                    }
                    if len == 20_000 {
                        break;
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn clear_retaining_capacity_resets_length() {
        let mut list = AppendList::new();
        for i in 0..100 {
            list.append(vec![i]);
        }
        list.clear_retaining_capacity();
        assert!(list.is_empty());
        assert_eq!(list.append(vec![7]), 0);
    }
}
