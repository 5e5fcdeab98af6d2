use crate::pool::futex;
use core::sync::atomic::{AtomicU32, Ordering};

/// Low bit of the progress word; the completed-record count lives in
/// the remaining 31 bits, which matches the record index space.
const FINISHED: u32 = 1;

/**
The wait-for-progress handle handed to the printer.

One futex word carries both the count of records that have reached a
terminal state and the traversal-finished flag, so a poller can park on
the word without a finished-check/sleep race. Producers only issue the
wake syscall when somebody has registered as parked; bumping the
counter itself is two instructions.
*/
#[derive(Debug, Default)]
pub struct Progress {
    word: AtomicU32,
    waiters: AtomicU32,
}

impl Progress {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
            waiters: AtomicU32::new(0),
        }
    }

    /// Count of records in a terminal state so far.
    #[must_use]
    pub fn completed(&self) -> u32 {
        self.word.load(Ordering::SeqCst) >> 1
    }

    #[must_use]
    pub fn finished(&self) -> bool {
        self.word.load(Ordering::SeqCst) & FINISHED != 0
    }

    /// One record reached a terminal state. SeqCst pairs with the
    /// waiter-registration fence in `poll`.
    pub(crate) fn record_output(&self) {
        self.word.fetch_add(2, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) != 0 {
            futex::wake_all(&self.word);
        }
    }

    /// The root turned terminal; the traversal is over.
    pub(crate) fn finish(&self) {
        self.word.fetch_or(FINISHED, Ordering::SeqCst);
        futex::wake_all(&self.word);
    }

    /**
    Blocks until more records are terminal than `prev`, returning the
    new count, or returns `None` once the traversal has finished and no
    count beyond `prev` will ever appear. Never returns a value smaller
    than `prev`.
    */
    #[must_use]
    pub fn poll(&self, prev: u32) -> Option<u32> {
        loop {
            let word = self.word.load(Ordering::SeqCst);
            let count = word >> 1;
            if count > prev {
                return Some(count);
            }
            if word & FINISHED != 0 {
                return None;
            }
            // Register before the re-check: a producer that increments
            // after our registration is obliged to wake us.
            self.waiters.fetch_add(1, Ordering::SeqCst);
            if self.word.load(Ordering::SeqCst) == word {
                futex::wait(&self.word, word);
            }
            self.waiters.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Drains `poll` to the end of the traversal.
    pub fn wait_finished(&self) {
        let mut seen = self.completed();
        while let Some(count) = self.poll(seen) {
            seen = count;
        }
    }
}
