//! Commit generation and cross-process wakeup
//!
//! The signal block's `generation` word uses the odd/even protocol:
//! - Odd = update cycle open (writer is mutating values and flags)
//! - Even = committed (change bits describe exactly the last cycle)
//!
//! The same word is the futex readers block on, so a commit both publishes
//! the new generation and wakes every waiter in one step.

use crate::layout::SignalBlock;
use crate::platform::{futex_wait, futex_wake_all};
use std::sync::atomic::{Ordering, fence};
use std::time::{Duration, Instant};

/// Whether `generation` denotes a committed state
#[inline]
pub const fn is_committed(generation: u32) -> bool {
    generation % 2 == 0
}

/// Last committed generation at or before `generation`
#[inline]
pub const fn committed_floor(generation: u32) -> u32 {
    generation & !1
}

impl SignalBlock {
    /// Current generation
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Open an update cycle (generation becomes odd). Writer only.
    pub(crate) fn begin_cycle(&self) -> u32 {
        let next = self.generation.load(Ordering::Relaxed).wrapping_add(1);
        debug_assert!(!is_committed(next));
        self.generation.store(next, Ordering::Relaxed);
        // Flag and value stores of the cycle must not become visible before
        // the odd generation.
        fence(Ordering::Release);
        next
    }

    /// Close the open cycle and wake all waiters. Writer only.
    pub(crate) fn end_cycle(&self) -> u32 {
        let next = self.generation.load(Ordering::Relaxed).wrapping_add(1);
        debug_assert!(is_committed(next));
        self.generation.store(next, Ordering::Release);

        // Pairs with the waiter's increment-then-load.
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            futex_wake_all(&self.generation);
        }
        next
    }

    /// Advance the generation by `steps` committed cycles and wake waiters.
    /// Writer only; used when the whole segment is (re)initialized.
    pub(crate) fn advance(&self, steps: u32) -> u32 {
        let current = committed_floor(self.generation.load(Ordering::Relaxed));
        let next = current.wrapping_add(2 * steps);
        self.generation.store(next, Ordering::Release);
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            futex_wake_all(&self.generation);
        }
        next
    }

    /// Block until a committed generation other than `seen` is visible, or
    /// `timeout` elapses. Returns the new generation, or `None` on timeout.
    pub(crate) fn wait_for_commit(&self, seen: u32, timeout: Duration) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        self.waiters.fetch_add(1, Ordering::SeqCst);

        let result = loop {
            let current = self.generation.load(Ordering::SeqCst);
            if is_committed(current) && current != seen {
                break Some(current);
            }
            let now = Instant::now();
            if now >= deadline {
                break None;
            }
            futex_wait(&self.generation, current, deadline - now);
        };

        self.waiters.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::SegmentRegion;
    use std::sync::Arc;

    type SmallRegion = SegmentRegion<4, 2, 3>;

    #[test]
    fn cycle_parity() {
        let region = SmallRegion::in_memory("parity");
        let signal = region.signal();

        assert!(is_committed(signal.generation()));
        assert_eq!(signal.begin_cycle(), 1);
        assert!(!is_committed(signal.generation()));
        assert_eq!(signal.end_cycle(), 2);
        assert!(is_committed(signal.generation()));
        assert_eq!(committed_floor(5), 4);
    }

    #[test]
    fn advance_skips_whole_cycles() {
        let region = SmallRegion::in_memory("advance");
        let signal = region.signal();
        signal.begin_cycle();
        assert_eq!(signal.advance(2), 4);
        assert_eq!(signal.advance(1), 6);
    }

    #[test]
    fn wait_returns_immediately_for_unseen_commit() {
        let region = SmallRegion::in_memory("unseen");
        let signal = region.signal();
        signal.begin_cycle();
        signal.end_cycle();

        let start = Instant::now();
        assert_eq!(signal.wait_for_commit(0, Duration::from_secs(5)), Some(2));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(signal.waiters.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wait_times_out_without_commit() {
        let region = SmallRegion::in_memory("timeout");
        let start = Instant::now();
        assert_eq!(
            region.signal().wait_for_commit(0, Duration::from_millis(10)),
            None
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn open_cycle_does_not_release_waiter() {
        let region = SmallRegion::in_memory("open");
        region.signal().begin_cycle();
        assert_eq!(
            region.signal().wait_for_commit(0, Duration::from_millis(10)),
            None
        );
    }

    #[test]
    fn commit_wakes_blocked_waiter() {
        let region = Arc::new(SmallRegion::in_memory("wake"));
        let waiter = {
            let region = Arc::clone(&region);
            std::thread::spawn(move || region.signal().wait_for_commit(0, Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(20));
        region.signal().begin_cycle();
        region.signal().end_cycle();

        assert_eq!(waiter.join().unwrap(), Some(2));
    }
}
