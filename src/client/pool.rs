use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroU16;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;


/// Returned by `RequestIdPool::alloc` when every request ID is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("all {capacity} FastCGI request IDs are in use")]
pub struct PoolExhausted {
    /// The size of the exhausted pool.
    pub capacity: u16,
}


#[derive(Debug)]
struct PoolState {
    /// The lowest ID that was never handed out.
    next: u32,
    /// Released IDs, reused in release order.
    free: VecDeque<NonZeroU16>,
    /// One bit per ID, set while the ID is allocated.
    held: Vec<u64>,
}

impl PoolState {
    #[inline]
    fn slot(id: NonZeroU16) -> (usize, u64) {
        let id = usize::from(id.get());
        (id / 64, 1 << (id % 64))
    }

    fn is_held(&self, id: NonZeroU16) -> bool {
        let (word, bit) = Self::slot(id);
        self.held.get(word).is_some_and(|w| w & bit != 0)
    }

    fn set_held(&mut self, id: NonZeroU16, held: bool) {
        let (word, bit) = Self::slot(id);
        if held {
            self.held[word] |= bit;
        } else {
            self.held[word] &= !bit;
        }
    }
}


/// A bounded allocator for FastCGI request IDs.
///
/// IDs are drawn from `1..=capacity`; 0 is reserved for management records
/// and never handed out. Released IDs are reused in the order they were
/// released, before any never-used ID.
///
/// [`RequestIdPool`] is a cheap handle: clones share the same set of IDs.
/// All state sits behind a single lock, so the pool may be used from any
/// number of threads.
///
/// Releasing an ID that is not currently allocated, including releasing it
/// twice, is rejected: `RequestIdPool::release` returns `false` and leaves
/// the pool untouched.
#[derive(Clone)]
pub struct RequestIdPool {
    state: Arc<Mutex<PoolState>>,
    capacity: u16,
}

impl RequestIdPool {
    /// Creates a pool handing out IDs `1..=capacity`.
    ///
    /// A `capacity` of 0 is raised to 1.
    #[must_use]
    pub fn new(capacity: u16) -> Self {
        let capacity = capacity.max(1);
        let words = usize::from(capacity) / 64 + 1;
        let state = PoolState { next: 1, free: VecDeque::new(), held: vec![0; words] };
        Self { state: Arc::new(Mutex::new(state)), capacity }
    }

    /// Returns the process-wide pool spanning the full 16-bit ID space.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<RequestIdPool> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::new(u16::MAX))
    }

    /// Returns the number of IDs this pool manages.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Returns the number of IDs currently allocated.
    #[must_use]
    pub fn in_use(&self) -> usize {
        let state = self.state.lock();
        state.held.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Tests whether `id` is currently allocated.
    #[must_use]
    pub fn is_allocated(&self, id: NonZeroU16) -> bool {
        self.state.lock().is_held(id)
    }

    /// Allocates an unused request ID.
    ///
    /// The ID returns to the pool when the [`RequestId`] is dropped.
    ///
    /// # Errors
    /// Returns [`PoolExhausted`] if all IDs are in use.
    pub fn alloc(&self) -> Result<RequestId, PoolExhausted> {
        let mut state = self.state.lock();
        let id = match state.free.pop_front() {
            Some(id) => id,
            None if state.next <= u32::from(self.capacity) => {
                let id = u16::try_from(state.next).ok().and_then(NonZeroU16::new);
                let Some(id) = id else {
                    return Err(PoolExhausted { capacity: self.capacity });
                };
                state.next += 1;
                id
            },
            None => return Err(PoolExhausted { capacity: self.capacity }),
        };
        debug_assert!(!state.is_held(id), "free list contains allocated ID {id}");
        state.set_held(id, true);
        drop(state);

        tracing::trace!(request_id = id.get(), "request ID allocated");
        Ok(RequestId { id, pool: self.clone(), released: false })
    }

    /// Returns `id` to the pool.
    ///
    /// Returns `false` without changing the pool if `id` was not allocated.
    pub fn release(&self, id: NonZeroU16) -> bool {
        let mut state = self.state.lock();
        if !state.is_held(id) {
            drop(state);
            tracing::warn!(request_id = id.get(), "release of unallocated request ID rejected");
            return false;
        }
        state.set_held(id, false);
        state.free.push_back(id);
        true
    }
}

impl fmt::Debug for RequestIdPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestIdPool")
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}


/// An allocated request ID, released back to its pool exactly once.
///
/// The ID is released when this value is dropped or passed to
/// `RequestId::release`, whichever happens first.
#[must_use = "dropping a RequestId releases it immediately"]
pub struct RequestId {
    id: NonZeroU16,
    pool: RequestIdPool,
    released: bool,
}

impl RequestId {
    /// Returns the raw ID for use in record headers.
    #[inline]
    #[must_use]
    pub fn get(&self) -> u16 {
        self.id.get()
    }

    /// Releases the ID back to its pool now.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !std::mem::replace(&mut self.released, true) {
            self.pool.release(self.id);
        }
    }
}

impl Drop for RequestId {
    #[inline]
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("RequestId").field(&self.id).finish()
    }
}


#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Barrier;
    use super::*;

    #[test]
    fn exhaustion() {
        const N: u16 = 100;
        let pool = RequestIdPool::new(N);
        let ids: Vec<_> = (0..N).map(|_| pool.alloc().expect("pool has room")).collect();
        let raw: HashSet<u16> = ids.iter().map(RequestId::get).collect();
        assert_eq!(raw.len(), usize::from(N));
        assert!(raw.iter().all(|&id| (1..=N).contains(&id)));
        assert_eq!(pool.in_use(), usize::from(N));

        assert_eq!(pool.alloc().err(), Some(PoolExhausted { capacity: N }));
    }

    #[test]
    fn reuse_after_release() {
        let pool = RequestIdPool::new(3);
        let mut ids: Vec<_> = (0..3).map(|_| pool.alloc().expect("pool has room")).collect();
        assert!(pool.alloc().is_err());

        let freed = ids.remove(1).get();
        let again = pool.alloc().expect("one ID was released");
        assert_eq!(again.get(), freed);
        assert!(pool.alloc().is_err());
    }

    #[test]
    fn never_zero() {
        let pool = RequestIdPool::new(0);
        assert_eq!(pool.capacity(), 1);
        let id = pool.alloc().expect("pool has room");
        assert_eq!(id.get(), 1);
        assert!(pool.alloc().is_err());
    }

    #[test]
    fn full_range() {
        let pool = RequestIdPool::new(u16::MAX);
        let ids: Vec<_> = (0..u16::MAX).map(|_| pool.alloc().expect("pool has room")).collect();
        assert_eq!(ids.last().map(RequestId::get), Some(u16::MAX));
        assert!(pool.alloc().is_err());
        drop(ids);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn double_release_rejected() {
        let pool = RequestIdPool::new(4);
        let id = pool.alloc().expect("pool has room");
        let raw = NonZeroU16::new(id.get()).expect("IDs are nonzero");

        assert!(pool.release(raw));
        assert!(!pool.release(raw));
        // The lease notices the ID is gone and must not corrupt the pool
        drop(id);
        assert_eq!(pool.in_use(), 0);

        let never = NonZeroU16::new(3).expect("nonzero");
        assert!(!pool.release(never));

        let a = pool.alloc().expect("pool has room");
        let b = pool.alloc().expect("pool has room");
        assert_ne!(a.get(), b.get());
    }

    #[test]
    fn explicit_release_once() {
        let pool = RequestIdPool::new(2);
        let id = pool.alloc().expect("pool has room");
        let raw = NonZeroU16::new(id.get()).expect("IDs are nonzero");
        assert!(pool.is_allocated(raw));
        id.release();
        assert!(!pool.is_allocated(raw));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn concurrent_unique() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 500;
        let pool = RequestIdPool::new(64);
        let live = Arc::new(Mutex::new(HashSet::new()));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS).map(|_| {
            let (pool, live, barrier) = (pool.clone(), live.clone(), barrier.clone());
            std::thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let Ok(id) = pool.alloc() else { continue };
                    assert!(live.lock().insert(id.get()), "ID {} handed out twice", id.get());
                    std::thread::yield_now();
                    assert!(live.lock().remove(&id.get()));
                    drop(id);
                }
            })
        }).collect();

        for h in handles {
            h.join().expect("worker panicked");
        }
        assert_eq!(pool.in_use(), 0);
    }
}
