//! `ObjectPool`: fixed-capacity free list.
//!
//! Preallocated objects handed out and returned without touching the
//! allocator on the hot path. Backed by a lock-free bounded MPMC queue;
//! `get` never blocks and returns `None` when the pool is empty.

use crossbeam_queue::ArrayQueue;

pub struct ObjectPool<T> {
    free: ArrayQueue<T>,
}

impl<T> ObjectPool<T> {
    /// Pool of `capacity` objects built by `factory`.
    pub fn new(capacity: usize, mut factory: impl FnMut() -> T) -> Self {
        let capacity = capacity.max(1);
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            // Cannot fail: exactly `capacity` pushes into an empty queue.
            let _ = free.push(factory());
        }
        Self { free }
    }

    /// Take an object. `None` when every object is checked out.
    #[inline]
    pub fn get(&self) -> Option<T> {
        self.free.pop()
    }

    /// Return an object. An object that does not fit (the pool is
    /// already full) is dropped.
    #[inline]
    pub fn put(&self, obj: T) {
        if self.free.push(obj).is_err() {
            tracing::trace!("object pool full, dropping returned object");
        }
    }

    /// Objects currently available.
    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_put_exhaust() {
        let pool: ObjectPool<Vec<u8>> = ObjectPool::new(2, || Vec::with_capacity(16));
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert!(pool.get().is_none());
        assert_eq!(pool.available(), 0);
        pool.put(a);
        assert_eq!(pool.available(), 1);
        pool.put(b);
        pool.put(Vec::new()); // over capacity, dropped
        assert_eq!(pool.available(), 2);
        assert!(pool.get().unwrap().capacity() >= 16);
    }

    #[test]
    fn test_concurrent_checkout() {
        let pool = Arc::new(ObjectPool::new(8, || 0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(v) = pool.get() {
                            pool.put(v + 1);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.available(), 8);
    }
}
