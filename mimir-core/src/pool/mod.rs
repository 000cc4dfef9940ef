//! Pre-allocated message-view pools
//!
//! Inbound decoding reuses pooled views instead of allocating per message.
//! One pool per session, pre-filled at startup; acquisition is O(1) via
//! crossbeam's ArrayQueue. Exhaustion either returns `None` (drop/apply
//! backpressure) or spins until a view comes back, per the pool's
//! configured policy.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;

/// What `acquire` does when the pool is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionPolicy {
    /// Return None immediately
    #[default]
    Fail,
    /// Spin-wait until an object is released
    Block,
}

/// Lock-free pre-allocated object pool
pub struct MessagePool<T> {
    queue: Arc<ArrayQueue<T>>,
    capacity: usize,
    policy: ExhaustionPolicy,
}

impl<T: Default> MessagePool<T> {
    /// Pre-allocates `capacity` objects with `T::default()`. Do this at
    /// session setup, not per message.
    pub fn new(capacity: usize, policy: ExhaustionPolicy) -> Self {
        let queue = Arc::new(ArrayQueue::new(capacity));
        for _ in 0..capacity {
            queue.push(T::default()).ok();
        }
        Self {
            queue,
            capacity,
            policy,
        }
    }
}

impl<T> MessagePool<T> {
    /// Acquire a view. Under `Fail` policy returns None when exhausted;
    /// under `Block` it spins (with yields) until one is available.
    #[inline]
    pub fn acquire(&self) -> Option<T> {
        match self.queue.pop() {
            Some(obj) => Some(obj),
            None => match self.policy {
                ExhaustionPolicy::Fail => None,
                ExhaustionPolicy::Block => {
                    loop {
                        if let Some(obj) = self.queue.pop() {
                            return Some(obj);
                        }
                        std::thread::sleep(Duration::from_micros(10));
                    }
                }
            },
        }
    }

    /// Return a view. A full pool drops the extra object.
    #[inline]
    pub fn release(&self, obj: T) {
        self.queue.push(obj).ok();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.queue.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> Clone for MessagePool<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            capacity: self.capacity,
            policy: self.policy,
        }
    }
}

/// RAII guard returning the view on drop
pub struct PooledView<T> {
    obj: Option<T>,
    pool: MessagePool<T>,
}

impl<T> PooledView<T> {
    pub fn new(obj: T, pool: MessagePool<T>) -> Self {
        Self {
            obj: Some(obj),
            pool,
        }
    }
}

impl<T> std::ops::Deref for PooledView<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.obj.as_ref().unwrap()
    }
}

impl<T> std::ops::DerefMut for PooledView<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.obj.as_mut().unwrap()
    }
}

impl<T> Drop for PooledView<T> {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.release(obj);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct View {
        payload: Vec<u8>,
    }

    #[test]
    fn test_acquire_release() {
        let pool = MessagePool::<View>::new(4, ExhaustionPolicy::Fail);
        assert_eq!(pool.available(), 4);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.available(), 2);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_fail_policy_on_exhaustion() {
        let pool = MessagePool::<View>::new(1, ExhaustionPolicy::Fail);
        let held = pool.acquire().unwrap();
        assert!(pool.is_exhausted());
        assert!(pool.acquire().is_none());
        pool.release(held);
    }

    #[test]
    fn test_block_policy_waits_for_release() {
        let pool = MessagePool::<View>::new(1, ExhaustionPolicy::Block);
        let held = pool.acquire().unwrap();

        let waiter = pool.clone();
        let handle = std::thread::spawn(move || waiter.acquire().is_some());

        std::thread::sleep(std::time::Duration::from_millis(20));
        pool.release(held);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_guard_returns_on_drop() {
        let pool = MessagePool::<View>::new(2, ExhaustionPolicy::Fail);
        {
            let mut guard = PooledView::new(pool.acquire().unwrap(), pool.clone());
            guard.payload.extend_from_slice(b"x");
            assert_eq!(pool.available(), 1);
        }
        assert_eq!(pool.available(), 2);
    }
}
