use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Concurrent pool of reusable packet buffers.
///
/// Leasing never blocks: an empty pool manufactures a fresh instance through
/// the factory instead of waiting. The seeded size is a soft target, the pool
/// grows without bound under load and only refills through [`recycle`].
///
/// Handles are cheap to clone and share one available set, so send and
/// receive threads can lease and recycle concurrently without extra locking.
///
/// [`recycle`]: PacketPool::recycle
pub struct PacketPool<T> {
    inner: Arc<PoolInner<T>>,
}

struct PoolInner<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    manufactured: AtomicUsize,
}

impl<T> PacketPool<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let (sender, receiver) = unbounded();
        Self {
            inner: Arc::new(PoolInner {
                sender,
                receiver,
                factory: Box::new(factory),
                manufactured: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_capacity<F>(target: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let pool = Self::new(factory);
        pool.seed(target);
        pool
    }

    /// Tops the available set up to `target`. Never shrinks it.
    pub fn seed(&self, target: usize) {
        let current = self.available();
        if current >= target {
            return;
        }

        for _ in current..target {
            let item = self.manufacture();
            self.push(item);
        }
    }

    pub fn get(&self) -> T {
        match self.inner.receiver.try_recv() {
            Ok(item) => item,
            Err(_) => self.manufacture(),
        }
    }

    /// Returns `item` to the available set.
    ///
    /// Recycling the same instance twice before it is leased again lets two
    /// callers hold it at once; nothing here detects that.
    pub fn recycle(&self, item: T) {
        self.push(item);
    }

    pub fn available(&self) -> usize {
        self.inner.receiver.len()
    }

    /// Number of instances the factory has produced over the pool's lifetime.
    pub fn manufactured(&self) -> usize {
        self.inner.manufactured.load(Ordering::Relaxed)
    }

    fn manufacture(&self) -> T {
        self.inner.manufactured.fetch_add(1, Ordering::Relaxed);
        (self.inner.factory)()
    }

    fn push(&self, item: T) {
        // Both halves live in `inner`, so the channel cannot be disconnected.
        let _ = self.inner.sender.send(item);
    }
}

impl PacketPool<Vec<u8>> {
    pub fn for_buffers(buffer_size: usize, target: usize) -> Self {
        Self::with_capacity(target, move || Vec::with_capacity(buffer_size))
    }

    /// Leases a buffer that is empty but keeps its previous capacity.
    pub fn get_cleared(&self) -> Vec<u8> {
        let mut buffer = self.get();
        buffer.clear();
        buffer
    }
}

impl<T> Clone for PacketPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for PacketPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool")
            .field("available", &self.available())
            .field("manufactured", &self.manufactured())
            .finish()
    }
}
