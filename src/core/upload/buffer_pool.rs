// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use crate::{core::sizing::buffer_slots, error::Error};
use bytes::{Bytes, BytesMut};
use std::{
    mem,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// Bounded pool of part-sized byte buffers.
///
/// At most `capacity` buffers are checked out at once; `checkout` waits
/// for a buffer to be dropped when the pool is exhausted. Buffers are
/// allocated lazily and reused for the lifetime of the pool.
///
/// ---
/// Example Usage:
/// ```
///
/// let pool = BufferPool::new(2, 5_242_880);
///
/// let mut buffer: PooledBuffer = pool.checkout().await?;
/// buffer.writable().extend_from_slice(b"shark");
///
/// drop(buffer);
/// ```
#[derive(Debug)]
pub struct BufferPool {
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

#[derive(Debug)]
struct Shared {
    free: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    allocated: AtomicUsize,
}

impl Shared {
    fn restore(&self, mut buffer: BytesMut) {
        buffer.clear();

        if buffer.capacity() < self.buffer_size {
            self.allocated.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        match self.free.lock() {
            Ok(mut free) => free.push(buffer),
            Err(_) => {
                self.allocated.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn forget(&self, length: usize) {
        warn!(
            length,
            "Part buffer still referenced after its upload, allocating a new one"
        );
        self.allocated.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            shared: Arc::new(Shared {
                free: Mutex::new(Vec::with_capacity(capacity)),
                buffer_size,
                allocated: AtomicUsize::new(0),
            }),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Pool sized for `concurrency` upload workers
    pub fn for_concurrency(concurrency: usize, buffer_size: usize) -> Self {
        Self::new(buffer_slots(concurrency), buffer_size)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Buffers that can be checked out without waiting
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Buffers currently allocated, checked out or idle
    pub fn allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::SeqCst)
    }

    pub async fn checkout(&self) -> Result<PooledBuffer, Error> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("buffer pool was closed"))?;

        let reused = self
            .shared
            .free
            .lock()
            .map_err(|_| Error::internal("buffer pool lock was poisoned"))?
            .pop();

        let buffer = reused.unwrap_or_else(|| {
            self.shared.allocated.fetch_add(1, Ordering::SeqCst);
            BytesMut::with_capacity(self.shared.buffer_size)
        });

        Ok(PooledBuffer {
            buffer,
            frozen: None,
            shared: self.shared.clone(),
            _permit: permit,
        })
    }
}

/// A buffer checked out of a `BufferPool`.
///
/// Filled through `writable`, then handed to the upload with `freeze`. The
/// storage goes back to the pool on drop, and the pool slot is released
/// with it.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: BytesMut,
    frozen: Option<Bytes>,
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl PooledBuffer {
    pub fn writable(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Freezes the contents and returns a cheap handle to them.
    pub fn freeze(&mut self) -> Bytes {
        if self.frozen.is_none() {
            self.frozen = Some(mem::take(&mut self.buffer).freeze());
        }

        self.frozen.clone().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.frozen
            .as_ref()
            .map_or(self.buffer.len(), Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[u8] {
        match &self.frozen {
            Some(bytes) => &bytes[..],
            None => &self.buffer[..],
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        match self.frozen.take() {
            None => self.shared.restore(mem::take(&mut self.buffer)),
            Some(bytes) => {
                let length = bytes.len();

                match bytes.try_into_mut() {
                    Ok(buffer) => self.shared.restore(buffer),
                    Err(_) => self.shared.forget(length),
                }
            }
        }
    }
}
