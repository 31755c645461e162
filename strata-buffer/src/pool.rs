use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use strata_error::{StrataResult, strata_bail};

use crate::{Alignment, BufferMut, NativeType};

/// A byte budget shared by every allocation made on behalf of one read.
///
/// The pool does not own memory itself. Callers reserve bytes before they allocate and the
/// [`Reservation`] hands them back when it is dropped, so a failed read releases everything it
/// held.
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    limit: usize,
    used: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryPool {
    /// A pool that refuses reservations once `limit` bytes are outstanding.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                limit,
                used: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// A pool without a limit that only tracks usage.
    pub fn unbounded() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// The byte limit of the pool.
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Acquire)
    }

    /// The largest number of bytes that were reserved at the same time.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::Acquire)
    }

    /// Reserve `bytes` from the pool.
    ///
    /// Fails with `AllocationFailed` when the reservation would exceed the limit.
    pub fn reserve(&self, bytes: usize) -> StrataResult<Reservation> {
        let mut used = self.inner.used.load(Ordering::Acquire);
        loop {
            let available = self.inner.limit.saturating_sub(used);
            if bytes > available {
                log::debug!(
                    "memory pool exhausted: requested {bytes} bytes, {available} of {} available",
                    self.inner.limit
                );
                strata_bail!(AllocationFailed: bytes, available);
            }
            match self.inner.used.compare_exchange_weak(
                used,
                used + bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => used = current,
            }
        }
        self.inner.peak.fetch_max(used + bytes, Ordering::AcqRel);
        Ok(Reservation {
            pool: self.clone(),
            bytes,
        })
    }

    /// Reserve space for `len` zeroed elements of `T` and allocate them.
    pub fn alloc_zeroed<T: NativeType>(&self, len: usize) -> StrataResult<PooledBuffer<T>> {
        let reservation = self.reserve(len.saturating_mul(size_of::<T>()))?;
        Ok(PooledBuffer {
            buffer: BufferMut::zeroed_aligned(len, Alignment::of::<T>()),
            reservation,
        })
    }

    /// Like [`alloc_zeroed`][Self::alloc_zeroed], with the buffer aligned to `alignment`.
    ///
    /// Byte buffers that will later be reinterpreted as wider types need the wider alignment.
    pub fn alloc_zeroed_aligned<T: NativeType>(
        &self,
        len: usize,
        alignment: Alignment,
    ) -> StrataResult<PooledBuffer<T>> {
        let reservation = self.reserve(len.saturating_mul(size_of::<T>()))?;
        Ok(PooledBuffer {
            buffer: BufferMut::zeroed_aligned(len, alignment),
            reservation,
        })
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Debug for MemoryPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("limit", &self.limit())
            .field("used", &self.used())
            .field("peak", &self.peak())
            .finish()
    }
}

/// Bytes held against a [`MemoryPool`], released on drop.
#[must_use]
pub struct Reservation {
    pool: MemoryPool,
    bytes: usize,
}

impl Reservation {
    /// Bytes held by this reservation.
    pub fn size(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.pool.inner.used.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

impl Debug for Reservation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// A mutable buffer whose bytes are accounted against a [`MemoryPool`].
pub struct PooledBuffer<T> {
    buffer: BufferMut<T>,
    reservation: Reservation,
}

impl<T> Debug for PooledBuffer<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buffer.length)
            .field("reservation", &self.reservation)
            .finish()
    }
}

impl<T: NativeType> PooledBuffer<T> {
    /// Returns the contents as a slice.
    pub fn as_slice(&self) -> &[T] {
        self.buffer.as_slice()
    }

    /// Returns the contents as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.buffer.as_mut_slice()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Split the pooled buffer into its contents and the reservation that still covers them.
    pub fn into_parts(self) -> (BufferMut<T>, Reservation) {
        (self.buffer, self.reservation)
    }
}
