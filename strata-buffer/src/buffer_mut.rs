use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};

use bytes::{Buf, BytesMut};
use strata_error::StrataExpect;

use crate::{Alignment, Buffer, NativeType};

/// A mutable buffer that maintains a runtime-defined alignment through resizing operations.
#[derive(PartialEq, Eq)]
pub struct BufferMut<T> {
    pub(crate) bytes: BytesMut,
    pub(crate) length: usize,
    pub(crate) alignment: Alignment,
    pub(crate) _marker: std::marker::PhantomData<T>,
}

impl<T: NativeType> BufferMut<T> {
    /// Create a new `BufferMut` with the requested alignment and capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_aligned(capacity, Alignment::of::<T>())
    }

    /// Create a new `BufferMut` with the requested alignment and capacity.
    pub fn with_capacity_aligned(capacity: usize, alignment: Alignment) -> Self {
        if !alignment.is_aligned_to(Alignment::of::<T>()) {
            strata_error::strata_panic!(
                "Alignment {} must align to the scalar type's alignment {}",
                alignment,
                align_of::<T>()
            );
        }

        let byte_capacity = capacity
            .checked_mul(size_of::<T>())
            .and_then(|c| c.checked_add(*alignment))
            .strata_expect("capacity overflow");
        let mut bytes = BytesMut::with_capacity(byte_capacity);
        let padding = alignment.padding_for(bytes.as_ptr());
        bytes.resize(padding, 0);
        bytes.advance(padding);

        Self {
            bytes,
            length: 0,
            alignment,
            _marker: Default::default(),
        }
    }

    /// Create a new zeroed `BufferMut` with the given alignment.
    pub fn zeroed_aligned(len: usize, alignment: Alignment) -> Self {
        let mut buffer = Self::with_capacity_aligned(len, alignment);
        buffer.bytes.resize(len * size_of::<T>(), 0);
        buffer.length = len;
        buffer
    }

    /// Create a new empty `BufferMut`.
    pub fn empty() -> Self {
        Self::with_capacity(0)
    }

    /// Create a new empty `BufferMut` with the provided alignment.
    pub fn empty_aligned(alignment: Alignment) -> Self {
        Self::with_capacity_aligned(0, alignment)
    }

    /// Create a mutable scalar buffer by copying the contents of the slice.
    pub fn copy_from(other: impl AsRef<[T]>) -> Self {
        Self::copy_from_aligned(other, Alignment::of::<T>())
    }

    /// Create a mutable scalar buffer with the alignment by copying the contents of the slice.
    pub fn copy_from_aligned(other: impl AsRef<[T]>, alignment: Alignment) -> Self {
        let other = other.as_ref();
        let mut buffer = Self::with_capacity_aligned(other.len(), alignment);
        buffer.extend_from_slice(other);
        buffer
    }

    /// Returns the alignment of the buffer.
    #[inline(always)]
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Returns the length of the buffer.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns whether the buffer is empty.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the capacity of the buffer in elements of `T`.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.capacity() / size_of::<T>()
    }

    /// Returns a slice over the buffer of elements of type T.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        let raw_slice = self.bytes.as_ref();
        // SAFETY: alignment of the buffer is maintained by every operation that grows it.
        unsafe { std::slice::from_raw_parts(raw_slice.as_ptr().cast(), self.length) }
    }

    /// Returns a mutable slice over the buffer of elements of type T.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let raw_slice = self.bytes.as_mut();
        // SAFETY: alignment of the buffer is maintained by every operation that grows it.
        unsafe { std::slice::from_raw_parts_mut(raw_slice.as_mut_ptr().cast(), self.length) }
    }

    /// Reserves capacity for at least `additional` more elements.
    ///
    /// A reallocation copies into a freshly aligned allocation rather than letting `BytesMut`
    /// pick an arbitrary address.
    pub fn reserve(&mut self, additional: usize) {
        if self.capacity() - self.length >= additional {
            return;
        }
        let new_capacity = (self.length + additional).max(self.capacity() * 2);
        let mut grown = Self::with_capacity_aligned(new_capacity, self.alignment);
        grown.bytes.extend_from_slice(self.bytes.as_ref());
        grown.length = self.length;
        *self = grown;
    }

    /// Appends a scalar to the buffer.
    #[inline]
    pub fn push(&mut self, value: T) {
        self.reserve(1);
        // SAFETY: every bit pattern of a NativeType is valid, so are its bytes.
        let raw = unsafe {
            std::slice::from_raw_parts((&value as *const T).cast::<u8>(), size_of::<T>())
        };
        self.bytes.extend_from_slice(raw);
        self.length += 1;
    }

    /// Appends the contents of the slice to the buffer.
    pub fn extend_from_slice(&mut self, slice: &[T]) {
        self.reserve(slice.len());
        // SAFETY: every bit pattern of a NativeType is valid, so are its bytes.
        let raw = unsafe { std::slice::from_raw_parts(slice.as_ptr().cast::<u8>(), size_of_val(slice)) };
        self.bytes.extend_from_slice(raw);
        self.length += slice.len();
    }

    /// Shortens the buffer to `len` elements.
    pub fn truncate(&mut self, len: usize) {
        if len < self.length {
            self.bytes.truncate(len * size_of::<T>());
            self.length = len;
        }
    }

    /// Freeze the `BufferMut` into a `Buffer`.
    pub fn freeze(self) -> Buffer<T> {
        Buffer {
            bytes: self.bytes.freeze(),
            length: self.length,
            alignment: self.alignment,
            _marker: Default::default(),
        }
    }
}

impl<T: NativeType> Clone for BufferMut<T> {
    fn clone(&self) -> Self {
        Self::copy_from_aligned(self.as_slice(), self.alignment)
    }
}

impl<T: NativeType + Debug> Debug for BufferMut<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferMut")
            .field("length", &self.length)
            .field("alignment", &self.alignment)
            .field("values", &self.as_slice())
            .finish()
    }
}

impl<T: NativeType> Default for BufferMut<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: NativeType> Deref for BufferMut<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T: NativeType> DerefMut for BufferMut<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl<T: NativeType> Extend<T> for BufferMut<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for item in iter {
            self.push(item);
        }
    }
}

impl<T: NativeType> FromIterator<T> for BufferMut<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut buffer = Self::empty();
        buffer.extend(iter);
        buffer
    }
}
