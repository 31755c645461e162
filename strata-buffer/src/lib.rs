#![deny(missing_docs)]

//! Aligned buffers for decoded column data, and the memory budget they are allocated against.
//!
//! [`Buffer`] is an immutable, cheaply cloneable view over `bytes::Bytes` that guarantees the
//! alignment of its first element. [`BufferMut`] is its growable counterpart and keeps the
//! alignment across reallocations.
//!
//! [`MemoryPool`] accounts for the working memory of one read. Every decompression arena and
//! output buffer reserves its bytes up front, so exhausting the budget fails early with an
//! allocation error instead of aborting the process.

pub use alignment::*;
pub use buffer::*;
pub use buffer_mut::*;
pub use native::*;
pub use pool::*;

mod alignment;
mod buffer;
mod buffer_mut;
mod native;
mod pool;

/// An immutable buffer of u8.
pub type ByteBuffer = Buffer<u8>;

/// A mutable buffer of u8.
pub type ByteBufferMut = BufferMut<u8>;
