//! Core traits and implementations for asynchronous positional IO.
//!
//! A decode reads column chunks from any number of sources at once: local files, in-memory
//! buffers and objects in remote stores. This crate provides the object-safe [`ReadAt`] trait
//! they all implement, a dispatcher that drives the reads on dedicated IO threads, and range
//! coalescing so that adjacent chunks are fetched with one request.

pub use dispatcher::*;
pub use file::*;
pub use offset::*;
pub use read::*;
pub use read_ranges::*;
#[cfg(feature = "object_store")]
pub use store::*;

mod dispatcher;
mod file;
mod offset;
mod read;
mod read_ranges;
#[cfg(feature = "object_store")]
mod store;

/// Required alignment for all buffers allocated by readers.
pub const ALIGNMENT: usize = 64;
