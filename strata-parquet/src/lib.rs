//! Decodes Parquet column chunks into typed, null-aware columns.
//!
//! A read takes a contiguous window of rows across one or more sources and runs it through a
//! fixed sequence of stages:
//!
//! 1. every selected column chunk is fetched with coalesced range reads,
//! 2. page headers are located and decoded (count first, then fill a pre-sized table),
//! 3. compressed pages are inflated into one arena through a pluggable [`CodecRegistry`],
//! 4. each page is sized: its rows, and its entries per nesting depth inside the window,
//! 5. output buffers are allocated once at their exact size,
//! 6. every page decodes its levels and values in parallel into its own slice of the output.
//!
//! The result is a [`Table`] of [`Column`]s. Working memory is accounted against an optional
//! budget, and any failure aborts the whole read with a [`StrataError`](strata_error::StrataError).
//!
//! [`CodecRegistry`]: decompress::CodecRegistry

pub use column::*;
pub use metadata::*;
pub use options::*;
pub use reader::*;
pub use schema::*;
pub use types::*;

mod chunk;
mod column;
pub mod decompress;
mod decode;
mod dictionary;
mod levels;
mod metadata;
mod nesting;
mod options;
mod output;
mod page_header;
mod preprocess;
mod reader;
mod rle;
mod schema;
#[cfg(test)]
mod test_util;
mod thrift;
mod types;
mod values;
mod walk;
