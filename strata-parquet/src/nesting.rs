use rayon::prelude::*;
use strata_buffer::{MemoryPool, Reservation};
use strata_error::StrataResult;

/// Per-page bookkeeping for one nesting depth of its column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageNestingInfo {
    /// Entries of the page at this depth that fall in the row window.
    pub size: usize,
    /// Entries written at this depth by the decoder.
    pub value_count: usize,
    /// Non-null entries among them.
    pub valid_count: usize,
    /// Output index of the page's first entry at this depth.
    pub page_start_value: usize,
    /// Bytes of byte-array data in the window. Only set at the leaf depth.
    pub chars_size: usize,
    pub chars_start: usize,
}

/// One flat array of `num_pages * max_depth` records; page `p` owns the records
/// `p * max_depth..(p + 1) * max_depth`, of which it uses as many as its column is deep.
#[derive(Debug)]
pub struct PageNesting {
    max_depth: usize,
    infos: Vec<PageNestingInfo>,
    _reservation: Reservation,
}

impl PageNesting {
    pub fn try_new(num_pages: usize, max_depth: usize, pool: &MemoryPool) -> StrataResult<Self> {
        let len = num_pages * max_depth;
        let reservation = pool.reserve(len * size_of::<PageNestingInfo>())?;
        log::debug!("allocated nesting info for {num_pages} pages, {max_depth} deep");
        Ok(Self {
            max_depth,
            infos: vec![PageNestingInfo::default(); len],
            _reservation: reservation,
        })
    }

    pub fn page(&self, page: usize) -> &[PageNestingInfo] {
        &self.infos[page * self.max_depth..(page + 1) * self.max_depth]
    }

    pub fn page_mut(&mut self, page: usize) -> &mut [PageNestingInfo] {
        &mut self.infos[page * self.max_depth..(page + 1) * self.max_depth]
    }

    pub fn par_pages_mut(&mut self) -> rayon::slice::ChunksMut<'_, PageNestingInfo> {
        self.infos.par_chunks_mut(self.max_depth.max(1))
    }
}
