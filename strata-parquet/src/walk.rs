//! Turns the level pairs of a page into entries of the output column tree.
//!
//! Sizing and decoding walk a page the same way, so both go through [`LevelWalk`].

use strata_error::{StrataResult, strata_bail};

use crate::levels::PageLevels;
use crate::schema::{LeafColumn, Schema};
use crate::RowWindow;

/// One level pair of a page, resolved against the column's nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LevelEntry {
    pub def: u16,
    /// Shallowest depth that gains an entry.
    pub start: usize,
    /// Deepest depth that gains an entry.
    pub end: usize,
    /// Whether the entry belongs to a row inside the window.
    pub in_window: bool,
    /// Whether the entry carries a leaf value in the values stream.
    pub has_value: bool,
}

pub(crate) struct LevelWalk<'a> {
    schema: &'a Schema,
    leaf: &'a LeafColumn,
    levels: PageLevels<'a>,
    remaining: usize,
    /// One past the row of the current entry. Entries ahead of the page's first new row continue
    /// the previous page's last row.
    next_row: usize,
    window: RowWindow,
}

impl<'a> LevelWalk<'a> {
    /// `first_row` is the global row of the page's first row.
    pub fn new(
        schema: &'a Schema,
        leaf: &'a LeafColumn,
        levels: PageLevels<'a>,
        num_values: usize,
        first_row: usize,
        window: RowWindow,
    ) -> Self {
        Self {
            schema,
            leaf,
            levels,
            remaining: num_values,
            next_row: first_row,
            window,
        }
    }

    #[inline]
    pub fn next_entry(&mut self) -> StrataResult<Option<LevelEntry>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let (def, rep) = self.levels.next_pair()?;
        if rep == 0 {
            self.next_row += 1;
        }
        let start = self.schema.start_depth(self.leaf, rep);
        let end = self.schema.end_depth(self.leaf, def);
        if start > end {
            strata_bail!(
                InvalidSerde: "repetition level {rep} continues a list that definition level {def} leaves empty"
            );
        }
        let leaf_depth = self.leaf.depth() - 1;
        Ok(Some(LevelEntry {
            def,
            start,
            end,
            in_window: self.next_row > 0 && self.window.contains(self.next_row - 1),
            has_value: end == leaf_depth && def >= self.leaf.max_def,
        }))
    }
}

/// Count the rows that start in a page: the entries with repetition level zero.
pub(crate) fn count_rows(levels: &mut PageLevels<'_>, num_values: usize) -> StrataResult<usize> {
    let mut rows = 0;
    for _ in 0..num_values {
        let (_, rep) = levels.next_pair()?;
        rows += usize::from(rep == 0);
    }
    Ok(rows)
}
