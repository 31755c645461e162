use std::ops::Range;

use itertools::Itertools;
use strata_error::{StrataResult, strata_bail, strata_err};

use crate::{Codec, PhysicalType, ReadMetadata, RowWindow};

/// One column chunk selected for a read.
///
/// Built once per read from the metadata and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnChunkDescriptor {
    /// Index of the source holding the chunk.
    pub source: usize,
    /// Index of the row group within its source.
    pub row_group: usize,
    pub byte_range: Range<u64>,
    pub codec: Codec,
    pub physical_type: PhysicalType,
    pub max_def: u16,
    pub max_rep: u16,
    pub num_values: u64,
    pub num_rows: usize,
    /// Global row of the chunk's first row, counted over every selected row group.
    pub start_row: usize,
    /// The input column this chunk belongs to.
    pub leaf: usize,
}

/// The chunks and row window of one read.
#[derive(Debug, Clone)]
pub struct ReadPlan {
    pub window: RowWindow,
    pub chunks: Vec<ColumnChunkDescriptor>,
    /// The row groups that intersect the window, per source.
    pub row_groups: Vec<Vec<usize>>,
}

/// Resolve the caller's row group selection and row window into the chunks to read.
///
/// Row groups are concatenated in source order, and within a source in the order they were
/// listed; `skip_rows` and `num_rows` address rows of that concatenation. Row groups that do not
/// intersect the window are dropped.
pub fn plan_read(
    metadata: &ReadMetadata,
    skip_rows: usize,
    num_rows: Option<usize>,
    uses_custom_row_bounds: bool,
    row_groups: &[Vec<usize>],
) -> StrataResult<ReadPlan> {
    let sources = metadata.sources();
    if !row_groups.is_empty() && row_groups.len() != sources.len() {
        strata_bail!(
            "row group selection lists {} sources, the read has {}",
            row_groups.len(),
            sources.len()
        );
    }

    // (source, row group, first global row)
    let mut selected = Vec::new();
    let mut total_rows = 0usize;
    for (source_idx, source) in sources.iter().enumerate() {
        let indices = match row_groups.get(source_idx) {
            Some(indices) if !indices.is_empty() => indices.clone(),
            _ => (0..source.row_groups.len()).collect_vec(),
        };
        for rg_idx in indices {
            let rg = source.row_groups.get(rg_idx).ok_or_else(|| {
                strata_err!(OutOfBounds: rg_idx, 0, source.row_groups.len())
                    .with_context(format!("row group of source {source_idx}"))
            })?;
            selected.push((source_idx, rg_idx, total_rows));
            total_rows += rg.num_rows;
        }
    }

    let window = if uses_custom_row_bounds {
        if skip_rows > total_rows {
            strata_bail!("cannot skip {skip_rows} rows, the selected row groups hold {total_rows}");
        }
        let num = match num_rows {
            Some(num) if skip_rows.checked_add(num).is_none_or(|end| end > total_rows) => strata_bail!(
                "cannot read {num} rows after skipping {skip_rows}, the selected row groups hold {total_rows}"
            ),
            Some(num) => num,
            None => total_rows - skip_rows,
        };
        RowWindow::new(skip_rows, num)
    } else {
        if skip_rows != 0 || num_rows.is_some() {
            log::warn!(
                "ignoring skip_rows={skip_rows} num_rows={num_rows:?} without custom row bounds"
            );
        }
        RowWindow::new(0, total_rows)
    };

    let schema = metadata.schema();
    let mut chunks = Vec::new();
    let mut kept = vec![Vec::new(); sources.len()];
    for (source_idx, rg_idx, start_row) in selected {
        let rg = &sources[source_idx].row_groups[rg_idx];
        if window.overlap(start_row, rg.num_rows) == 0 {
            continue;
        }
        kept[source_idx].push(rg_idx);
        for (leaf_idx, leaf) in schema.leaves().iter().enumerate() {
            let meta = &rg.columns[leaf.chunk_index];
            chunks.push(ColumnChunkDescriptor {
                source: source_idx,
                row_group: rg_idx,
                byte_range: meta.byte_range.clone(),
                codec: meta.codec,
                physical_type: leaf.physical_type,
                max_def: leaf.max_def,
                max_rep: leaf.max_rep,
                num_values: meta.num_values,
                num_rows: rg.num_rows,
                start_row,
                leaf: leaf_idx,
            });
        }
    }

    log::debug!(
        "selected {} of {} rows as {:?}: {} row groups, {} column chunks",
        window.num,
        total_rows,
        window,
        kept.iter().map(Vec::len).sum::<usize>(),
        chunks.len()
    );

    Ok(ReadPlan {
        window,
        chunks,
        row_groups: kept,
    })
}
