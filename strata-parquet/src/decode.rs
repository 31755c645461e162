//! Decodes every data page straight into its range of the output buffers.

use rayon::prelude::*;
use strata_buffer::MemoryPool;
use strata_error::{ContextExt, StrataResult, strata_bail};

use crate::chunk::ColumnChunkDescriptor;
use crate::dictionary::ChunkDictionary;
use crate::levels::split_page;
use crate::nesting::{PageNesting, PageNestingInfo};
use crate::output::PageTargets;
use crate::page_header::{PageBodies, PageInfo, PageTable};
use crate::schema::Schema;
use crate::values::ValueDecoder;
use crate::walk::LevelWalk;
use crate::RowWindow;

/// Decode the dictionary page of every chunk that has one.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub(crate) fn decode_dictionaries<'a>(
    table: &PageTable,
    chunks: &[ColumnChunkDescriptor],
    bodies: PageBodies<'a>,
    pool: &MemoryPool,
) -> StrataResult<Vec<Option<ChunkDictionary<'a>>>> {
    table
        .dictionaries
        .par_iter()
        .enumerate()
        .map(|(chunk_idx, page_idx)| {
            page_idx
                .map(|page_idx| {
                    let page = &table.pages[page_idx];
                    let physical_type = chunks[chunk_idx].physical_type;
                    ChunkDictionary::try_new(page, bodies.body(page)?, physical_type, pool)
                        .with_context(|| format!("dictionary of column chunk {chunk_idx}"))
                })
                .transpose()
        })
        .collect()
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::too_many_arguments
)]
fn decode_page(
    schema: &Schema,
    chunk: &ColumnChunkDescriptor,
    page: &PageInfo,
    bodies: PageBodies<'_>,
    dictionary: Option<&ChunkDictionary<'_>>,
    window: RowWindow,
    infos: &mut [PageNestingInfo],
    targets: PageTargets<'_>,
) -> StrataResult<bool> {
    let leaf = &schema.leaves()[chunk.leaf];
    let depth = leaf.depth();
    let leaf_depth = depth - 1;
    let infos = &mut infos[..depth];
    if infos.iter().all(|i| i.size == 0) {
        return Ok(false);
    }

    let body = bodies.body(page)?;
    let levels = split_page(page, body, leaf.max_def, leaf.max_rep)?;
    let mut values = ValueDecoder::try_new(page.encoding, leaf.physical_type, levels.values, dictionary)?;
    let width = leaf.physical_type.fixed_width();
    let first_row = chunk.start_row + page.chunk_row;
    let mut walk = LevelWalk::new(schema, leaf, levels, page.num_values, first_row, window);

    let PageTargets { mut depths } = targets;
    let mut counts = vec![0; depth];
    let mut valid = vec![0; depth];
    let mut chars = 0;

    while let Some(entry) = walk.next_entry()? {
        if !entry.in_window {
            if entry.has_value {
                values.skip(1)?;
            }
            continue;
        }
        for d in entry.start..=entry.end {
            let local = counts[d];
            let info = infos[d];
            if local >= info.size {
                strata_bail!(
                    AssertionFailed: "page writes more than the {} entries it was sized for at depth {d}",
                    info.size
                );
            }
            let target = &mut depths[d];
            if entry.def >= schema.node(leaf.path[d]).def_valid {
                valid[d] += 1;
                if let Some(bitmap) = target.validity {
                    bitmap.set(info.page_start_value + local);
                }
            }

            if d < leaf_depth {
                if let Some(offsets) = target.offsets.as_deref_mut() {
                    offsets[local] = (infos[d + 1].page_start_value + counts[d + 1]) as i32;
                }
            } else if let Some(width) = width {
                if entry.has_value {
                    let value = values.next_value()?;
                    if value.len() != width {
                        strata_bail!(
                            InvalidSerde: "{} byte value in a column of {width} byte values",
                            value.len()
                        );
                    }
                    if let Some(out) = target.values.as_deref_mut() {
                        out[local * width..(local + 1) * width].copy_from_slice(value);
                    }
                }
            } else {
                if let Some(offsets) = target.offsets.as_deref_mut() {
                    offsets[local] = (info.chars_start + chars) as i32;
                }
                if entry.has_value {
                    let value = values.next_value()?;
                    let end = chars + value.len();
                    if end > info.chars_size {
                        strata_bail!(
                            AssertionFailed: "page writes more than the {} bytes it was sized for",
                            info.chars_size
                        );
                    }
                    if let Some(out) = target.values.as_deref_mut() {
                        out[chars..end].copy_from_slice(value);
                    }
                    chars = end;
                }
            }
            counts[d] += 1;
        }
    }

    for (d, info) in infos.iter_mut().enumerate() {
        if counts[d] != info.size {
            strata_bail!(
                AssertionFailed: "page wrote {} entries at depth {d}, it was sized for {}",
                counts[d],
                info.size
            );
        }
        info.value_count = counts[d];
        info.valid_count = valid[d];
    }
    if chars != infos[leaf_depth].chars_size {
        strata_bail!(
            AssertionFailed: "page wrote {chars} bytes, it was sized for {}",
            infos[leaf_depth].chars_size
        );
    }
    Ok(true)
}

/// Decode all data pages in parallel, each into its own output ranges.
///
/// Returns the number of pages that held rows inside the window.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
#[allow(clippy::too_many_arguments)]
pub(crate) fn decode_pages(
    schema: &Schema,
    chunks: &[ColumnChunkDescriptor],
    table: &PageTable,
    bodies: PageBodies<'_>,
    dictionaries: &[Option<ChunkDictionary<'_>>],
    window: RowWindow,
    nesting: &mut PageNesting,
    targets: Vec<PageTargets<'_>>,
) -> StrataResult<usize> {
    table
        .pages
        .par_iter()
        .zip(nesting.par_pages_mut())
        .zip(targets)
        .enumerate()
        .map(|(idx, ((page, infos), targets))| {
            if page.is_dictionary() {
                return Ok(0);
            }
            let decoded = decode_page(
                schema,
                &chunks[page.chunk],
                page,
                bodies,
                dictionaries[page.chunk].as_ref(),
                window,
                infos,
                targets,
            )
            .with_context(|| format!("decoding page {idx} of column chunk {}", page.chunk))?;
            Ok(usize::from(decoded))
        })
        .try_reduce(|| 0, |a, b| Ok(a + b))
}
