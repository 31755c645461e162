//! Sizes every page's share of the output before anything is decoded.
//!
//! Three steps, each over the whole page table:
//! 1. rows per page for list columns, whose headers do not say,
//! 2. per-page entry counts at each depth (and byte-array data sizes) inside the row window,
//! 3. prefix sums that give every page its first output index per depth.

use rayon::prelude::*;
use strata_error::{ContextExt, StrataResult, strata_bail};

use crate::chunk::ColumnChunkDescriptor;
use crate::dictionary::ChunkDictionary;
use crate::levels::split_page;
use crate::nesting::{PageNesting, PageNestingInfo};
use crate::output::NodeSizes;
use crate::page_header::{PageBodies, PageInfo, PageTable};
use crate::schema::Schema;
use crate::values::ValueDecoder;
use crate::walk::{LevelWalk, count_rows};
use crate::{PageKind, RowWindow};

/// Count the rows of every list column page and place each page within its chunk.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub(crate) fn compute_page_rows(
    table: &mut PageTable,
    chunks: &[ColumnChunkDescriptor],
    bodies: PageBodies<'_>,
) -> StrataResult<()> {
    let counted = table
        .pages
        .par_iter()
        .enumerate()
        .map(|(idx, page)| {
            let chunk = &chunks[page.chunk];
            if page.is_dictionary() || chunk.max_rep == 0 {
                return Ok(None);
            }
            let body = bodies.body(page)?;
            let mut levels = split_page(page, body, chunk.max_def, chunk.max_rep)?;
            let rows = count_rows(&mut levels, page.num_values)
                .with_context(|| format!("page {idx} of column chunk {}", page.chunk))?;
            if page.kind == PageKind::DataV2 && rows != page.num_rows {
                strata_bail!(
                    InvalidSerde: "page {idx} starts {rows} rows, its header declares {}",
                    page.num_rows
                );
            }
            Ok(Some(rows))
        })
        .collect::<StrataResult<Vec<_>>>()?;

    for (chunk_idx, chunk) in chunks.iter().enumerate() {
        if chunk.max_rep == 0 {
            continue;
        }
        let mut chunk_row = 0;
        for page_idx in table.data_pages(chunk_idx) {
            let page = &mut table.pages[page_idx];
            page.num_rows = counted[page_idx].unwrap_or_default();
            page.chunk_row = chunk_row;
            chunk_row += page.num_rows;
        }
        if chunk_row != chunk.num_rows {
            strata_bail!(
                InvalidSerde: "column chunk {chunk_idx} holds {chunk_row} rows, its row group declares {}",
                chunk.num_rows
            );
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn size_page(
    schema: &Schema,
    chunk: &ColumnChunkDescriptor,
    page: &PageInfo,
    bodies: PageBodies<'_>,
    dictionary: Option<&ChunkDictionary<'_>>,
    window: RowWindow,
    infos: &mut [PageNestingInfo],
) -> StrataResult<()> {
    let leaf = &schema.leaves()[chunk.leaf];
    let infos = &mut infos[..leaf.depth()];
    let first_row = chunk.start_row + page.chunk_row;
    let is_binary = leaf.physical_type.is_byte_array();

    if !leaf.has_lists() {
        // One entry per row at every depth.
        let rows = window.overlap(first_row, page.num_rows);
        if !is_binary || rows == 0 {
            for info in infos.iter_mut() {
                info.size = rows;
            }
            return Ok(());
        }
    }

    let body = bodies.body(page)?;
    let levels = split_page(page, body, leaf.max_def, leaf.max_rep)?;
    let mut values = if is_binary {
        Some(ValueDecoder::try_new(
            page.encoding,
            leaf.physical_type,
            levels.values,
            dictionary,
        )?)
    } else {
        None
    };
    let mut walk = LevelWalk::new(schema, leaf, levels, page.num_values, first_row, window);
    let mut chars = 0;
    while let Some(entry) = walk.next_entry()? {
        if entry.in_window {
            for info in &mut infos[entry.start..=entry.end] {
                info.size += 1;
            }
        }
        if let (true, Some(values)) = (entry.has_value, values.as_mut()) {
            if entry.in_window {
                chars += values.next_value()?.len();
            } else {
                values.skip(1)?;
            }
        }
    }
    if let Some(leaf_info) = infos.last_mut() {
        leaf_info.chars_size = chars;
    }
    Ok(())
}

/// Count every page's entries per depth that fall inside `window`.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub(crate) fn size_pages(
    schema: &Schema,
    chunks: &[ColumnChunkDescriptor],
    table: &PageTable,
    bodies: PageBodies<'_>,
    dictionaries: &[Option<ChunkDictionary<'_>>],
    window: RowWindow,
    nesting: &mut PageNesting,
) -> StrataResult<()> {
    table
        .pages
        .par_iter()
        .zip(nesting.par_pages_mut())
        .enumerate()
        .try_for_each(|(idx, (page, infos))| {
            if page.is_dictionary() {
                return Ok(());
            }
            let chunk = &chunks[page.chunk];
            size_page(
                schema,
                chunk,
                page,
                bodies,
                dictionaries[page.chunk].as_ref(),
                window,
                infos,
            )
            .with_context(|| format!("sizing page {idx} of column chunk {}", page.chunk))
        })
}

/// Give every page its first output index per depth, and size every output node.
///
/// Columns below a shared struct or list must agree with the node's owner on its size.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub(crate) fn compute_page_starts(
    schema: &Schema,
    chunks: &[ColumnChunkDescriptor],
    table: &PageTable,
    window: RowWindow,
    nesting: &mut PageNesting,
) -> StrataResult<NodeSizes> {
    let leaves = schema.leaves();
    let mut totals = leaves.iter().map(|l| vec![0; l.depth()]).collect::<Vec<_>>();
    let mut chars = vec![0; leaves.len()];

    for (page_idx, page) in table.pages.iter().enumerate() {
        if page.is_dictionary() {
            continue;
        }
        let leaf_idx = chunks[page.chunk].leaf;
        let depth = leaves[leaf_idx].depth();
        let infos = &mut nesting.page_mut(page_idx)[..depth];
        for (info, total) in infos.iter_mut().zip(totals[leaf_idx].iter_mut()) {
            info.page_start_value = *total;
            *total += info.size;
        }
        let leaf_info = &mut infos[depth - 1];
        leaf_info.chars_start = chars[leaf_idx];
        chars[leaf_idx] += leaf_info.chars_size;
    }

    let mut sizes = NodeSizes {
        len: vec![0; schema.nodes().len()],
        chars: vec![0; schema.nodes().len()],
    };
    for (leaf_idx, leaf) in leaves.iter().enumerate() {
        for (d, node_idx) in leaf.path.iter().enumerate() {
            let node = schema.node(*node_idx);
            let owned = totals[node.owner][d];
            if totals[leaf_idx][d] != owned {
                strata_bail!(
                    InvalidSerde: "leaf {leaf_idx} has {} entries in {:?}, leaf {} has {owned}",
                    totals[leaf_idx][d],
                    node.name,
                    node.owner
                );
            }
            sizes.len[*node_idx] = owned;
        }
        if let Some(leaf_node) = leaf.path.last() {
            sizes.chars[*leaf_node] = chars[leaf_idx];
        }
    }

    for root in schema.roots() {
        if sizes.len[*root] != window.num {
            strata_bail!(
                InvalidSerde: "column {:?} has {} rows in the window, expected {}",
                schema.node(*root).name,
                sizes.len[*root],
                window.num
            );
        }
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use strata_buffer::{ByteBuffer, MemoryPool};

    use super::*;
    use crate::page_header::{count_page_headers, decode_page_headers};
    use crate::test_util::{PLAIN, data_page_v1, plain_binary, plain_i32, v1_levels};
    use crate::{Codec, PhysicalType, Repetition, SchemaNode};

    fn chunk(
        schema: &Schema,
        leaf: usize,
        num_values: u64,
        num_rows: usize,
        start_row: usize,
    ) -> ColumnChunkDescriptor {
        let l = &schema.leaves()[leaf];
        ColumnChunkDescriptor {
            source: 0,
            row_group: 0,
            byte_range: 0..0,
            codec: Codec::Uncompressed,
            physical_type: l.physical_type,
            max_def: l.max_def,
            max_rep: l.max_rep,
            num_values,
            num_rows,
            start_row,
            leaf,
        }
    }

    fn list_page(defs: &[u32], reps: &[u32], values: &[i32]) -> Vec<u8> {
        let mut body = v1_levels(reps, 1);
        body.extend(v1_levels(defs, 2));
        body.extend(plain_i32(values));
        data_page_v1(defs.len() as i32, PLAIN, &body)
    }

    fn prepare(
        schema: &Schema,
        chunks: &[ColumnChunkDescriptor],
        buffers: &[ByteBuffer],
        window: RowWindow,
    ) -> StrataResult<(PageTable, PageNesting, NodeSizes)> {
        let counts = count_page_headers(chunks, buffers)?;
        let mut table = decode_page_headers(chunks, buffers, &counts)?;
        for page in &mut table.pages {
            page.data = crate::page_header::PageData::Chunk(page.chunk_range());
        }
        let bodies = PageBodies {
            buffers,
            arena: &[],
        };
        compute_page_rows(&mut table, chunks, bodies)?;
        let mut nesting = PageNesting::try_new(table.len(), schema.max_depth(), &MemoryPool::unbounded())?;
        let dictionaries: Vec<Option<crate::dictionary::ChunkDictionary<'_>>> = (0..chunks.len()).map(|_| None).collect();
        size_pages(schema, chunks, &table, bodies, &dictionaries, window, &mut nesting)?;
        let sizes = compute_page_starts(schema, chunks, &table, window, &mut nesting)?;
        Ok((table, nesting, sizes))
    }

    fn list_schema() -> Schema {
        Schema::try_new(vec![SchemaNode::list(
            "l",
            Repetition::Optional,
            SchemaNode::primitive("element", Repetition::Optional, PhysicalType::Int32),
        )])
        .unwrap()
    }

    #[test]
    fn list_pages_are_sized_within_the_window() {
        let schema = list_schema();
        // rows: [1, 2], null | [], [3, null, 4]
        let mut bytes = list_page(&[3, 3, 0], &[0, 1, 0], &[1, 2]);
        bytes.extend(list_page(&[1, 3, 2, 3], &[0, 0, 1, 1], &[3, 4]));
        let chunks = vec![chunk(&schema, 0, 7, 4, 0)];
        let buffers = vec![ByteBuffer::from(bytes)];

        let (table, nesting, sizes) =
            prepare(&schema, &chunks, &buffers, RowWindow::new(1, 3)).unwrap();
        assert_eq!((table.pages[1].chunk_row, table.pages[1].num_rows), (2, 2));

        let first = nesting.page(0);
        assert_eq!((first[0].size, first[1].size), (1, 0));
        let second = nesting.page(1);
        assert_eq!((second[0].size, second[1].size), (2, 3));
        assert_eq!((second[0].page_start_value, second[1].page_start_value), (1, 0));

        let list = schema.leaves()[0].path[0];
        let element = schema.leaves()[0].path[1];
        assert_eq!(sizes.len[list], 3);
        assert_eq!(sizes.len[element], 3);
    }

    #[test]
    fn row_count_must_match_the_row_group() {
        let schema = list_schema();
        let bytes = list_page(&[3, 3], &[0, 1], &[1, 2]);
        let chunks = vec![chunk(&schema, 0, 2, 2, 0)];
        let buffers = vec![ByteBuffer::from(bytes)];
        let err = prepare(&schema, &chunks, &buffers, RowWindow::new(0, 2)).unwrap_err();
        assert_eq!(err.kind(), strata_error::ErrorKind::Format);
    }

    #[test]
    fn flat_byte_arrays_count_their_data() {
        let schema = Schema::try_new(vec![SchemaNode::primitive(
            "s",
            Repetition::Optional,
            PhysicalType::ByteArray,
        )])
        .unwrap();
        let mut body = v1_levels(&[1, 0, 1, 1], 1);
        body.extend(plain_binary(&[b"ab", b"cde", b"f"]));
        let bytes = data_page_v1(4, PLAIN, &body);
        let chunks = vec![chunk(&schema, 0, 4, 4, 10)];
        let buffers = vec![ByteBuffer::from(bytes)];

        let (_, nesting, sizes) =
            prepare(&schema, &chunks, &buffers, RowWindow::new(11, 3)).unwrap();
        let info = nesting.page(0)[0];
        assert_eq!((info.size, info.chars_size), (3, 4));
        assert_eq!(sizes.chars[schema.leaves()[0].path[0]], 4);
    }

    #[test]
    fn shared_struct_sizes_must_agree() {
        let schema = Schema::try_new(vec![SchemaNode::group(
            "p",
            Repetition::Required,
            crate::GroupAnnotation::None,
            vec![
                SchemaNode::primitive("x", Repetition::Required, PhysicalType::Int32),
                SchemaNode::primitive("y", Repetition::Required, PhysicalType::Int32),
            ],
        )])
        .unwrap();
        let x = data_page_v1(2, PLAIN, &plain_i32(&[1, 2]));
        let y = data_page_v1(3, PLAIN, &plain_i32(&[1, 2, 3]));
        let chunks = vec![chunk(&schema, 0, 2, 2, 0), chunk(&schema, 1, 3, 3, 0)];
        let buffers = vec![ByteBuffer::from(x), ByteBuffer::from(y)];
        let err = prepare(&schema, &chunks, &buffers, RowWindow::new(0, 3)).unwrap_err();
        assert_eq!(err.kind(), strata_error::ErrorKind::Format);
    }
}
