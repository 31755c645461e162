//! Output buffers of a read and their page-disjoint views.

use std::sync::atomic::{AtomicU32, Ordering};

use strata_buffer::{Alignment, Buffer, MemoryPool, PooledBuffer, Reservation};
use strata_error::{StrataResult, strata_bail};
use strata_io::ALIGNMENT;

use crate::chunk::ColumnChunkDescriptor;
use crate::column::{Column, ColumnData};
use crate::nesting::PageNesting;
use crate::page_header::PageTable;
use crate::schema::{NodeKind, PrimitiveAnnotation, Schema};
use crate::PhysicalType;

/// A validity bitmap that pages set bits of concurrently.
#[derive(Debug)]
pub(crate) struct AtomicBitmap {
    words: Vec<AtomicU32>,
    _reservation: Reservation,
}

impl AtomicBitmap {
    fn try_new(len: usize, pool: &MemoryPool) -> StrataResult<Self> {
        let num_words = len.div_ceil(32);
        let reservation = pool.reserve(num_words * size_of::<u32>())?;
        Ok(Self {
            words: (0..num_words).map(|_| AtomicU32::new(0)).collect(),
            _reservation: reservation,
        })
    }

    #[inline]
    pub fn set(&self, idx: usize) {
        self.words[idx / 32].fetch_or(1 << (idx % 32), Ordering::Relaxed);
    }

    fn finish(self) -> (Buffer<u32>, usize) {
        let words = self
            .words
            .into_iter()
            .map(AtomicU32::into_inner)
            .collect::<Buffer<u32>>();
        let set = words.iter().map(|w| w.count_ones() as usize).sum();
        (words, set)
    }
}

/// The buffers of one output node.
#[derive(Debug, Default)]
struct NodeBuffers {
    len: usize,
    validity: Option<AtomicBitmap>,
    /// List offsets, or byte array offsets of a leaf. One longer than `len`.
    offsets: Option<PooledBuffer<i32>>,
    /// Fixed-width leaf values, or the data of a byte array leaf.
    values: Option<PooledBuffer<u8>>,
}

/// The output of one node at one depth of a page, in page-local indices.
#[derive(Debug, Default)]
pub(crate) struct DepthTarget<'a> {
    pub validity: Option<&'a AtomicBitmap>,
    pub offsets: Option<&'a mut [i32]>,
    pub values: Option<&'a mut [u8]>,
}

/// Everything one page writes, one target per depth of its column.
#[derive(Debug, Default)]
pub(crate) struct PageTargets<'a> {
    pub depths: Vec<DepthTarget<'a>>,
}

/// Entries and byte-array data sizes of every output node.
#[derive(Debug, Clone)]
pub(crate) struct NodeSizes {
    pub len: Vec<usize>,
    pub chars: Vec<usize>,
}

/// Output buffers for every node of the schema, accounted against the read's memory pool.
#[derive(Debug)]
pub(crate) struct OutputBuffers {
    nodes: Vec<NodeBuffers>,
}

fn offsets_limit(len: usize, what: &str, name: &str) -> StrataResult<()> {
    if i32::try_from(len).is_err() {
        strata_bail!(
            "column {name:?} needs {len} {what}, more than 32-bit offsets can address; read fewer rows"
        );
    }
    Ok(())
}

impl OutputBuffers {
    pub fn try_new(schema: &Schema, sizes: &NodeSizes, pool: &MemoryPool) -> StrataResult<Self> {
        let alignment = Alignment::new(ALIGNMENT);
        let nodes = schema
            .nodes()
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                let len = sizes.len[idx];
                let validity = node
                    .nullable
                    .then(|| AtomicBitmap::try_new(len, pool))
                    .transpose()?;
                let (offsets, values) = match node.kind {
                    NodeKind::Struct => (None, None),
                    NodeKind::List => {
                        offsets_limit(sizes.len[node.children[0]], "child entries", &node.name)?;
                        (Some(pool.alloc_zeroed_aligned::<i32>(len + 1, alignment)?), None)
                    }
                    NodeKind::Leaf(PhysicalType::ByteArray) => {
                        offsets_limit(sizes.chars[idx], "bytes", &node.name)?;
                        (
                            Some(pool.alloc_zeroed_aligned::<i32>(len + 1, alignment)?),
                            Some(pool.alloc_zeroed_aligned::<u8>(sizes.chars[idx], alignment)?),
                        )
                    }
                    NodeKind::Leaf(physical_type) => {
                        let width = physical_type.fixed_width().unwrap_or_default();
                        (
                            None,
                            Some(pool.alloc_zeroed_aligned::<u8>(len * width, alignment)?),
                        )
                    }
                };
                Ok(NodeBuffers {
                    len,
                    validity,
                    offsets,
                    values,
                })
            })
            .collect::<StrataResult<Vec<_>>>()?;
        log::debug!(
            "allocated output for {} nodes, {} bytes reserved",
            schema.nodes().len(),
            pool.used()
        );
        Ok(Self { nodes })
    }

    /// Split the buffers into the disjoint views written by each page.
    ///
    /// A node's entries are laid out in the order of its owning column's pages, so handing out
    /// consecutive slices in page order gives every page exactly its own range.
    pub fn page_targets<'a>(
        &'a mut self,
        schema: &Schema,
        chunks: &[ColumnChunkDescriptor],
        table: &PageTable,
        nesting: &PageNesting,
    ) -> StrataResult<Vec<PageTargets<'a>>> {
        struct Remaining<'a> {
            validity: Option<&'a AtomicBitmap>,
            offsets: &'a mut [i32],
            values: &'a mut [u8],
            next: usize,
        }

        let mut remaining = self
            .nodes
            .iter_mut()
            .map(|node| {
                let len = node.len;
                Remaining {
                    validity: node.validity.as_ref(),
                    offsets: node
                        .offsets
                        .as_mut()
                        .map(|o| &mut o.as_mut_slice()[..len])
                        .unwrap_or_default(),
                    values: node
                        .values
                        .as_mut()
                        .map(PooledBuffer::as_mut_slice)
                        .unwrap_or_default(),
                    next: 0,
                }
            })
            .collect::<Vec<_>>();

        let mut targets = Vec::with_capacity(table.len());
        for (page_idx, page) in table.pages.iter().enumerate() {
            if page.is_dictionary() {
                targets.push(PageTargets::default());
                continue;
            }
            let leaf_idx = chunks[page.chunk].leaf;
            let leaf = &schema.leaves()[leaf_idx];
            let infos = nesting.page(page_idx);
            let mut depths = Vec::with_capacity(leaf.depth());
            for (d, node_idx) in leaf.path.iter().enumerate() {
                let node = schema.node(*node_idx);
                if node.owner != leaf_idx {
                    depths.push(DepthTarget::default());
                    continue;
                }
                let info = &infos[d];
                let rem = &mut remaining[*node_idx];
                if rem.next != info.page_start_value {
                    strata_bail!(
                        AssertionFailed: "page {page_idx} starts at entry {} of {:?}, expected {}",
                        info.page_start_value,
                        node.name,
                        rem.next
                    );
                }
                rem.next += info.size;

                let offsets = match node.kind {
                    NodeKind::List | NodeKind::Leaf(PhysicalType::ByteArray) => {
                        let (head, tail) = std::mem::take(&mut rem.offsets).split_at_mut(info.size);
                        rem.offsets = tail;
                        Some(head)
                    }
                    _ => None,
                };
                let values = match node.kind {
                    NodeKind::Leaf(PhysicalType::ByteArray) => {
                        let (head, tail) =
                            std::mem::take(&mut rem.values).split_at_mut(info.chars_size);
                        rem.values = tail;
                        Some(head)
                    }
                    NodeKind::Leaf(physical_type) => {
                        let width = physical_type.fixed_width().unwrap_or_default();
                        let (head, tail) =
                            std::mem::take(&mut rem.values).split_at_mut(info.size * width);
                        rem.values = tail;
                        Some(head)
                    }
                    _ => None,
                };
                depths.push(DepthTarget {
                    validity: rem.validity,
                    offsets,
                    values,
                });
            }
            targets.push(PageTargets { depths });
        }
        Ok(targets)
    }

    /// Write the closing offsets and assemble the column tree.
    pub fn finish(self, schema: &Schema, sizes: &NodeSizes) -> StrataResult<Vec<Column>> {
        let mut nodes = self.nodes.into_iter().map(Some).collect::<Vec<_>>();
        schema
            .roots()
            .iter()
            .map(|root| build_column(schema, sizes, &mut nodes, *root))
            .collect()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn build_column(
    schema: &Schema,
    sizes: &NodeSizes,
    nodes: &mut [Option<NodeBuffers>],
    idx: usize,
) -> StrataResult<Column> {
    let node = schema.node(idx);
    let Some(buffers) = nodes[idx].take() else {
        strata_bail!(AssertionFailed: "node {:?} assembled twice", node.name);
    };
    let len = buffers.len;
    let (validity, null_count) = match buffers.validity {
        Some(bitmap) => {
            let (words, valid) = bitmap.finish();
            (Some(words), len - valid)
        }
        None => (None, 0),
    };

    // Sizes were checked to fit in an i32 when the buffers were allocated.
    let close_offsets = |offsets: Option<PooledBuffer<i32>>, end: usize| {
        offsets.map(|o| {
            let (mut o, _reservation) = o.into_parts();
            o.as_mut_slice()[len] = end as i32;
            o.freeze()
        })
    };

    let data = match node.kind {
        NodeKind::Struct => ColumnData::Struct {
            children: node
                .children
                .iter()
                .map(|c| build_column(schema, sizes, nodes, *c))
                .collect::<StrataResult<Vec<_>>>()?,
        },
        NodeKind::List => {
            let child_idx = node.children[0];
            let offsets = close_offsets(buffers.offsets, sizes.len[child_idx]).unwrap_or_default();
            ColumnData::List {
                offsets,
                child: Box::new(build_column(schema, sizes, nodes, child_idx)?),
            }
        }
        NodeKind::Leaf(PhysicalType::ByteArray) => ColumnData::Binary {
            offsets: close_offsets(buffers.offsets, sizes.chars[idx]).unwrap_or_default(),
            data: buffers
                .values
                .map(|v| v.into_parts().0.freeze())
                .unwrap_or_default(),
            string: node.annotation == PrimitiveAnnotation::String,
        },
        NodeKind::Leaf(physical_type) => ColumnData::Fixed {
            physical_type,
            values: buffers
                .values
                .map(|v| v.into_parts().0.freeze())
                .unwrap_or_default(),
        },
    };

    Ok(Column {
        name: node.name.clone(),
        nullable: node.nullable,
        len,
        validity,
        null_count,
        data,
    })
}
