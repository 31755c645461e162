use std::ops::Range;

use strata_error::{StrataResult, strata_bail};

use crate::{Codec, Schema};

/// Footer information of every source of a read, already parsed by the caller.
#[derive(Debug, Clone)]
pub struct ReadMetadata {
    schema: Schema,
    sources: Vec<SourceMetadata>,
}

/// The row groups of one source.
#[derive(Debug, Clone, Default)]
pub struct SourceMetadata {
    pub row_groups: Vec<RowGroupMetadata>,
}

#[derive(Debug, Clone)]
pub struct RowGroupMetadata {
    pub num_rows: usize,
    /// One chunk per leaf of the file schema, in schema order.
    pub columns: Vec<ColumnChunkMetadata>,
}

#[derive(Debug, Clone)]
pub struct ColumnChunkMetadata {
    /// Bytes of the chunk within its source, from the first page header to the end of the last
    /// page.
    pub byte_range: Range<u64>,
    pub codec: Codec,
    /// Number of level entries in the chunk, including nulls and list entries.
    pub num_values: u64,
}

impl ReadMetadata {
    pub fn try_new(schema: Schema, sources: Vec<SourceMetadata>) -> StrataResult<Self> {
        for (source_idx, source) in sources.iter().enumerate() {
            for (rg_idx, rg) in source.row_groups.iter().enumerate() {
                if rg.columns.len() != schema.num_file_leaves() {
                    strata_bail!(
                        InvalidArgument: "row group {rg_idx} of source {source_idx} has {} column chunks, the schema has {} leaves",
                        rg.columns.len(),
                        schema.num_file_leaves()
                    );
                }
                for chunk in &rg.columns {
                    if chunk.byte_range.start > chunk.byte_range.end {
                        strata_bail!(
                            InvalidArgument: "row group {rg_idx} of source {source_idx} has an inverted chunk range {:?}",
                            chunk.byte_range
                        );
                    }
                }
            }
        }
        Ok(Self { schema, sources })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn sources(&self) -> &[SourceMetadata] {
        &self.sources
    }

    /// Replace the schema with a projection of it.
    pub fn with_projection<S: AsRef<str>>(mut self, names: &[S]) -> StrataResult<Self> {
        self.schema = self.schema.project(names)?;
        Ok(self)
    }

    /// Present byte array columns without a text annotation as strings too.
    pub fn with_binary_as_strings(mut self) -> Self {
        self.schema = self.schema.with_binary_as_strings();
        self
    }
}

#[cfg(feature = "parquet")]
mod parquet_adapter {
    use parquet::basic::{
        Compression, ConvertedType, LogicalType, Repetition as ParquetRepetition, Type,
    };
    use parquet::file::metadata::ParquetMetaData;
    use parquet::schema::types::Type as SchemaType;
    use strata_error::{StrataResult, strata_bail, strata_err};

    use super::*;
    use crate::{GroupAnnotation, PhysicalType, Repetition, SchemaNode};

    impl ReadMetadata {
        /// Build the read metadata from footers parsed by the `parquet` crate, one per source.
        ///
        /// Every source must share the schema of the first one.
        pub fn from_parquet(files: &[ParquetMetaData]) -> StrataResult<Self> {
            let Some(first) = files.first() else {
                strata_bail!("at least one source is required");
            };
            let root = first.file_metadata().schema_descr().root_schema();
            let fields = root
                .get_fields()
                .iter()
                .map(|f| schema_node(f))
                .collect::<StrataResult<Vec<_>>>()?;
            let schema = Schema::try_new(fields)?;

            let sources = files
                .iter()
                .enumerate()
                .map(|(idx, file)| {
                    if file.file_metadata().schema_descr().root_schema() != root {
                        strata_bail!("source {idx} has a different schema than source 0");
                    }
                    let row_groups = file
                        .row_groups()
                        .iter()
                        .map(|rg| {
                            let columns = rg
                                .columns()
                                .iter()
                                .map(|c| {
                                    let (start, len) = c.byte_range();
                                    Ok(ColumnChunkMetadata {
                                        byte_range: start..start + len,
                                        codec: codec(c.compression())?,
                                        num_values: u64::try_from(c.num_values()).map_err(
                                            |_| strata_err!(InvalidSerde: "negative value count"),
                                        )?,
                                    })
                                })
                                .collect::<StrataResult<Vec<_>>>()?;
                            Ok(RowGroupMetadata {
                                num_rows: usize::try_from(rg.num_rows()).map_err(|_| {
                                    strata_err!(InvalidSerde: "negative row count")
                                })?,
                                columns,
                            })
                        })
                        .collect::<StrataResult<Vec<_>>>()?;
                    Ok(SourceMetadata { row_groups })
                })
                .collect::<StrataResult<Vec<_>>>()?;

            Self::try_new(schema, sources)
        }
    }

    fn codec(compression: Compression) -> StrataResult<Codec> {
        Ok(match compression {
            Compression::UNCOMPRESSED => Codec::Uncompressed,
            Compression::SNAPPY => Codec::Snappy,
            Compression::GZIP(_) => Codec::Gzip,
            Compression::LZO => Codec::Lzo,
            Compression::BROTLI(_) => Codec::Brotli,
            Compression::LZ4 => Codec::Lz4,
            Compression::ZSTD(_) => Codec::Zstd,
            Compression::LZ4_RAW => Codec::Lz4Raw,
        })
    }

    fn repetition(node: &SchemaType) -> Repetition {
        let info = node.get_basic_info();
        if !info.has_repetition() {
            return Repetition::Required;
        }
        match info.repetition() {
            ParquetRepetition::REQUIRED => Repetition::Required,
            ParquetRepetition::OPTIONAL => Repetition::Optional,
            ParquetRepetition::REPEATED => Repetition::Repeated,
        }
    }

    fn schema_node(node: &SchemaType) -> StrataResult<SchemaNode> {
        let name = node.name();
        match node {
            SchemaType::PrimitiveType {
                physical_type,
                type_length,
                ..
            } => {
                let physical_type = match physical_type {
                    Type::BOOLEAN => PhysicalType::Boolean,
                    Type::INT32 => PhysicalType::Int32,
                    Type::INT64 => PhysicalType::Int64,
                    Type::INT96 => PhysicalType::Int96,
                    Type::FLOAT => PhysicalType::Float,
                    Type::DOUBLE => PhysicalType::Double,
                    Type::BYTE_ARRAY => PhysicalType::ByteArray,
                    Type::FIXED_LEN_BYTE_ARRAY => {
                        PhysicalType::FixedLenByteArray(usize::try_from(*type_length).map_err(
                            |_| strata_err!(InvalidSerde: "column {name:?} has a negative width"),
                        )?)
                    }
                };
                let info = node.get_basic_info();
                let text = matches!(
                    info.logical_type(),
                    Some(LogicalType::String | LogicalType::Enum | LogicalType::Json)
                ) || matches!(
                    info.converted_type(),
                    ConvertedType::UTF8 | ConvertedType::ENUM | ConvertedType::JSON
                );
                Ok(if text && physical_type == PhysicalType::ByteArray {
                    SchemaNode::string(name, repetition(node))
                } else {
                    SchemaNode::primitive(name, repetition(node), physical_type)
                })
            }
            SchemaType::GroupType { fields, .. } => {
                let info = node.get_basic_info();
                let annotation = match (info.logical_type(), info.converted_type()) {
                    (Some(LogicalType::List), _) | (_, ConvertedType::LIST) => GroupAnnotation::List,
                    (Some(LogicalType::Map), _)
                    | (_, ConvertedType::MAP | ConvertedType::MAP_KEY_VALUE) => {
                        GroupAnnotation::Map
                    }
                    _ => GroupAnnotation::None,
                };
                let children = fields
                    .iter()
                    .map(|f| schema_node(f))
                    .collect::<StrataResult<Vec<_>>>()?;
                Ok(SchemaNode::group(name, repetition(node), annotation, children))
            }
        }
    }
}
