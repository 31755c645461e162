#![cfg(test)]

use std::sync::Arc;

use arrow_array::types::Int32Type;
use arrow_array::{
    ArrayRef, BinaryArray, BooleanArray, Float64Array, Int32Array, Int64Array, ListArray, RecordBatch,
    StringArray, StructArray,
};
use arrow_schema::{DataType, Field, Fields, Schema as ArrowSchema};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::{WriterProperties, WriterVersion};
use parquet::file::reader::{FileReader, SerializedFileReader};
use rstest::rstest;
use strata_error::ErrorKind;
use strata_io::{ReadAt, TokioFile};
use strata_metrics::StrataMetrics;
use strata_parquet::{
    Column, ColumnType, ParquetReader, PhysicalType, ReadMetadata, ReaderOptions, Table,
};

fn props() -> parquet::file::properties::WriterPropertiesBuilder {
    WriterProperties::builder()
        .set_max_row_group_size(300)
        .set_data_page_row_count_limit(40)
        .set_write_batch_size(40)
}

fn write(batch: &RecordBatch, props: WriterProperties) -> Bytes {
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props)).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
    Bytes::from(buf)
}

fn open(files: &[Bytes], options: ReaderOptions) -> ParquetReader {
    let metadata = files
        .iter()
        .map(|f| SerializedFileReader::new(f.clone()).unwrap().metadata().clone())
        .collect::<Vec<_>>();
    let sources = files
        .iter()
        .map(|f| Arc::new(f.clone()) as Arc<dyn ReadAt>)
        .collect();
    ParquetReader::try_new(
        sources,
        ReadMetadata::from_parquet(&metadata).unwrap(),
        options,
    )
    .unwrap()
}

fn batch(columns: Vec<(&str, ArrayRef, bool)>) -> RecordBatch {
    let fields = columns
        .iter()
        .map(|(name, array, nullable)| Field::new(*name, array.data_type().clone(), *nullable))
        .collect::<Vec<_>>();
    RecordBatch::try_new(
        Arc::new(ArrowSchema::new(fields)),
        columns.into_iter().map(|(_, a, _)| a).collect(),
    )
    .unwrap()
}

fn ints(column: &Column) -> Vec<Option<i32>> {
    let values = column.values::<i32>().unwrap();
    (0..column.len())
        .map(|i| column.is_valid(i).then(|| values.as_slice()[i]))
        .collect()
}

fn strings(column: &Column) -> Vec<Option<String>> {
    (0..column.len())
        .map(|i| {
            column
                .is_valid(i)
                .then(|| String::from_utf8(column.value_bytes(i).unwrap().to_vec()).unwrap())
        })
        .collect()
}

fn int_lists(column: &Column) -> Vec<Option<Vec<Option<i32>>>> {
    let offsets = column.offsets().unwrap().as_slice();
    let elements = ints(column.child().unwrap());
    (0..column.len())
        .map(|i| {
            column.is_valid(i).then(|| {
                elements[offsets[i] as usize..offsets[i + 1] as usize].to_vec()
            })
        })
        .collect()
}

/// Every column, recursively, has as many nulls as unset validity bits.
fn assert_null_counts(column: &Column) {
    let unset = match column.validity() {
        Some(_) => (0..column.len()).filter(|i| !column.is_valid(*i)).count(),
        None => 0,
    };
    assert_eq!(column.null_count(), unset, "{}", column.name());
    column.child().into_iter().for_each(assert_null_counts);
    column.children().iter().for_each(assert_null_counts);
}

fn nullable_ints(len: usize) -> Vec<Option<i32>> {
    (0..len as i32)
        .map(|i| (i % 7 != 3).then_some(i * 3))
        .collect()
}

#[test]
fn flat_values_across_pages_and_row_groups() {
    let expected = nullable_ints(1000);
    let file = write(
        &batch(vec![(
            "x",
            Arc::new(Int32Array::from(expected.clone())),
            true,
        )]),
        props().set_dictionary_enabled(false).build(),
    );
    let reader = open(&[file], ReaderOptions::default());

    let table = reader.read_blocking(123, Some(456), true, &[]).unwrap();
    assert_eq!(table.num_rows(), 456);
    assert_eq!(table.metadata.row_groups, vec![vec![0, 1]]);
    let x = table.column("x").unwrap();
    assert_eq!(ints(x), expected[123..579]);
    assert_null_counts(x);
}

#[test]
fn single_page_with_a_null() {
    let file = write(
        &batch(vec![(
            "x",
            Arc::new(Int32Array::from(vec![Some(1), Some(2), Some(3), None, Some(5)])),
            true,
        )]),
        WriterProperties::builder()
            .set_dictionary_enabled(false)
            .build(),
    );
    let table = open(&[file], ReaderOptions::default())
        .read_blocking(0, None, true, &[])
        .unwrap();
    let x = &table.columns[0];
    assert_eq!(x.null_count(), 1);
    assert_eq!(x.validity().unwrap().as_slice()[0], 0b10111);
    let values = x.values::<i32>().unwrap();
    assert_eq!(
        [0, 1, 2, 4].map(|i| values.as_slice()[i]),
        [1, 2, 3, 5]
    );
}

#[rstest]
#[case(Compression::UNCOMPRESSED)]
#[case(Compression::SNAPPY)]
#[case(Compression::GZIP(GzipLevel::default()))]
#[case(Compression::ZSTD(ZstdLevel::default()))]
#[case(Compression::LZ4_RAW)]
#[case(Compression::LZ4)]
fn codecs(#[case] compression: Compression) {
    let names = ["alpha", "beta", "gamma", "delta"];
    let expected_strings = (0..700)
        .map(|i| (i % 5 != 0).then(|| names[i % 4].to_string()))
        .collect::<Vec<_>>();
    let expected_longs = (0..700i64).map(|i| i * i).collect::<Vec<_>>();
    let file = write(
        &batch(vec![
            (
                "s",
                Arc::new(StringArray::from(expected_strings.clone())),
                true,
            ),
            ("l", Arc::new(Int64Array::from(expected_longs.clone())), false),
        ]),
        props().set_compression(compression).build(),
    );
    let metrics = StrataMetrics::default();
    let reader = open(&[file], ReaderOptions::default().with_metrics(metrics.clone()));

    let table = reader.read_blocking(250, Some(300), true, &[]).unwrap();
    assert_eq!(strings(&table.columns[0]), expected_strings[250..550]);
    let longs = table.columns[1].values::<i64>().unwrap();
    assert_eq!(longs.as_slice(), &expected_longs[250..550]);
    assert!(table.columns[1].validity().is_none());
    assert_null_counts(&table.columns[0]);

    let decompressed = metrics.counter("strata.pages.decompressed").count();
    if compression == Compression::UNCOMPRESSED {
        assert_eq!(decompressed, 0);
    } else {
        assert!(decompressed > 0);
    }
}

fn list_rows(len: usize) -> Vec<Option<Vec<Option<i32>>>> {
    (0..len as i32)
        .map(|i| match i % 6 {
            0 => None,
            1 => Some(Vec::new()),
            n => Some(
                (0..n + i % 3)
                    .map(|j| (j != 2).then_some(i * 10 + j))
                    .collect(),
            ),
        })
        .collect()
}

#[rstest]
#[case(WriterVersion::PARQUET_1_0)]
#[case(WriterVersion::PARQUET_2_0)]
fn lists_straddle_the_row_window(#[case] version: WriterVersion) {
    let expected = list_rows(500);
    let file = write(
        &batch(vec![(
            "l",
            Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(
                expected.clone(),
            )),
            true,
        )]),
        props()
            .set_writer_version(version)
            .set_data_page_row_count_limit(7)
            .set_write_batch_size(7)
            .build(),
    );
    let reader = open(&[file], ReaderOptions::default());

    let table = reader.read_blocking(37, Some(350), true, &[]).unwrap();
    let list = &table.columns[0];
    assert_eq!(list.len(), 350);
    assert_eq!(int_lists(list), expected[37..387]);

    let offsets = list.offsets().unwrap().as_slice();
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(offsets[350] as usize, list.child().unwrap().len());
    assert_null_counts(list);
}

#[test]
fn structs_share_their_validity() {
    let x = Int32Array::from((0..400).map(|i| (i % 3 != 0).then_some(i)).collect::<Vec<_>>());
    let y = StringArray::from((0..400).map(|i| Some(format!("y{i}"))).collect::<Vec<_>>());
    let fields = Fields::from(vec![
        Field::new("x", DataType::Int32, true),
        Field::new("y", DataType::Utf8, true),
    ]);
    let validity = (0..400).map(|i| i % 5 != 1).collect::<Vec<_>>();
    let array = StructArray::try_new(
        fields,
        vec![Arc::new(x) as ArrayRef, Arc::new(y) as ArrayRef],
        Some(validity.clone().into()),
    )
    .unwrap();
    let file = write(&batch(vec![("p", Arc::new(array), true)]), props().build());
    let reader = open(&[file], ReaderOptions::default());

    let table = reader.read_blocking(10, Some(200), true, &[]).unwrap();
    let p = &table.columns[0];
    assert_eq!(p.children().len(), 2);
    for i in 0..200 {
        let row = i + 10;
        assert_eq!(p.is_valid(i), validity[row]);
        let x = &p.children()[0];
        let y = &p.children()[1];
        let present = validity[row];
        assert_eq!(x.is_valid(i), present && row % 3 != 0);
        assert_eq!(y.is_valid(i), present);
        if present {
            assert_eq!(y.value_bytes(i).unwrap(), format!("y{row}").as_bytes());
        }
    }
    assert_null_counts(p);
}

#[rstest]
#[case(WriterVersion::PARQUET_1_0)]
#[case(WriterVersion::PARQUET_2_0)]
fn booleans_and_doubles(#[case] version: WriterVersion) {
    let flags = (0..333)
        .map(|i| (i % 4 != 0).then_some(i % 3 == 0))
        .collect::<Vec<_>>();
    let doubles = (0..333).map(|i| f64::from(i) / 4.0).collect::<Vec<_>>();
    let file = write(
        &batch(vec![
            ("b", Arc::new(BooleanArray::from(flags.clone())), true),
            ("d", Arc::new(Float64Array::from(doubles.clone())), false),
        ]),
        props().set_writer_version(version).build(),
    );
    let table = open(&[file], ReaderOptions::default())
        .read_blocking(0, None, false, &[])
        .unwrap();

    let b = &table.columns[0];
    let bytes = b.values::<u8>().unwrap();
    let decoded = (0..b.len())
        .map(|i| b.is_valid(i).then(|| bytes.as_slice()[i] == 1))
        .collect::<Vec<_>>();
    assert_eq!(decoded, flags);
    assert_eq!(table.columns[1].values::<f64>().unwrap().as_slice(), doubles.as_slice());
}

#[test]
fn dictionary_pages_of_a_v2_file() {
    let expected = nullable_ints(600)
        .into_iter()
        .map(|v| v.map(|v| v % 11))
        .collect::<Vec<_>>();
    let file = write(
        &batch(vec![("x", Arc::new(Int32Array::from(expected.clone())), true)]),
        props()
            .set_writer_version(WriterVersion::PARQUET_2_0)
            .set_compression(Compression::SNAPPY)
            .build(),
    );
    let table = open(&[file], ReaderOptions::default())
        .read_blocking(299, Some(2), true, &[])
        .unwrap();
    assert_eq!(ints(&table.columns[0]), expected[299..301]);
}

#[test]
fn rows_span_sources() {
    let first = (0..100).map(Some).collect::<Vec<_>>();
    let second = (100..200).map(Some).collect::<Vec<_>>();
    let files = [&first, &second].map(|values| {
        write(
            &batch(vec![("x", Arc::new(Int32Array::from(values.clone())), true)]),
            WriterProperties::builder().build(),
        )
    });
    let metrics = StrataMetrics::default();
    let reader = open(&files, ReaderOptions::default().with_metrics(metrics.clone()));

    let table = reader.read_blocking(0, Some(150), true, &[]).unwrap();
    assert_eq!(table.metadata.row_groups, vec![vec![0], vec![0]]);
    assert_eq!(
        ints(&table.columns[0]),
        (0..150).map(Some).collect::<Vec<_>>()
    );
    assert_eq!(metrics.counter("strata.fetch.requests").count(), 2);
}

#[test]
fn row_group_selection_per_source() {
    let values = (0..900).map(Some).collect::<Vec<_>>();
    let file = write(
        &batch(vec![("x", Arc::new(Int32Array::from(values)), true)]),
        props().build(),
    );
    let reader = open(&[file.clone(), file], ReaderOptions::default());

    let table = reader
        .read_blocking(0, None, false, &[vec![2], vec![1, 0]])
        .unwrap();
    let expected = (600..900).chain(300..600).chain(0..300).map(Some).collect::<Vec<_>>();
    assert_eq!(ints(&table.columns[0]), expected);

    // Without custom bounds the window is ignored.
    let table = reader.read_blocking(5, Some(5), false, &[vec![1], vec![]]).unwrap();
    assert_eq!(table.num_rows(), 300 + 900);
}

#[test]
fn zero_rows_keep_the_schema() {
    let file = write(
        &batch(vec![
            ("x", Arc::new(Int32Array::from(nullable_ints(50))), true),
            (
                "l",
                Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(list_rows(50))),
                true,
            ),
        ]),
        props().build(),
    );
    let metrics = StrataMetrics::default();
    let reader = open(&[file], ReaderOptions::default().with_metrics(metrics.clone()));

    let table = reader.read_blocking(0, Some(0), true, &[]).unwrap();
    assert_eq!(table.num_rows(), 0);
    assert_eq!(table.metadata.column_names, vec!["x", "l"]);
    for column in &table.columns {
        assert_eq!(column.len(), 0);
        assert_eq!(column.null_count(), 0);
    }
    let schema = reader.schema();
    for (column, root) in table.columns.iter().zip(schema.roots()) {
        assert_eq!(column.field(), strata_parquet::Field::from_node(schema, *root));
    }
    assert_eq!(table.columns[1].offsets().unwrap().as_slice(), &[0]);
    assert_eq!(metrics.counter("strata.pages.decoded").count(), 0);
    assert_eq!(metrics.counter("strata.fetch.requests").count(), 0);
}

fn columns_bytes(table: &Table) -> Vec<Vec<u8>> {
    fn collect(column: &Column, out: &mut Vec<Vec<u8>>) {
        if let Some(validity) = column.validity() {
            out.push(validity.as_slice().iter().flat_map(|w| w.to_le_bytes()).collect());
        }
        if let Some(offsets) = column.offsets() {
            out.push(offsets.as_slice().iter().flat_map(|o| o.to_le_bytes()).collect());
        }
        match column.data() {
            strata_parquet::ColumnData::Fixed { values, .. }
            | strata_parquet::ColumnData::Binary { data: values, .. } => {
                out.push(values.as_slice().to_vec());
            }
            _ => {}
        }
        column.child().into_iter().for_each(|c| collect(c, out));
        column.children().iter().for_each(|c| collect(c, out));
    }
    let mut out = Vec::new();
    table.columns.iter().for_each(|c| collect(c, &mut out));
    out
}

#[test]
fn reads_are_idempotent() {
    let file = write(
        &batch(vec![
            ("x", Arc::new(Int32Array::from(nullable_ints(800))), true),
            (
                "l",
                Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(list_rows(800))),
                true,
            ),
        ]),
        props().set_compression(Compression::SNAPPY).build(),
    );
    let reader = open(&[file], ReaderOptions::default());
    let first = reader.read_blocking(77, Some(555), true, &[]).unwrap();
    let second = reader.read_blocking(77, Some(555), true, &[]).unwrap();
    assert_eq!(columns_bytes(&first), columns_bytes(&second));
}

#[test]
fn projection_selects_top_level_columns() {
    let file = write(
        &batch(vec![
            ("x", Arc::new(Int32Array::from(nullable_ints(20))), true),
            ("y", Arc::new(Int64Array::from((0..20).collect::<Vec<i64>>())), false),
        ]),
        props().build(),
    );
    let reader = open(&[file], ReaderOptions::default().with_projection(["y"]));
    let table = reader.read_blocking(0, None, false, &[]).unwrap();
    assert_eq!(table.columns.len(), 1);
    assert_eq!(table.columns[0].name(), "y");
    assert_eq!(
        table.columns[0].values::<i64>().unwrap().as_slice(),
        (0..20).collect::<Vec<i64>>().as_slice()
    );
}

#[rstest]
#[case(false)]
#[case(true)]
fn text_and_binary_columns(#[case] binary_as_strings: bool) {
    let names = StringArray::from(vec![Some("ann"), None, Some("bo")]);
    let blobs = BinaryArray::from_opt_vec(vec![
        Some(b"\x00\x01".as_slice()),
        Some(b"hi".as_slice()),
        None,
    ]);
    let file = write(
        &batch(vec![
            ("name", Arc::new(names), true),
            ("blob", Arc::new(blobs), true),
        ]),
        props().build(),
    );
    let reader = open(
        &[file],
        ReaderOptions::default().with_binary_as_strings(binary_as_strings),
    );
    let table = reader.read_blocking(0, None, false, &[]).unwrap();

    let name = table.column("name").unwrap();
    assert_eq!(name.dtype(), ColumnType::String);
    assert_eq!(name.value_str(2), Some("bo"));
    assert_eq!(strings(name), vec![Some("ann".to_string()), None, Some("bo".to_string())]);

    let blob = table.column("blob").unwrap();
    let expected = if binary_as_strings {
        ColumnType::String
    } else {
        ColumnType::Primitive(PhysicalType::ByteArray)
    };
    assert_eq!(blob.dtype(), expected);
    assert_eq!(blob.value_bytes(0), Some(b"\x00\x01".as_slice()));
    assert_eq!(blob.value_str(1).is_some(), binary_as_strings);
    assert!(!blob.is_valid(2));
}

#[tokio::test]
async fn reads_from_a_local_file() {
    let values = nullable_ints(500);
    let bytes = write(
        &batch(vec![("x", Arc::new(Int32Array::from(values.clone())), true)]),
        props().set_compression(Compression::ZSTD(ZstdLevel::default())).build(),
    );
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.parquet");
    std::fs::write(&path, &bytes).unwrap();

    let metadata = SerializedFileReader::new(bytes).unwrap().metadata().clone();
    let reader = ParquetReader::try_new(
        vec![Arc::new(TokioFile::open(&path).unwrap()) as Arc<dyn ReadAt>],
        ReadMetadata::from_parquet(&[metadata]).unwrap(),
        ReaderOptions::default().with_max_in_flight_reads(2),
    )
    .unwrap();
    let table = reader.read(250, None, true, &[]).await.unwrap();
    assert_eq!(ints(&table.columns[0]), values[250..]);
}

#[test]
fn row_window_past_the_end() {
    let file = write(
        &batch(vec![("x", Arc::new(Int32Array::from(nullable_ints(100))), true)]),
        props().build(),
    );
    let reader = open(&[file], ReaderOptions::default());
    for (skip, num) in [(101, None), (50, Some(51))] {
        let err = reader.read_blocking(skip, num, true, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    let err = reader.read_blocking(0, None, true, &[vec![3]]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn memory_limit_is_an_allocation_error() {
    let file = write(
        &batch(vec![("x", Arc::new(Int32Array::from(nullable_ints(1000))), true)]),
        props().set_compression(Compression::SNAPPY).build(),
    );
    let reader = open(&[file], ReaderOptions::default().with_memory_limit(256));
    let err = reader.read_blocking(0, None, false, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
}

#[test]
fn unsupported_encodings_are_reported() {
    // Version 2 files fall back to DELTA_BINARY_PACKED for integers without a dictionary.
    let file = write(
        &batch(vec![("x", Arc::new(Int32Array::from(nullable_ints(100))), true)]),
        props()
            .set_writer_version(WriterVersion::PARQUET_2_0)
            .set_dictionary_enabled(false)
            .build(),
    );
    let err = open(&[file], ReaderOptions::default())
        .read_blocking(0, None, false, &[])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[test]
fn value_counts_must_match_the_metadata() {
    let file = write(
        &batch(vec![("x", Arc::new(Int32Array::from(nullable_ints(100))), true)]),
        props().build(),
    );
    let parsed = SerializedFileReader::new(file.clone())
        .unwrap()
        .metadata()
        .clone();
    let metadata = ReadMetadata::from_parquet(&[parsed]).unwrap();
    let mut sources = metadata.sources().to_vec();
    sources[0].row_groups[0].columns[0].num_values += 1;
    let metadata = ReadMetadata::try_new(metadata.schema().clone(), sources).unwrap();

    let reader = ParquetReader::try_new(
        vec![Arc::new(file) as Arc<dyn ReadAt>],
        metadata,
        ReaderOptions::default(),
    )
    .unwrap();
    let err = reader.read_blocking(0, None, false, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(err.to_string().contains("column chunk 0"));
}
