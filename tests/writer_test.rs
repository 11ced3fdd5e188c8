//! End-to-end tests for the rotating partitioned writer.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Int64Array, StringArray};
use futures::{stream, StreamExt};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::TempDir;

use graupel::{
    EncodeError, GenericWriterBuilder, PartitionError, PostWriteContext, Record, RecordEncoder,
    SchemaDef, SchemaError, SchemaResolver, TypedWriterBuilder, Value, WriteError, WriterOptions,
};

fn id_color_schema() -> SchemaDef {
    SchemaDef::group(vec![
        ("id".into(), SchemaDef::int64()),
        ("color".into(), SchemaDef::string()),
    ])
}

fn id_color_record(id: i64, color: &str) -> Record {
    Record::new()
        .with_field("id", Value::Int64(id))
        .with_field("color", Value::string(color))
}

/// All parquet files below `dir`, sorted by path.
fn parquet_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        if !current.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "parquet") {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

fn field_names(path: &Path) -> Vec<String> {
    let file = File::open(path).unwrap();
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
    builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect()
}

/// The `id` column of one file, in row order.
fn read_ids(path: &Path) -> Vec<i64> {
    let file = File::open(path).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap();
    let mut ids = Vec::new();
    for batch in reader {
        let batch = batch.unwrap();
        let column = batch
            .column_by_name("id")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        ids.extend(column.iter().map(|v| v.unwrap()));
    }
    ids
}

/// Recover `field=value` partition pairs from a file's path below `base`.
fn partition_values(base: &Path, file: &Path) -> Vec<(String, String)> {
    file.parent()
        .unwrap()
        .strip_prefix(base)
        .unwrap()
        .components()
        .map(|c| {
            let segment = c.as_os_str().to_string_lossy();
            let (field, value) = segment.split_once('=').unwrap();
            (field.to_string(), value.to_string())
        })
        .collect()
}

mod partitioning {
    use super::*;

    #[tokio::test]
    async fn test_records_are_split_by_partition_column() {
        let temp = TempDir::new().unwrap();
        let records = vec![
            id_color_record(1, "red"),
            id_color_record(2, "red"),
            id_color_record(3, "blue"),
        ];

        let summary = GenericWriterBuilder::new(temp.path(), id_color_schema())
            .partition_by(["color"])
            .max_count(1000)
            .build()
            .unwrap()
            .write_all(stream::iter(records))
            .await
            .unwrap();

        assert_eq!(summary.records_processed, 3);
        assert_eq!(summary.files_written, 2);

        let red = parquet_files(&temp.path().join("color=red"));
        assert_eq!(red.len(), 1);
        assert_eq!(read_ids(&red[0]), vec![1, 2]);

        let blue = parquet_files(&temp.path().join("color=blue"));
        assert_eq!(blue.len(), 1);
        assert_eq!(read_ids(&blue[0]), vec![3]);

        // partition fields are stripped from the file schema
        assert_eq!(field_names(&red[0]), vec!["id"]);
    }

    #[tokio::test]
    async fn test_nested_partition_columns() {
        let temp = TempDir::new().unwrap();
        let schema = SchemaDef::group(vec![
            ("id".into(), SchemaDef::int64()),
            (
                "user".into(),
                SchemaDef::group(vec![(
                    "address".into(),
                    SchemaDef::group(vec![("postcode".into(), SchemaDef::string())]),
                )]),
            ),
            ("color".into(), SchemaDef::string()),
        ]);
        let record = Record::new()
            .with_field("id", Value::Int64(1))
            .with_field(
                "user",
                Value::Group(Record::new().with_field(
                    "address",
                    Value::Group(Record::new().with_field("postcode", Value::string("XY"))),
                )),
            )
            .with_field("color", Value::string("red"));

        GenericWriterBuilder::new(temp.path(), schema)
            .partition_by(["color", "user.address.postcode"])
            .build()
            .unwrap()
            .write_all(stream::iter(vec![record]))
            .await
            .unwrap();

        let dir = temp.path().join("color=red/user.address.postcode=XY");
        let files = parquet_files(&dir);
        assert_eq!(files.len(), 1);

        // the emptied user/address groups are dropped along with the leaves
        assert_eq!(field_names(&files[0]), vec!["id"]);
        assert_eq!(read_ids(&files[0]), vec![1]);
    }

    #[tokio::test]
    async fn test_null_partition_field_fails_without_output() {
        let temp = TempDir::new().unwrap();
        let record = Record::new()
            .with_field("id", Value::Int64(1))
            .with_field("color", Value::Null);

        let err = GenericWriterBuilder::new(temp.path(), id_color_schema())
            .partition_by(["color"])
            .build()
            .unwrap()
            .write_all(stream::iter(vec![record]))
            .await
            .unwrap_err();

        let WriteError::Partition { source } = err else {
            panic!("expected partition error, got {err:?}");
        };
        assert_eq!(source.to_string(), "null field 'color'");
        assert!(matches!(source, PartitionError::NullField { .. }));
        assert!(parquet_files(temp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_recovers_partition_values() {
        let temp = TempDir::new().unwrap();
        let records: Vec<Record> = (0..20)
            .map(|i| id_color_record(i, if i % 3 == 0 { "red" } else { "blue" }))
            .collect();

        GenericWriterBuilder::new(temp.path(), id_color_schema())
            .partition_by(["color"])
            .max_count(4)
            .build()
            .unwrap()
            .write_all(stream::iter(records.clone()))
            .await
            .unwrap();

        let mut recovered: Vec<Record> = Vec::new();
        for file in parquet_files(temp.path()) {
            let partitions = partition_values(temp.path(), &file);
            for id in read_ids(&file) {
                let mut record = Record::new().with_field("id", Value::Int64(id));
                for (field, value) in &partitions {
                    record.insert(field.clone(), Value::string(value.clone()));
                }
                recovered.push(record);
            }
        }

        assert_eq!(recovered.len(), records.len());
        for record in &records {
            assert!(recovered.contains(record), "missing {record:?}");
        }
    }
}

mod rotation {
    use super::*;

    #[tokio::test]
    async fn test_max_count_rotates_files_in_input_order() {
        let temp = TempDir::new().unwrap();
        let records: Vec<Record> =
            (1..=5).map(|i| Record::new().with_field("id", Value::Int64(i))).collect();

        let summary = GenericWriterBuilder::new(
            temp.path(),
            SchemaDef::group(vec![("id".into(), SchemaDef::int64())]),
        )
        .max_count(2)
        .build()
        .unwrap()
        .write_all(stream::iter(records))
        .await
        .unwrap();

        assert_eq!(summary.files_written, 3);

        let files = parquet_files(temp.path());
        assert_eq!(files.len(), 3);

        let contents: Vec<Vec<i64>> = files.iter().map(|f| read_ids(f)).collect();
        for expected in [vec![1, 2], vec![3, 4], vec![5]] {
            assert!(contents.contains(&expected), "missing file {expected:?}");
        }
    }

    #[tokio::test]
    async fn test_max_count_one_writes_one_file_per_record() {
        let temp = TempDir::new().unwrap();
        let records: Vec<Record> =
            (1..=4).map(|i| Record::new().with_field("id", Value::Int64(i))).collect();

        let summary = GenericWriterBuilder::new(
            temp.path(),
            SchemaDef::group(vec![("id".into(), SchemaDef::int64())]),
        )
        .max_count(1)
        .build()
        .unwrap()
        .write_all(stream::iter(records))
        .await
        .unwrap();

        assert_eq!(summary.files_written, 4);
        let files = parquet_files(temp.path());
        assert_eq!(files.len(), 4);
        for file in &files {
            assert_eq!(read_ids(file).len(), 1);
        }
    }

    #[tokio::test]
    async fn test_max_duration_rotates_slow_streams() {
        let temp = TempDir::new().unwrap();
        let records = (1..=10).map(|i| Record::new().with_field("id", Value::Int64(i)));
        let trickled = stream::iter(records).then(|record| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            record
        });

        let summary = GenericWriterBuilder::new(
            temp.path(),
            SchemaDef::group(vec![("id".into(), SchemaDef::int64())]),
        )
        .max_count(1_000_000)
        .max_duration(Duration::from_millis(50))
        .build()
        .unwrap()
        .write_all(trickled)
        .await
        .unwrap();

        assert_eq!(summary.records_processed, 10);
        let files = parquet_files(temp.path());
        assert!(files.len() >= 2, "expected timer rotations, got {files:?}");

        let total: usize = files.iter().map(|f| read_ids(f).len()).sum();
        assert_eq!(total, 10);
    }

    #[tokio::test]
    async fn test_post_write_handler_flushes_every_chunk() {
        let temp = TempDir::new().unwrap();
        let records: Vec<Record> =
            (1..=6).map(|i| Record::new().with_field("id", Value::Int64(i))).collect();
        let chunks_seen = Arc::new(AtomicUsize::new(0));
        let counter = chunks_seen.clone();

        GenericWriterBuilder::new(
            temp.path(),
            SchemaDef::group(vec![("id".into(), SchemaDef::int64())]),
        )
        .chunk_size(2)
        .post_write_handler(move |ctx: &PostWriteContext<'_, Record>| {
            if !ctx.processed().is_empty() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            for partition in ctx.partitions().keys() {
                ctx.flush(partition.clone());
            }
            Ok(())
        })
        .build()
        .unwrap()
        .write_all(stream::iter(records))
        .await
        .unwrap();

        let files = parquet_files(temp.path());
        // a new file per processed chunk, even though max_count/max_duration
        // never trigger
        assert_eq!(files.len(), chunks_seen.load(Ordering::SeqCst));
        assert!(files.len() >= 3);

        let total: usize = files.iter().map(|f| read_ids(f).len()).sum();
        assert_eq!(total, 6);
        for file in &files {
            assert!(read_ids(file).len() <= 2);
        }
    }

    #[tokio::test]
    async fn test_handler_error_terminates_the_stream() {
        let temp = TempDir::new().unwrap();
        let records = vec![Record::new().with_field("id", Value::Int64(1))];

        let err = GenericWriterBuilder::new(
            temp.path(),
            SchemaDef::group(vec![("id".into(), SchemaDef::int64())]),
        )
        .post_write_handler(|_: &PostWriteContext<'_, Record>| Err("handler refused".into()))
        .build()
        .unwrap()
        .write_all(stream::iter(records))
        .await
        .unwrap_err();

        assert!(matches!(err, WriteError::Handler { .. }));
    }
}

mod boundaries {
    use super::*;

    #[tokio::test]
    async fn test_empty_input_creates_no_files() {
        let temp = TempDir::new().unwrap();

        let summary = GenericWriterBuilder::new(temp.path(), id_color_schema())
            .build()
            .unwrap()
            .write_all(stream::iter(Vec::<Record>::new()))
            .await
            .unwrap();

        assert_eq!(summary.records_processed, 0);
        assert_eq!(summary.files_written, 0);
        assert!(parquet_files(temp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_single_record_without_partitions() {
        let temp = TempDir::new().unwrap();

        let summary = GenericWriterBuilder::new(temp.path(), id_color_schema())
            .build()
            .unwrap()
            .write_all(stream::iter(vec![id_color_record(7, "red")]))
            .await
            .unwrap();

        assert_eq!(summary.files_written, 1);
        let files = parquet_files(temp.path());
        assert_eq!(files.len(), 1);
        assert_eq!(read_ids(&files[0]), vec![7]);
        // without partition_by the full schema is kept
        assert_eq!(field_names(&files[0]), vec!["id", "color"]);
    }

    #[tokio::test]
    async fn test_uncompressed_files_have_plain_names() {
        let temp = TempDir::new().unwrap();

        GenericWriterBuilder::new(temp.path(), id_color_schema())
            .options(WriterOptions::default().with_compression(graupel::Compression::Uncompressed))
            .build()
            .unwrap()
            .write_all(stream::iter(vec![id_color_record(1, "red")]))
            .await
            .unwrap();

        let files = parquet_files(temp.path());
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with(".parquet"));
        assert!(!name.contains(".snappy"));
    }
}

mod pipe {
    use super::*;

    #[tokio::test]
    async fn test_pipe_re_emits_source_records_in_order() {
        let temp = TempDir::new().unwrap();
        let records: Vec<Record> = (1..=5).map(|i| id_color_record(i, "red")).collect();

        let writer = GenericWriterBuilder::new(temp.path(), id_color_schema())
            .partition_by(["color"])
            .build()
            .unwrap();

        let emitted: Vec<Result<Record, WriteError>> =
            writer.pipe(stream::iter(records.clone())).collect().await;

        let emitted: Vec<Record> = emitted.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(emitted, records);
        assert_eq!(parquet_files(temp.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_pipe_surfaces_the_terminal_error() {
        let temp = TempDir::new().unwrap();
        let records = vec![Record::new()
            .with_field("id", Value::Int64(1))
            .with_field("color", Value::Null)];

        let writer = GenericWriterBuilder::new(temp.path(), id_color_schema())
            .partition_by(["color"])
            .build()
            .unwrap();

        let emitted: Vec<Result<Record, WriteError>> =
            writer.pipe(stream::iter(records)).collect().await;

        assert_eq!(emitted.len(), 1);
        assert!(matches!(
            emitted[0],
            Err(WriteError::Partition { .. })
        ));
    }

    #[tokio::test]
    async fn test_pipe_with_handler_flush_keeps_emission_order() {
        let temp = TempDir::new().unwrap();
        let records: Vec<Record> = (1..=6).map(|i| id_color_record(i, "red")).collect();

        let writer = GenericWriterBuilder::new(temp.path(), id_color_schema())
            .chunk_size(2)
            .partition_by(["color"])
            .post_write_handler(|ctx: &PostWriteContext<'_, Record>| {
                for partition in ctx.partitions().keys() {
                    ctx.flush(partition.clone());
                }
                Ok(())
            })
            .build()
            .unwrap();

        let emitted: Vec<Result<Record, WriteError>> =
            writer.pipe(stream::iter(records.clone())).collect().await;

        let emitted: Vec<Record> = emitted.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(emitted, records);

        // handler-driven flushes still produce a file per chunk
        let files = parquet_files(&temp.path().join("color=red"));
        assert!(files.len() >= 3);
        let total: usize = files.iter().map(|f| read_ids(f).len()).sum();
        assert_eq!(total, 6);
    }

    #[tokio::test]
    async fn test_pipe_emits_chunk_before_handler_failure() {
        let temp = TempDir::new().unwrap();
        let records: Vec<Record> = (1..=3).map(|i| id_color_record(i, "red")).collect();

        let writer = GenericWriterBuilder::new(temp.path(), id_color_schema())
            .post_write_handler(|ctx: &PostWriteContext<'_, Record>| {
                let saw_last = ctx
                    .processed()
                    .iter()
                    .any(|record| record.get("id") == Some(&Value::Int64(3)));
                if saw_last {
                    Err("refused after the last record".into())
                } else {
                    Ok(())
                }
            })
            .build()
            .unwrap();

        let emitted: Vec<Result<Record, WriteError>> =
            writer.pipe(stream::iter(records.clone())).collect().await;

        // the failing chunk's records reach downstream before the error
        assert_eq!(emitted.len(), records.len() + 1);
        for (item, expected) in emitted.iter().zip(&records) {
            assert_eq!(item.as_ref().unwrap(), expected);
        }
        assert!(matches!(
            emitted[records.len()],
            Err(WriteError::Handler { .. })
        ));
    }
}

mod typed {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Reading {
        id: i64,
        sensor: String,
    }

    #[derive(Clone)]
    struct ReadingCodec;

    impl RecordEncoder<Reading> for ReadingCodec {
        fn encode(&self, item: &Reading, _options: &WriterOptions) -> Result<Record, EncodeError> {
            Ok(Record::new()
                .with_field("id", Value::Int64(item.id))
                .with_field("sensor", Value::string(item.sensor.as_str())))
        }
    }

    impl SchemaResolver<Reading> for ReadingCodec {
        fn resolve(
            &self,
            partition_columns: &[graupel::ColumnPath],
        ) -> Result<SchemaDef, SchemaError> {
            SchemaDef::group(vec![
                ("id".into(), SchemaDef::int64()),
                ("sensor".into(), SchemaDef::string()),
            ])
            .without_columns(partition_columns)
        }
    }

    #[tokio::test]
    async fn test_typed_writer_partitions_by_encoded_field() {
        let temp = TempDir::new().unwrap();
        let readings = vec![
            Reading { id: 1, sensor: "a".into() },
            Reading { id: 2, sensor: "b".into() },
            Reading { id: 3, sensor: "a".into() },
        ];

        let summary = TypedWriterBuilder::new(temp.path(), ReadingCodec, ReadingCodec)
            .partition_by(["sensor"])
            .build()
            .unwrap()
            .write_all(stream::iter(readings))
            .await
            .unwrap();

        assert_eq!(summary.records_processed, 3);
        assert_eq!(read_ids(&parquet_files(&temp.path().join("sensor=a"))[0]), vec![1, 3]);
        assert_eq!(read_ids(&parquet_files(&temp.path().join("sensor=b"))[0]), vec![2]);
    }

    #[tokio::test]
    async fn test_pre_write_transformation_fans_out_items() {
        let temp = TempDir::new().unwrap();
        let readings = vec![Reading { id: 1, sensor: "a".into() }];

        let summary = TypedWriterBuilder::with_transformation(
            temp.path(),
            ReadingCodec,
            ReadingCodec,
            |reading: &Reading| {
                vec![
                    reading.clone(),
                    Reading { id: reading.id + 100, ..reading.clone() },
                ]
            },
        )
        .build()
        .unwrap()
        .write_all(stream::iter(readings))
        .await
        .unwrap();

        assert_eq!(summary.records_processed, 1);
        assert_eq!(summary.items_written, 2);

        let files = parquet_files(temp.path());
        assert_eq!(files.len(), 1);
        assert_eq!(read_ids(&files[0]), vec![1, 101]);
    }

    #[tokio::test]
    async fn test_transformation_can_drop_records() {
        let temp = TempDir::new().unwrap();
        let readings = vec![
            Reading { id: 1, sensor: "a".into() },
            Reading { id: 2, sensor: "skip".into() },
        ];

        let summary = TypedWriterBuilder::with_transformation(
            temp.path(),
            ReadingCodec,
            ReadingCodec,
            |reading: &Reading| {
                if reading.sensor == "skip" {
                    Vec::new()
                } else {
                    vec![reading.clone()]
                }
            },
        )
        .build()
        .unwrap()
        .write_all(stream::iter(readings))
        .await
        .unwrap();

        assert_eq!(summary.records_processed, 2);
        assert_eq!(summary.items_written, 1);

        let files = parquet_files(temp.path());
        assert_eq!(read_ids(&files[0]), vec![1]);
    }
}

mod schema_checks {
    use super::*;

    #[tokio::test]
    async fn test_string_values_survive_the_round_trip() {
        let temp = TempDir::new().unwrap();

        GenericWriterBuilder::new(temp.path(), id_color_schema())
            .build()
            .unwrap()
            .write_all(stream::iter(vec![
                id_color_record(1, "crimson"),
                id_color_record(2, "navy"),
            ]))
            .await
            .unwrap();

        let files = parquet_files(temp.path());
        let file = File::open(&files[0]).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();

        let mut colors: HashSet<String> = HashSet::new();
        for batch in reader {
            let batch = batch.unwrap();
            let column = batch
                .column_by_name("color")
                .unwrap()
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap();
            colors.extend(column.iter().map(|v| v.unwrap().to_string()));
        }
        assert_eq!(colors, HashSet::from(["crimson".into(), "navy".into()]));
    }
}
