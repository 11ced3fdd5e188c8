//! Parquet sink primitives.
//!
//! [`WriterOptions`] configures every file the sink opens; `factory` owns
//! the per-partition file writers and `registry` tracks the live set.

pub(crate) mod factory;
pub(crate) mod registry;

use parquet::basic::{Compression as ParquetCompression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;

/// Compression codec for produced files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

impl Compression {
    /// File-name extension placed between the uuid and `.parquet`.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Uncompressed => "",
            Compression::Snappy => ".snappy",
            Compression::Gzip => ".gz",
            Compression::Zstd => ".zstd",
            Compression::Lz4 => ".lz4",
        }
    }

    fn to_parquet(self) -> ParquetCompression {
        match self {
            Compression::Uncompressed => ParquetCompression::UNCOMPRESSED,
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Gzip => ParquetCompression::GZIP(GzipLevel::default()),
            Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
            Compression::Lz4 => ParquetCompression::LZ4,
        }
    }
}

/// Options applied to every file the sink opens.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Compression codec.
    pub compression: Compression,
    /// Maximum rows buffered in memory before a row group is cut.
    pub row_group_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            row_group_size: 1024 * 1024,
        }
    }
}

impl WriterOptions {
    /// Set the compression codec.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the row group size in records.
    pub fn with_row_group_size(mut self, rows: usize) -> Self {
        self.row_group_size = rows;
        self
    }

    pub(crate) fn writer_properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression.to_parquet())
            .set_max_row_group_size(self.row_group_size.max(1))
            .build()
    }
}
