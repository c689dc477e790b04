//! Local Store: a directory of table files, one table per file.
//!
//! `Customers.csv` and `Orders.parquet` are the tables `Customers` and
//! `Orders`. Schemas come from arrow: CSV types are inferred from a sample of
//! rows, Parquet types are read from the file metadata.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Schema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Serialize;
use tracing::info;

use crate::error::IngestError;

/// Rows sampled for CSV type inference.
const CSV_INFERENCE_ROWS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Parquet,
}

impl DataFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "parquet" => Some(Self::Parquet),
            _ => None,
        }
    }

    /// Name of the format in ADX ingestion properties.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreTable {
    pub name: String,
    pub path: PathBuf,
    pub format: DataFormat,
    pub size_bytes: u64,
}

impl StoreTable {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Arrow schema of the table.
    pub fn schema(&self) -> Result<Schema, IngestError> {
        let file = File::open(&self.path)?;
        match self.format {
            DataFormat::Csv => {
                let (schema, _) = Format::default()
                    .with_header(true)
                    .infer_schema(BufReader::new(file), Some(CSV_INFERENCE_ROWS))
                    .map_err(|e| IngestError::Schema(format!("{}: {e}", self.path.display())))?;
                Ok(schema)
            }
            DataFormat::Parquet => {
                let builder = ParquetRecordBatchReaderBuilder::try_new(file)
                    .map_err(|e| IngestError::Schema(format!("{}: {e}", self.path.display())))?;
                Ok(Schema::clone(builder.schema()))
            }
        }
    }

    /// `(column, kusto type)` pairs for `.create-merge table`.
    pub fn kusto_columns(&self) -> Result<Vec<(String, String)>, IngestError> {
        Ok(self
            .schema()?
            .fields()
            .iter()
            .map(|f| (f.name().clone(), kusto_type(f.data_type()).to_string()))
            .collect())
    }
}

/// Map an arrow type to the closest Kusto scalar type.
pub fn kusto_type(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Boolean => "bool",
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::UInt8 | DataType::UInt16 => {
            "int"
        }
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => "long",
        DataType::Float16 | DataType::Float32 | DataType::Float64 => "real",
        DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => "decimal",
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => "datetime",
        DataType::Duration(_) | DataType::Time32(_) | DataType::Time64(_) => "timespan",
        DataType::List(_)
        | DataType::LargeList(_)
        | DataType::FixedSizeList(_, _)
        | DataType::Struct(_)
        | DataType::Map(_, _) => "dynamic",
        _ => "string",
    }
}

pub struct Store {
    dir: PathBuf,
}

impl Store {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, IngestError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(IngestError::Store(format!(
                "store directory {} does not exist",
                dir.display()
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Tables in the store, sorted by name. Only top-level files count.
    pub fn tables(&self) -> Result<Vec<StoreTable>, IngestError> {
        let mut tables = Vec::new();
        for entry in walkdir::WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
        {
            let entry = entry.map_err(|e| IngestError::Store(e.to_string()))?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(format) = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(DataFormat::from_extension)
            else {
                continue;
            };
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            tables.push(StoreTable {
                name: name.to_string(),
                path: path.to_path_buf(),
                format,
                size_bytes: entry.metadata().map(|m| m.len()).unwrap_or(0),
            });
        }
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        info!(dir = %self.dir.display(), tables = tables.len(), "Discovered store tables");
        Ok(tables)
    }
}
