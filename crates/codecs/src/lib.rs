use std::io;
use std::sync::Arc;

/// Value is the payload type which flows between creation functions and
/// storage. The engine routes values between codec calls without ever
/// interpreting them.
pub type Value = serde_json::Value;

/// Kwargs is an opaque bag of codec settings, declared per dataset.
pub type Kwargs = serde_json::Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to process JSON document")]
    Json(#[from] serde_json::Error),
    #[error("failed to process CSV document")]
    Csv(#[from] csv::Error),
    #[error("CSV documents must be arrays of records with scalar fields")]
    CsvShape,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Codec serializes and deserializes dataset values for one storage format.
pub trait Codec: Send + Sync {
    fn read(&self, reader: &mut dyn io::Read, kwargs: &Kwargs) -> Result<Value, Error>;
    fn write(&self, value: &Value, writer: &mut dyn io::Write, kwargs: &Kwargs)
        -> Result<(), Error>;
}

/// Look up the built-in codec registered for a file extension.
pub fn for_extension(extension: &str) -> Option<Arc<dyn Codec>> {
    match extension {
        "json" => Some(Arc::new(JsonCodec)),
        "csv" => Some(Arc::new(CsvCodec)),
        _ => None,
    }
}

/// JSON documents. Write kwargs: `pretty` (bool) selects indented output.
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn read(&self, reader: &mut dyn io::Read, _kwargs: &Kwargs) -> Result<Value, Error> {
        Ok(serde_json::from_reader(reader)?)
    }

    fn write(
        &self,
        value: &Value,
        writer: &mut dyn io::Write,
        kwargs: &Kwargs,
    ) -> Result<(), Error> {
        if let Some(Value::Bool(true)) = kwargs.get("pretty") {
            serde_json::to_writer_pretty(writer, value)?;
        } else {
            serde_json::to_writer(writer, value)?;
        }
        Ok(())
    }
}

/// CSV documents, modeled as an array of records keyed by column.
/// All fields read back as strings. Kwargs: `delimiter` (single-character
/// string) and `headers` (bool, default true).
pub struct CsvCodec;

fn delimiter(kwargs: &Kwargs) -> u8 {
    match kwargs.get("delimiter") {
        Some(Value::String(s)) if s.len() == 1 => s.as_bytes()[0],
        _ => b',',
    }
}

fn has_headers(kwargs: &Kwargs) -> bool {
    !matches!(kwargs.get("headers"), Some(Value::Bool(false)))
}

fn scalar_to_field(value: &Value) -> Result<String, Error> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Array(_) | Value::Object(_) => Err(Error::CsvShape),
    }
}

impl Codec for CsvCodec {
    fn read(&self, reader: &mut dyn io::Read, kwargs: &Kwargs) -> Result<Value, Error> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter(kwargs))
            .has_headers(has_headers(kwargs))
            .from_reader(reader);

        let headers: Vec<String> = if has_headers(kwargs) {
            reader.headers()?.iter().map(str::to_string).collect()
        } else {
            Vec::new()
        };

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row = serde_json::Map::new();
            for (index, field) in record.iter().enumerate() {
                let column = headers
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| index.to_string());
                row.insert(column, Value::String(field.to_string()));
            }
            rows.push(Value::Object(row));
        }
        Ok(Value::Array(rows))
    }

    fn write(
        &self,
        value: &Value,
        writer: &mut dyn io::Write,
        kwargs: &Kwargs,
    ) -> Result<(), Error> {
        // An empty or null document writes as an empty file.
        let rows = match value {
            Value::Null => &[],
            Value::Array(rows) => rows.as_slice(),
            _ => return Err(Error::CsvShape),
        };

        // Columns appear in first-seen order across all records.
        let mut columns = Vec::<&str>::new();
        for row in rows {
            let Value::Object(row) = row else {
                return Err(Error::CsvShape);
            };
            for column in row.keys() {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column);
                }
            }
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter(kwargs))
            .from_writer(writer);

        if has_headers(kwargs) && !columns.is_empty() {
            writer.write_record(&columns)?;
        }
        for row in rows {
            let Value::Object(row) = row else {
                return Err(Error::CsvShape);
            };
            let record: Vec<String> = columns
                .iter()
                .map(|column| row.get(*column).map_or(Ok(String::new()), scalar_to_field))
                .collect::<Result<_, _>>()?;
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
