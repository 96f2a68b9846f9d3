//! Streaming CSV pieces: a byte-counting writer, cell formatting, and the
//! materialize projection that flattens records into columns.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::entity::property_value_to_string;
use crate::transformations::{MaterializeConfig, Record};

/// Write adapter that counts bytes as they pass through, so progress can be
/// persisted while the CSV writer owns the sink.
pub struct CountingWriter<W: Write> {
    inner: W,
    written: Arc<AtomicU64>,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> (Self, ByteCounter) {
        let written = Arc::new(AtomicU64::new(0));
        let counter = ByteCounter(written.clone());
        (Self { inner, written }, counter)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.written.fetch_add(written as u64, Ordering::Relaxed);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Shared handle onto a [`CountingWriter`]'s byte count.
#[derive(Clone)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn bytes(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Renders one CSV cell. Missing and null values render empty, strings
/// render as-is, booleans as `true`/`false`, numbers in their default
/// textual form, and arrays/objects as compact JSON. Timestamps are stored
/// as RFC 3339 strings in the property bag and so pass through unchanged.
pub fn format_cell(value: Option<&Value>) -> String {
    value.map(property_value_to_string).unwrap_or_default()
}

/// Flattens records into named output columns per the materialize config.
/// Headers are `alias.field`; each cell reads the mapped source alias and
/// field from the record.
#[derive(Debug, Clone)]
pub struct MaterializeProjection {
    columns: Vec<ProjectionColumn>,
}

#[derive(Debug, Clone)]
struct ProjectionColumn {
    header: String,
    source_alias: String,
    source_field: String,
}

impl MaterializeProjection {
    pub fn from_config(config: &MaterializeConfig) -> Self {
        let mut columns = Vec::new();
        for output in &config.outputs {
            let alias = output.alias.trim();
            if alias.is_empty() {
                continue;
            }
            for field in &output.fields {
                let output_field = field.output_field.trim();
                if output_field.is_empty() {
                    continue;
                }
                let source_alias = if field.source_alias.trim().is_empty() {
                    alias.to_string()
                } else {
                    field.source_alias.trim().to_string()
                };
                let source_field = if field.source_field.trim().is_empty() {
                    output_field.to_string()
                } else {
                    field.source_field.trim().to_string()
                };
                columns.push(ProjectionColumn {
                    header: format!("{}.{}", alias, output_field),
                    source_alias,
                    source_field,
                });
            }
        }
        Self { columns }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.header.as_str()).collect()
    }

    pub fn cells(&self, record: &Record) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| {
                format_cell(
                    record
                        .entity(&column.source_alias)
                        .and_then(|entity| entity.properties.get(&column.source_field)),
                )
            })
            .collect()
    }
}

/// Lowercases and strips a name down to `[a-z0-9-_]` for use in file names.
pub fn sanitize_file_component(value: &str) -> String {
    let trimmed = value.trim().to_lowercase();
    let mut result = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            'a'..='z' | '0'..='9' | '-' | '_' => result.push(c),
            _ => result.push('-'),
        }
    }
    let result = result.trim_matches('-').to_string();
    if result.is_empty() {
        "export".to_string()
    } else {
        result
    }
}
