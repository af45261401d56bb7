//! Row model for the ingestion endpoint.
//!
//! A request body is a JSON array of rows, each row an array of scalars.
//! Rows are validated up front so a batch is either written whole or not at
//! all, and each row renders to exactly one comma-joined line.

use crate::error::MovelogError;
use serde_json::Value;

/// One recorded event: an ordered list of already-rendered fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    fields: Vec<String>,
}

impl LogRow {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Comma-join of the fields, without the trailing newline.
    pub fn to_line(&self) -> String {
        self.fields.join(",")
    }

    fn from_value(index: usize, value: &Value) -> Result<Self, MovelogError> {
        let items = value.as_array().ok_or_else(|| MovelogError::InvalidRow {
            row: index,
            reason: format!("expected an array, got {}", kind(value)),
        })?;

        let mut fields = Vec::with_capacity(items.len());
        for (field_index, item) in items.iter().enumerate() {
            let rendered = render_field(item).map_err(|reason| MovelogError::InvalidRow {
                row: index,
                reason: format!("field {field_index} {reason}"),
            })?;
            fields.push(rendered);
        }
        Ok(Self { fields })
    }
}

/// A validated batch of rows from a single request, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowBatch {
    rows: Vec<LogRow>,
}

impl RowBatch {
    /// Parse and validate a request body.
    ///
    /// Bodies that are not UTF-8 JSON yield `InvalidJson`; well-formed JSON
    /// of the wrong shape yields `InvalidRow`.
    pub fn parse(body: &[u8]) -> Result<Self, MovelogError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| MovelogError::InvalidJson(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, MovelogError> {
        let items = value.as_array().ok_or_else(|| MovelogError::InvalidRow {
            row: 0,
            reason: format!("top level must be an array of rows, got {}", kind(value)),
        })?;

        let rows = items
            .iter()
            .enumerate()
            .map(|(i, v)| LogRow::from_value(i, v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[LogRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render every row as `line\n`, in order, into one buffer.
    pub fn render(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for row in &self.rows {
            for (i, field) in row.fields.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                buf.extend_from_slice(field.as_bytes());
            }
            buf.push(b'\n');
        }
        buf
    }
}

impl From<Vec<LogRow>> for RowBatch {
    fn from(rows: Vec<LogRow>) -> Self {
        Self { rows }
    }
}

/// Booleans render as `True`/`False` and null as `None`, the spelling
/// existing game logs already use.
fn render_field(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) if s.contains(['\n', '\r']) => Err("contains a line break".into()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(true) => Ok("True".into()),
        Value::Bool(false) => Ok("False".into()),
        Value::Null => Ok("None".into()),
        other => Err(format!("is {}, expected a scalar", kind(other))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
