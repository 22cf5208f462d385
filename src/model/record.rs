use crate::model::Amount;
use serde::{Deserialize, Serialize};

/// A single cell value from an export or ledger row.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Amount(Amount),
}

impl Value {
    /// The cell text exactly as it appeared in the source.
    pub fn as_str(&self) -> &str {
        match self {
            Value::Text(s) => s.as_str(),
            Value::Amount(a) => a.raw(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Text(String::new())
    }
}

/// One transaction row: cell values positionally aligned with a header `Mapping`. A record may
/// hold fewer values than the header has columns; the missing trailing cells read as empty.
#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The cell at column `ix`, or `None` when the row is shorter than the header.
    pub fn get(&self, ix: usize) -> Option<&Value> {
        self.values.get(ix)
    }

    /// The cell text at column `ix`; empty when the row is shorter than the header.
    pub fn text(&self, ix: usize) -> &str {
        self.get(ix).map(Value::as_str).unwrap_or_default()
    }

    /// True when every cell in the row is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(Value::is_blank)
    }

    /// Renders the record at exactly `width` cells, padding with empty strings or truncating as
    /// needed so every written row matches the header column count.
    pub fn to_row(&self, width: usize) -> Vec<String> {
        let mut row: Vec<String> = self
            .values
            .iter()
            .take(width)
            .map(|v| v.as_str().to_string())
            .collect();
        row.resize(width, String::new());
        row
    }
}
