//! Decoding and encoding of the delimited transaction export.
//!
//! The export arrives as CSV text with one header row. Decoding is deliberately lenient about
//! row shape because upstream export formats vary: blank rows are skipped, short rows keep
//! fewer cells (the missing trailing cells read as empty), and rows longer than the header are
//! truncated to the header width.

use crate::error::SyncError;
use crate::model::{Mapping, Record, Value};
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::warn;

/// The parsed content of an export (or of the ledger sheet): a header `Mapping` plus the data
/// records in source order.
#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Export {
    mapping: Mapping,
    records: Vec<Record>,
}

impl Export {
    /// Parses CSV text from `reader`. Fails with [`SyncError::MalformedInput`] when the source
    /// is empty or has no header row.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows: Vec<Vec<String>> = Vec::new();
        for result in rdr.records() {
            let record = result.context("Unable to read a row from the export")?;
            rows.push(record.iter().map(|field| field.to_string()).collect());
        }
        Self::from_rows(rows)
    }

    /// Builds an `Export` from already-split rows, e.g. the values fetched from the ledger
    /// sheet. The first row is the header.
    pub fn from_rows<S, R, I>(rows: I) -> Result<Self>
    where
        S: Into<String>,
        R: IntoIterator<Item = S>,
        I: IntoIterator<Item = R>,
    {
        let mut rows = rows.into_iter();
        let mapping = match rows.next() {
            Some(header_row) => Mapping::new(
                header_row
                    .into_iter()
                    .map(|s| s.into())
                    .collect::<Vec<String>>(),
            )
            .map_err(|e| SyncError::MalformedInput(e.to_string()))?,
            None => {
                return Err(SyncError::MalformedInput(String::from(
                    "the source has no header row",
                ))
                .into())
            }
        };

        let width = mapping.len();
        let amount_ix = mapping.amount_index();

        let mut records = Vec::new();
        for (row_ix, row) in rows.enumerate() {
            let mut cells: Vec<String> = row.into_iter().map(|s| s.into()).collect();

            // Blank rows carry no data; skip them.
            if cells.iter().all(|c| c.trim().is_empty()) {
                continue;
            }

            if cells.len() > width {
                warn!(
                    "Row {} has {} cells but the header has {} columns; truncating the extras",
                    row_ix + 2,
                    cells.len(),
                    width
                );
                cells.truncate(width);
            }

            let values: Vec<Value> = cells
                .into_iter()
                .enumerate()
                .map(|(col_ix, cell)| {
                    if Some(col_ix) == amount_ix {
                        let amount = crate::model::Amount::parse(cell);
                        if !amount.is_parsed() && !amount.is_blank() {
                            warn!(
                                "Row {} has an amount value that does not parse as a number: \
                                '{}'; keeping the original text",
                                row_ix + 2,
                                amount.raw()
                            );
                        }
                        Value::Amount(amount)
                    } else {
                        Value::Text(cell)
                    }
                })
                .collect();
            records.push(Record::new(values));
        }

        Ok(Self { mapping, records })
    }

    /// Renders the header plus every record, each row at exactly the header width.
    pub fn to_rows(&self) -> Vec<Vec<String>> {
        let width = self.mapping.len();
        let mut rows = vec![self.mapping.headers().to_vec()];
        rows.extend(self.records.iter().map(|r| r.to_row(width)));
        rows
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn header_row(&self) -> Vec<String> {
        self.mapping.headers().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const EXPORT: &str = "\
Date,Amount,Description,Id
2024-01-01,12.50,Piano Lesson,tx001
2024-01-02,15.00,Piano Lesson,tx002
";

    #[test]
    fn test_parse_well_formed() {
        let export = Export::parse(Cursor::new(EXPORT)).unwrap();
        assert_eq!(
            export.mapping().headers(),
            &["Date", "Amount", "Description", "Id"]
        );
        assert_eq!(export.records().len(), 2);
        assert_eq!(export.records()[0].text(2), "Piano Lesson");
        match export.records()[1].get(1).unwrap() {
            Value::Amount(a) => assert_eq!(a.raw(), "15.00"),
            other => panic!("expected an amount cell, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_empty_source_is_malformed() {
        let err = Export::parse(Cursor::new("")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_parse_skips_blank_rows() {
        let csv = "Date,Amount,Description\n,,\n2024-01-01,12.50,Piano Lesson\n";
        let export = Export::parse(Cursor::new(csv)).unwrap();
        assert_eq!(export.records().len(), 1);
    }

    #[test]
    fn test_parse_short_row_reads_as_empty() {
        let csv = "Date,Amount,Description\n2024-01-01,12.50\n";
        let export = Export::parse(Cursor::new(csv)).unwrap();
        assert_eq!(export.records()[0].text(2), "");
    }

    #[test]
    fn test_parse_long_row_is_truncated() {
        let rows = vec![
            vec!["Date", "Amount", "Description"],
            vec!["2024-01-01", "12.50", "Piano Lesson", "extra", "extra2"],
        ];
        let export = Export::from_rows(rows).unwrap();
        assert_eq!(export.records()[0].values().len(), 3);
    }

    #[test]
    fn test_parse_unparseable_amount_keeps_text() {
        let csv = "Date,Amount,Description\n2024-01-01,12.5O,Piano Lesson\n";
        let export = Export::parse(Cursor::new(csv)).unwrap();
        match export.records()[0].get(1).unwrap() {
            Value::Amount(a) => {
                assert!(!a.is_parsed());
                assert_eq!(a.raw(), "12.5O");
            }
            other => panic!("expected an amount cell, got {other:?}"),
        }
    }

    #[test]
    fn test_round_trip() {
        let export = Export::parse(Cursor::new(EXPORT)).unwrap();
        let rows = export.to_rows();
        let back = Export::from_rows(rows).unwrap();
        assert_eq!(export, back);
    }

    #[test]
    fn test_to_rows_pads_to_header_width() {
        let rows = vec![
            vec!["Date", "Amount", "Description"],
            vec!["2024-01-01", "12.50"],
        ];
        let export = Export::from_rows(rows).unwrap();
        assert_eq!(
            export.to_rows(),
            vec![
                vec!["Date", "Amount", "Description"],
                vec!["2024-01-01", "12.50", ""],
            ]
        );
    }
}
