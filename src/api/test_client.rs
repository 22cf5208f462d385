//! In-memory implementations of the collaborator traits for testing purposes.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the
//! whole app, top-to-bottom, without the aggregator, the mailbox, or Google Sheets.

use crate::api::{EmailSearch, ExportTrigger, FileFetcher, FilterCriteria, Ledger, LinkResolver};
use crate::{utils, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::debug;
use url::Url;

/// Ledger state shared across instances, keyed by spreadsheet id, so a test (or a test-mode
/// run) observes its own appends on the next read just like a real sheet would.
fn registry() -> &'static Mutex<HashMap<String, Vec<Vec<String>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Vec<Vec<String>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// An implementation of the `Ledger` trait that does not use Google Sheets.
pub(crate) struct TestLedger {
    spreadsheet_id: String,
}

impl TestLedger {
    pub(crate) fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
        }
    }
}

#[async_trait]
impl Ledger for TestLedger {
    async fn rows(&self) -> Result<Vec<Vec<String>>> {
        let map = registry().lock().unwrap();
        Ok(map.get(&self.spreadsheet_id).cloned().unwrap_or_default())
    }

    async fn append(&self, rows: &[Vec<String>]) -> Result<()> {
        let mut map = registry().lock().unwrap();
        map.entry(self.spreadsheet_id.clone())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }
}

/// Returns the current rows held for `spreadsheet_id`.
#[cfg(test)]
pub(crate) fn test_ledger_rows(spreadsheet_id: &str) -> Vec<Vec<String>> {
    registry()
        .lock()
        .unwrap()
        .get(spreadsheet_id)
        .cloned()
        .unwrap_or_default()
}

/// A single in-memory stand-in for the aggregator, the mailbox and the download: triggering
/// records the criteria, resolving immediately yields a canned link, and fetching writes seed
/// CSV data to the destination path.
#[derive(Default)]
pub(crate) struct TestExportService {
    last_criteria: Mutex<Option<FilterCriteria>>,
}

impl TestExportService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn last_criteria(&self) -> Option<FilterCriteria> {
        self.last_criteria.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExportTrigger for TestExportService {
    async fn trigger(&self, criteria: &FilterCriteria) -> Result<()> {
        debug!("TestExportService received an export request: {criteria:?}");
        *self.last_criteria.lock().unwrap() = Some(criteria.clone());
        Ok(())
    }
}

#[async_trait]
impl LinkResolver for TestExportService {
    async fn resolve(&self, _search: &EmailSearch) -> Result<Url> {
        Ok(Url::parse("https://exports.example.com/file/test-export")
            .expect("the canned test URL is valid"))
    }
}

#[async_trait]
impl FileFetcher for TestExportService {
    async fn fetch(&self, _url: &Url, destination: &Path) -> Result<PathBuf> {
        utils::write(destination, EXPORT_DATA).await?;
        debug!(
            "TestExportService wrote the seed export to {}",
            destination.display()
        );
        Ok(destination.to_path_buf())
    }
}

/// Seed export data.
const EXPORT_DATA: &str = r##"Date,Account,Name,TransactionsCount,Amount,PlaidName,Id
2025-06-02,Checking,Piano Lesson - Alvarez,4,45.00,ZELLE ALVAREZ M,txn_9f2c01
2025-06-02,Checking,Piano Lesson - Okafor,7,45.00,VENMO OKAFOR,txn_9f2c02
2025-06-09,Checking,Piano Lesson - Alvarez,4,45.00,ZELLE ALVAREZ M,txn_9f2c03
2025-06-12,Checking,Spring Recital Fees,1,180.00,SQ *RECITAL,txn_9f2c04
2025-06-16,Checking,Piano Lesson - Tran,2,50.00,ZELLE TRAN H,txn_9f2c05
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ledger_appends_are_visible_to_reads() {
        let ledger = TestLedger::new("sheet-append-visibility");
        assert!(ledger.rows().await.unwrap().is_empty());

        ledger
            .append(&[vec![String::from("Date"), String::from("Amount")]])
            .await
            .unwrap();
        ledger
            .append(&[vec![String::from("2025-06-02"), String::from("45.00")]])
            .await
            .unwrap();

        let rows = ledger.rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], "2025-06-02");
    }

    #[tokio::test]
    async fn test_export_service_writes_seed_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("export.csv");
        let service = TestExportService::new();

        service.trigger(&FilterCriteria::default()).await.unwrap();
        let url = service.resolve(&EmailSearch::default()).await.unwrap();
        let path = service.fetch(&url, &dest).await.unwrap();

        let content = utils::read(&path).await.unwrap();
        assert!(content.starts_with("Date,Account,Name"));
        assert!(service.last_criteria().is_some());
    }
}
