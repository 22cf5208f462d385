//! The sync pipeline: trigger the export, wait for the email, fetch the file, merge the rows
//! into the ledger.
//!
//! The stages run strictly sequentially because each depends on the previous stage's output.
//! Each stage exhausts its own retry budget before surfacing a failure, and the pipeline adds
//! no further retry layer around whole runs: a full rerun is the operator's decision, made safe
//! by the merge's idempotence. Downloaded artifacts are left in place on failure because they
//! are the best evidence of what the external automation actually produced.

use crate::api::{EmailSearch, ExportTrigger, FileFetcher, FilterCriteria, Ledger, LinkResolver};
use crate::merge::{self, KeyExtractor};
use crate::model::Export;
use crate::retry::{Retry, Stage};
use crate::{Config, Result, SyncError};
use anyhow::Context;
use chrono::{Days, Utc};
use serde::Serialize;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Each ledger append writes at most this many rows, to stay inside typical spreadsheet API
/// quota limits. A chunk is one atomic external write: if a later chunk fails after earlier
/// chunks succeeded, rerunning the sync is safe because the merge recognizes the committed
/// rows as duplicates.
const APPEND_BATCH_ROWS: usize = 100;

/// What a sync run accomplished.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncResult {
    /// Rows appended to the ledger.
    pub appended: usize,
    /// Incoming rows skipped because the ledger (or this same export) already had them.
    pub duplicates: usize,
    /// Incoming rows excluded because a key field was empty.
    pub skipped: usize,
    /// Where the fetched export was persisted.
    pub artifact: PathBuf,
}

/// Sequences the pipeline stages over the four external collaborators. Owns the failure
/// policy; the collaborators own the transport.
pub(crate) struct SyncOrchestrator {
    config: Config,
    trigger: Box<dyn ExportTrigger>,
    resolver: Box<dyn LinkResolver>,
    fetcher: Box<dyn FileFetcher>,
    ledger: Box<dyn Ledger>,
}

impl SyncOrchestrator {
    pub(crate) fn new(
        config: Config,
        trigger: Box<dyn ExportTrigger>,
        resolver: Box<dyn LinkResolver>,
        fetcher: Box<dyn FileFetcher>,
        ledger: Box<dyn Ledger>,
    ) -> Self {
        Self {
            config,
            trigger,
            resolver,
            fetcher,
            ledger,
        }
    }

    pub(crate) async fn run(&self) -> Result<SyncResult> {
        // The ledger is read up front: its emptiness decides the export window, and its rows
        // become the existing-key set for the merge.
        let ledger_rows = self
            .ledger
            .rows()
            .await
            .context("Unable to read the ledger")?;
        let criteria = self.filter_criteria(ledger_rows.is_empty());

        self.trigger_export(&criteria).await?;

        info!(
            "Waiting {:?} for the export email to be sent",
            self.config.settle_wait()
        );
        tokio::time::sleep(self.config.settle_wait()).await;

        let link = self.resolve_link().await?;
        let artifact = self.fetch_export(&link).await?;

        verify_export(&artifact).await?;
        let content = crate::utils::read(&artifact).await?;
        let export = Export::parse(Cursor::new(content.as_bytes()))
            .context("Unable to decode the fetched export")?;
        info!(
            "Decoded {} rows from {}",
            export.records().len(),
            artifact.display()
        );

        let result = self.merge_and_append(ledger_rows, &export).await?;
        info!(
            "Sync complete: {} appended, {} duplicates skipped, {} incomplete rows excluded",
            result.appended, result.duplicates, result.skipped
        );
        Ok(SyncResult { artifact, ..result })
    }

    /// The export filter: the configured category, bounded to the lookback window once the
    /// ledger already has rows, unbounded on first run.
    fn filter_criteria(&self, ledger_is_empty: bool) -> FilterCriteria {
        let category = self.config.category_filter().map(|s| s.to_string());
        if ledger_is_empty {
            debug!("The ledger is empty; requesting the full transaction history");
            return FilterCriteria {
                category,
                start_date: None,
                end_date: None,
            };
        }
        let today = Utc::now().date_naive();
        let start = today
            .checked_sub_days(Days::new(u64::from(self.config.lookback_days())))
            .unwrap_or(today);
        FilterCriteria {
            category,
            start_date: Some(start),
            end_date: Some(today),
        }
    }

    async fn trigger_export(&self, criteria: &FilterCriteria) -> Result<()> {
        let retry = Retry::new(
            Stage::Trigger,
            self.config.retry_max_attempts(),
            self.config.retry_wait(),
        );
        let trigger = self.trigger.as_ref();
        retry
            .run(|| trigger.trigger(criteria))
            .await
            .with_context(|| stage_failed(retry.stage()))
    }

    async fn resolve_link(&self) -> Result<url::Url> {
        let search = EmailSearch {
            from: self.config.email_from().to_string(),
            subject: self.config.email_subject().to_string(),
        };
        let retry = Retry::new(
            Stage::Resolve,
            self.config.poll_max_attempts(),
            self.config.poll_wait(),
        );
        let resolver = self.resolver.as_ref();
        let result = retry.run(|| resolver.resolve(&search)).await;
        match result {
            Ok(url) => Ok(url),
            Err(e) if SyncError::is_not_found_yet(&e) => Err(e).with_context(|| {
                format!(
                    "The export email did not arrive within {} attempts",
                    self.config.poll_max_attempts()
                )
            }),
            Err(e) => Err(e).with_context(|| stage_failed(retry.stage())),
        }
    }

    async fn fetch_export(&self, link: &url::Url) -> Result<PathBuf> {
        let destination = self.config.export_path();
        let retry = Retry::new(
            Stage::Fetch,
            self.config.retry_max_attempts(),
            self.config.retry_wait(),
        );
        let fetcher = self.fetcher.as_ref();
        retry
            .run(|| fetcher.fetch(link, &destination))
            .await
            .with_context(|| stage_failed(retry.stage()))
    }

    async fn merge_and_append(
        &self,
        ledger_rows: Vec<Vec<String>>,
        export: &Export,
    ) -> Result<SyncResult> {
        let export_extractor = KeyExtractor::new(export.mapping(), self.config.key_policy())?;
        debug!(
            "Deduplicating with the {} key policy",
            export_extractor.policy()
        );

        // The header is written exactly once, when the ledger is first initialized. After
        // that the ledger's own header governs row width, and its rows feed the existing-key
        // set.
        let (existing, width) = if ledger_rows.is_empty() {
            info!("The ledger is empty; initializing it with the export's header row");
            self.append_rows(&[export.header_row()]).await?;
            (Default::default(), export.mapping().len())
        } else {
            let ledger = Export::from_rows(ledger_rows)
                .context("Unable to interpret the ledger contents")?;
            if ledger.mapping().len() != export.mapping().len() {
                warn!(
                    "The export has {} columns but the ledger header has {}; appended rows \
                    will be sized to the ledger header",
                    export.mapping().len(),
                    ledger.mapping().len()
                );
            }
            let ledger_extractor =
                KeyExtractor::new(ledger.mapping(), Some(export_extractor.policy()))
                    .context("The ledger is missing the columns the key policy needs")?;
            let keys = merge::existing_keys(&ledger_extractor, ledger.records());
            (keys, ledger.mapping().len())
        };
        debug!("The ledger holds {} distinct transaction keys", existing.len());

        let outcome = merge::merge(existing, &export_extractor, export.records());

        let rows: Vec<Vec<String>> = outcome
            .new_records
            .iter()
            .map(|r| r.to_row(width))
            .collect();
        for chunk in rows.chunks(APPEND_BATCH_ROWS) {
            self.append_rows(chunk).await?;
            debug!("Appended a batch of {} rows", chunk.len());
        }

        Ok(SyncResult {
            appended: outcome.new_records.len(),
            duplicates: outcome.duplicates,
            skipped: outcome.skipped,
            artifact: PathBuf::new(),
        })
    }

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
        let retry = Retry::new(
            Stage::Append,
            self.config.retry_max_attempts(),
            self.config.retry_wait(),
        );
        let ledger = self.ledger.as_ref();
        retry
            .run(|| ledger.append(rows))
            .await
            .with_context(|| stage_failed(retry.stage()))
    }
}

fn stage_failed(stage: Stage) -> String {
    format!("The {stage} stage failed")
}

/// Local verification of the fetched artifact: it must exist, be non-empty, and start with a
/// header line. Verification failures are not retried at the file level; the operator can
/// rerun the whole sync.
async fn verify_export(path: &std::path::Path) -> Result<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| SyncError::MalformedInput(format!("{} does not exist", path.display())))?;
    if metadata.len() == 0 {
        return Err(SyncError::MalformedInput(format!(
            "{} is empty",
            path.display()
        ))
        .into());
    }
    let content = crate::utils::read(path).await?;
    match content.lines().next() {
        Some(first) if !first.trim().is_empty() => Ok(()),
        _ => Err(SyncError::MalformedInput(format!(
            "{} has no header row",
            path.display()
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{test_ledger_rows, TestExportService};
    use crate::test::TestEnv;
    use crate::{api, utils};

    async fn orchestrator(env: &TestEnv) -> SyncOrchestrator {
        let config = env.config();
        SyncOrchestrator::new(
            config.clone(),
            Box::new(TestExportService::new()),
            Box::new(TestExportService::new()),
            Box::new(TestExportService::new()),
            api::ledger(&config, api::Mode::Test).await.unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_run_initializes_header_and_appends_all_rows() {
        let env = TestEnv::new().await;
        let sync = orchestrator(&env).await;

        let result = sync.run().await.unwrap();
        assert_eq!(result.appended, 5);
        assert_eq!(result.duplicates, 0);
        assert_eq!(result.skipped, 0);

        let rows = test_ledger_rows(env.config().spreadsheet_id());
        assert_eq!(rows.len(), 6); // header + 5 data rows
        assert_eq!(rows[0][0], "Date");
        assert_eq!(rows[1][6], "txn_9f2c01");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_appends_nothing() {
        let env = TestEnv::new().await;
        let sync = orchestrator(&env).await;

        let first = sync.run().await.unwrap();
        assert_eq!(first.appended, 5);

        let second = sync.run().await.unwrap();
        assert_eq!(second.appended, 0);
        assert_eq!(second.duplicates, 5);

        let rows = test_ledger_rows(env.config().spreadsheet_id());
        assert_eq!(rows.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_artifact_is_preserved_after_the_run() {
        let env = TestEnv::new().await;
        let sync = orchestrator(&env).await;

        let result = sync.run().await.unwrap();
        assert_eq!(result.artifact, env.config().export_path());
        let content = utils::read(&result.artifact).await.unwrap();
        assert!(content.starts_with("Date,"));
    }

    #[tokio::test]
    async fn test_verify_export_rejects_empty_file() {
        let env = TestEnv::new().await;
        let path = env.config().export_path();
        utils::write(&path, "").await.unwrap();

        let err = verify_export(&path).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::MalformedInput(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_export_rejects_missing_file() {
        let env = TestEnv::new().await;
        let path = env.config().export_path();
        assert!(verify_export(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_export_accepts_header() {
        let env = TestEnv::new().await;
        let path = env.config().export_path();
        utils::write(&path, "Date,Amount,Description\n").await.unwrap();
        verify_export(&path).await.unwrap();
    }
}
