//! External collaborators of the sync pipeline, each behind a small capability trait so that
//! concrete strategies are swappable: the aggregator client that triggers the export, the
//! mailbox search that resolves the download link, the HTTP download, and the Google Sheet
//! that holds the ledger. In-memory test doubles are compiled in even for production builds so
//! the whole app can run top-to-bottom without any external service.

mod aggregator;
mod fetcher;
mod files;
mod mailbox;
mod oauth;
mod sheet;
mod test_client;

use crate::{Config, Result, SyncError};
use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

pub(crate) use oauth::TokenProvider;
#[cfg(test)]
pub(crate) use test_client::{test_ledger_rows, TestExportService};

/// OAuth scopes required for the Google APIs we call: Sheets for the ledger, Gmail (read-only)
/// for finding the export email.
const OAUTH_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/gmail.readonly",
];

/// Selects real collaborators or the in-memory test doubles. This allows for testing the
/// program without hitting any external service: when LEDSYNC_IN_TEST_MODE is set and non-zero
/// in length the mode will be `Mode::Test`, otherwise it will be `Mode::Live`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mode {
    Live,
    Test,
}

impl Mode {
    pub fn from_env() -> Self {
        match std::env::var("LEDSYNC_IN_TEST_MODE") {
            Ok(v) if !v.is_empty() => Mode::Test,
            _ => Mode::Live,
        }
    }
}

/// What the export should contain: an optional category restriction and an optional date
/// window. `None` dates mean the full history.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub(crate) struct FilterCriteria {
    pub(crate) category: Option<String>,
    pub(crate) start_date: Option<NaiveDate>,
    pub(crate) end_date: Option<NaiveDate>,
}

/// How to find the export email: a sender address (empty matches any) and a subject line.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub(crate) struct EmailSearch {
    pub(crate) from: String,
    pub(crate) subject: String,
}

/// Asks the aggregator to produce a filtered transaction export. Success means an export email
/// will eventually be sent; nothing is returned here.
#[async_trait]
pub(crate) trait ExportTrigger: Send + Sync {
    async fn trigger(&self, criteria: &FilterCriteria) -> Result<()>;
}

/// Searches the mailbox for the export email and yields its download link. "The email has not
/// arrived yet" is [`SyncError::NotFoundYet`], which the retry layer treats as an expected
/// polling condition rather than a failure.
#[async_trait]
pub(crate) trait LinkResolver: Send + Sync {
    async fn resolve(&self, search: &EmailSearch) -> Result<Url>;
}

/// Retrieves the export file and persists it to `destination`.
#[async_trait]
pub(crate) trait FileFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, destination: &Path) -> Result<PathBuf>;
}

/// The persisted store of already-known transactions. `rows` returns everything including the
/// header row; `append` adds rows at the bottom in one write. The ledger is never rewritten or
/// compacted by this program.
#[async_trait]
pub(crate) trait Ledger: Send + Sync {
    async fn rows(&self) -> Result<Vec<Vec<String>>>;
    async fn append(&self, rows: &[Vec<String>]) -> Result<()>;
}

/// The suspension point for interactive authentication: a collaborator that needs a one-time
/// code requests it here and resumes when it is supplied. Cancelling the prompt surfaces as
/// [`SyncError::Cancelled`], which abandons only the current attempt.
#[async_trait]
pub(crate) trait AuthPrompt: Send + Sync {
    async fn one_time_code(&self, message: &str) -> Result<String>;
}

/// Reads the one-time code from the terminal.
pub(crate) struct ConsolePrompt;

#[async_trait]
impl AuthPrompt for ConsolePrompt {
    async fn one_time_code(&self, message: &str) -> Result<String> {
        let message = message.to_string();
        tokio::task::spawn_blocking(move || {
            use std::io::Write;

            loop {
                print!("{message}: ");
                std::io::stdout().flush().ok();
                let mut line = String::new();
                match std::io::stdin().read_line(&mut line) {
                    // EOF: the user closed stdin, treat it as abandoning this attempt.
                    Ok(0) => return Err(SyncError::Cancelled.into()),
                    Ok(_) => {
                        let code = line.trim();
                        if code.is_empty() {
                            continue;
                        }
                        return Ok(code.to_string());
                    }
                    Err(_) => return Err(SyncError::Cancelled.into()),
                }
            }
        })
        .await
        .context("The one-time code prompt task failed")?
    }
}

/// Creates the `Ledger` collaborator for `mode`.
pub(crate) async fn ledger(config: &Config, mode: Mode) -> Result<Box<dyn Ledger>> {
    match mode {
        Mode::Live => {
            let token_provider = token_provider(config).await?;
            Ok(Box::new(
                sheet::GoogleLedger::new(config.clone(), token_provider).await?,
            ))
        }
        Mode::Test => Ok(Box::new(test_client::TestLedger::new(
            config.spreadsheet_id(),
        ))),
    }
}

/// Creates the `ExportTrigger` collaborator for `mode`.
pub(crate) async fn trigger(
    config: &Config,
    prompt: Arc<dyn AuthPrompt>,
    mode: Mode,
) -> Result<Box<dyn ExportTrigger>> {
    match mode {
        Mode::Live => Ok(Box::new(
            aggregator::ApiExportTrigger::new(config, prompt).await?,
        )),
        Mode::Test => Ok(Box::new(test_client::TestExportService::new())),
    }
}

/// Creates the `LinkResolver` collaborator for `mode`.
pub(crate) async fn resolver(config: &Config, mode: Mode) -> Result<Box<dyn LinkResolver>> {
    match mode {
        Mode::Live => {
            let token_provider = token_provider(config).await?;
            Ok(Box::new(mailbox::GmailLinkResolver::new(
                config.clone(),
                token_provider,
            )?))
        }
        Mode::Test => Ok(Box::new(test_client::TestExportService::new())),
    }
}

/// Creates the `FileFetcher` collaborator for `mode`.
pub(crate) async fn fetcher(config: &Config, mode: Mode) -> Result<Box<dyn FileFetcher>> {
    match mode {
        Mode::Live => Ok(Box::new(fetcher::HttpFileFetcher::new()?)),
        Mode::Test => Ok(Box::new(test_client::TestExportService::new())),
    }
}

async fn token_provider(config: &Config) -> Result<TokenProvider> {
    TokenProvider::load(config.client_secret_path(), config.token_path())
        .await
        .context(
            "Unable to use the existing Google OAuth tokens. \
            You may need to run 'ledsync auth'.",
        )
}
