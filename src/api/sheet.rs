//! Implements the `Ledger` trait using the `sheets::Client` to interact with the Google sheet
//! that holds the transaction ledger.

use crate::api::{Ledger, TokenProvider};
use crate::{Config, Result, SyncError};
use anyhow::Context;
use async_trait::async_trait;
use sheets::types::{
    DateTimeRenderOption, Dimension, InsertDataOption, ValueInputOption, ValueRange,
    ValueRenderOption,
};
use sheets::ClientError;
use tokio::sync::Mutex;
use tracing::trace;

/// Implements the `Ledger` trait against the Google Sheets API. It holds a `TokenProvider`, on
/// which it calls refresh to keep the access token up-to-date before every call.
pub(super) struct GoogleLedger {
    config: Config,
    inner: Mutex<Inner>,
}

struct Inner {
    token_provider: TokenProvider,
    client: sheets::Client,
}

impl GoogleLedger {
    pub(super) async fn new(config: Config, mut token_provider: TokenProvider) -> Result<Self> {
        let client = create_sheets_client(&mut token_provider).await?;
        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                token_provider,
                client,
            }),
        })
    }

    fn range(&self) -> String {
        // All columns of the ledger worksheet.
        format!("{}!A:ZZ", self.config.worksheet())
    }
}

#[async_trait]
impl Ledger for GoogleLedger {
    async fn rows(&self) -> Result<Vec<Vec<String>>> {
        trace!("rows for {}", self.config.worksheet());
        let mut inner = self.inner.lock().await;
        inner.refresh_client().await?;
        let range = self.range();
        let response = inner
            .client
            .spreadsheets()
            .values_get(
                self.config.spreadsheet_id(),
                &range,
                DateTimeRenderOption::FormattedString,
                Dimension::Rows,
                ValueRenderOption::FormattedValue,
            )
            .await
            .map_err(map_client_error)
            .with_context(|| format!("Failed to fetch {} sheet data", self.config.worksheet()))?;
        Ok(response.body.values)
    }

    async fn append(&self, rows: &[Vec<String>]) -> Result<()> {
        trace!("append {} rows to {}", rows.len(), self.config.worksheet());
        let mut inner = self.inner.lock().await;
        inner.refresh_client().await?;
        let range = self.range();
        let body = ValueRange {
            major_dimension: Some(Dimension::Rows),
            range: range.clone(),
            values: rows.to_vec(),
        };
        inner
            .client
            .spreadsheets()
            .values_append(
                self.config.spreadsheet_id(),
                &range,
                false,
                InsertDataOption::InsertRows,
                DateTimeRenderOption::FormattedString,
                ValueRenderOption::FormattedValue,
                ValueInputOption::UserEntered,
                &body,
            )
            .await
            .map_err(map_client_error)
            .map_err(|e| SyncError::QuotaOrWrite(format!("{e:#}")))
            .with_context(|| {
                format!(
                    "Failed to append {} rows to the {} sheet",
                    rows.len(),
                    self.config.worksheet()
                )
            })?;
        Ok(())
    }
}

impl Inner {
    /// Refreshes the sheets client with a new access token if needed
    async fn refresh_client(&mut self) -> Result<()> {
        self.client = create_sheets_client(&mut self.token_provider).await?;
        Ok(())
    }
}

/// Creates a new sheets client with a refreshed access token.
async fn create_sheets_client(token_provider: &mut TokenProvider) -> Result<sheets::Client> {
    // Get the access token (will refresh if needed)
    let access_token = token_provider.token_with_refresh().await?;

    // Create sheets client
    // Note: The sheets crate requires client_id, client_secret, and redirect_uri,
    // but we don't need them for API calls, only the access token
    Ok(sheets::Client::new(
        String::new(), // client_id (not needed for API calls with access token)
        String::new(), // client_secret (not needed for API calls with access token)
        String::new(), // redirect_uri (not needed for API calls with access token)
        access_token.to_string(),
        String::new(), // refresh_token (not needed, we handle refresh ourselves)
    ))
}

fn map_client_error(e: sheets::ClientError) -> anyhow::Error {
    let error_name = match &e {
        ClientError::EmptyRefreshToken => "EmptyRefreshToken".to_string(),
        ClientError::FromUtf8Error(inner) => format!("FromUtf8Error {inner}"),
        ClientError::UrlParserError(inner) => format!("UrlParserError {inner}"),
        ClientError::SerdeJsonError(inner) => format!("SerdeJsonError {inner}"),
        ClientError::ReqwestError(inner) => format!("ReqwestError {inner}"),
        ClientError::InvalidHeaderValue(inner) => format!("InvalidHeaderValue {inner}"),
        ClientError::ReqwestMiddleWareError(inner) => format!("ReqwestMiddleWareError {inner}"),
        ClientError::HttpError { .. } => "HttpError".to_string(),
        ClientError::Other(_) => "Other".to_string(),
    };
    Err::<(), ClientError>(e).context(error_name).err().unwrap()
}
