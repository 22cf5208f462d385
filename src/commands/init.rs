use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the data directory, its subdirectories and:
/// - Creates an initial `config.json` file using `sheet_url` and `aggregator_url` along with
///   default settings
/// - Moves `secret_file` and `aggregator_login_file` into their default locations in the data
///   dir.
///
/// # Arguments
/// - `ledsync_home` - The directory that will be the root of the data directory, e.g.
///   `$HOME/ledsync`
/// - `secret_file` - The downloaded OAuth 2.0 client credentials JSON needed to start the
///   Google OAuth workflow.
/// - `aggregator_login_file` - A JSON file holding the aggregator account's email and password.
/// - `sheet_url` - The URL of the Google Sheet that holds the transaction ledger.
///   e.g. https://docs.google.com/spreadsheets/d/1a7Km9FxQwRbPt82JvN4LzYpH5OcGnWsT6iDuE3VhMjX
/// - `aggregator_url` - The base URL of the aggregator's API.
///
/// # Errors
/// - Returns an error if any file operations fail.
pub async fn init(
    ledsync_home: &Path,
    secret_file: &Path,
    aggregator_login_file: &Path,
    sheet_url: &str,
    aggregator_url: &str,
) -> Result<Out<()>> {
    let _config = Config::create(
        ledsync_home,
        secret_file,
        aggregator_login_file,
        sheet_url,
        aggregator_url,
    )
    .await
    .context("Unable to create the data directory and configs")?;
    Ok("Successfully created the ledsync directory and config".into())
}
