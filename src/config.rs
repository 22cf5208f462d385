//! Configuration file handling.
//!
//! The configuration file is stored at `$LEDSYNC_HOME/config.json` and contains settings for
//! the sync: the ledger Google Sheet URL, the aggregator endpoint, the export filter, the email
//! search, and the pipeline's wait/retry budgets. Credential files live in
//! `$LEDSYNC_HOME/.secrets/` and downloaded export artifacts in `$LEDSYNC_HOME/artifacts/`.

use crate::merge::KeyPolicy;
use crate::{utils, Result};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "ledsync";
const CONFIG_VERSION: u8 = 1;
const SECRETS: &str = ".secrets";
const ARTIFACTS: &str = "artifacts";
const CLIENT_SECRET_JSON: &str = "client_secret.json";
const TOKEN_JSON: &str = "token.json";
const AGGREGATOR_LOGIN_JSON: &str = "aggregator_login.json";
const SESSION_JSON: &str = "session.json";
const CONFIG_JSON: &str = "config.json";

/// The export is always written to the same place so a failed run leaves something to inspect
/// and a re-run overwrites it.
const EXPORT_CSV: &str = "export.csv";
const EMAIL_HTML: &str = "export_email.html";

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$LEDSYNC_HOME` and from there it loads `$LEDSYNC_HOME/config.json`. It provides
/// paths to other items that are either configurable or are expected in a certain location
/// within the home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    secrets: PathBuf,
    artifacts: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    spreadsheet_id: String,
}

impl Config {
    /// Creates the data directory, its subdirectories and:
    /// - Creates an initial `config.json` file using `sheet_url` along with default settings
    /// - Moves `secret_file` (the Google OAuth client credentials) and `aggregator_login_file`
    ///   (the aggregator email/password JSON) into their default locations in `.secrets/`.
    ///
    /// # Errors
    /// - Returns an error if any file operations fail.
    pub async fn create(
        dir: impl Into<PathBuf>,
        secret_file: &Path,
        aggregator_login_file: &Path,
        sheet_url: &str,
        aggregator_url: &str,
    ) -> Result<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the ledsync home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        let secrets_dir = root.join(SECRETS);
        utils::make_dir(&secrets_dir).await?;
        let artifacts_dir = root.join(ARTIFACTS);
        utils::make_dir(&artifacts_dir).await?;

        // Move the credential files to their default locations in the data dir.
        utils::rename(secret_file, secrets_dir.join(CLIENT_SECRET_JSON)).await?;
        utils::rename(
            aggregator_login_file,
            secrets_dir.join(AGGREGATOR_LOGIN_JSON),
        )
        .await?;

        let config_path = root.join(CONFIG_JSON);
        let config_file = ConfigFile {
            sheet_url: sheet_url.to_string(),
            aggregator_url: aggregator_url.to_string(),
            ..ConfigFile::default()
        };
        config_file.save(&config_path).await?;

        let spreadsheet_id = extract_spreadsheet_id(sheet_url)
            .context("Failed to extract spreadsheet ID from sheet URL")?
            .to_string();

        Ok(Self {
            root,
            secrets: secrets_dir,
            artifacts: artifacts_dir,
            config_path,
            config_file,
            spreadsheet_id,
        })
    }

    /// This will
    /// - validate that `ledsync_home` exists and that the config file exists
    /// - load the config file
    /// - validate that the secrets and artifacts directories exist
    /// - return the loaded configuration object
    pub async fn load(ledsync_home: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = ledsync_home.into();
        let root = utils::canonicalize(&maybe_relative).await?;

        let _ = utils::read_dir(&root)
            .await
            .context("Ledsync home is missing")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;

        let spreadsheet_id = extract_spreadsheet_id(&config_file.sheet_url)
            .context("Failed to extract spreadsheet ID from sheet URL")?
            .to_string();

        let config = Self {
            root: root.clone(),
            secrets: root.join(SECRETS),
            artifacts: root.join(ARTIFACTS),
            config_path,
            config_file,
            spreadsheet_id,
        };
        if !config.secrets.is_dir() {
            bail!(
                "The secrets directory is missing '{}'",
                config.secrets.display()
            )
        }
        if !config.artifacts.is_dir() {
            bail!(
                "The artifacts directory is missing '{}'",
                config.artifacts.display()
            )
        }
        Ok(config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    pub fn artifacts(&self) -> &Path {
        &self.artifacts
    }

    pub fn sheet_url(&self) -> &str {
        &self.config_file.sheet_url
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn worksheet(&self) -> &str {
        &self.config_file.worksheet
    }

    pub fn aggregator_url(&self) -> &str {
        &self.config_file.aggregator_url
    }

    pub fn category_filter(&self) -> Option<&str> {
        self.config_file.category_filter.as_deref()
    }

    /// The incremental window: once the ledger has rows, only this many days are requested.
    pub fn lookback_days(&self) -> u32 {
        self.config_file.lookback_days
    }

    pub fn email_from(&self) -> &str {
        &self.config_file.email_from
    }

    pub fn email_subject(&self) -> &str {
        &self.config_file.email_subject
    }

    pub fn key_policy(&self) -> Option<KeyPolicy> {
        self.config_file.key_policy
    }

    /// How long to wait after the export request before the first mailbox check.
    pub fn settle_wait(&self) -> Duration {
        Duration::from_secs(self.config_file.settle_wait_seconds)
    }

    pub fn poll_max_attempts(&self) -> u32 {
        self.config_file.poll_max_attempts
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_secs(self.config_file.poll_wait_seconds)
    }

    pub fn retry_max_attempts(&self) -> u32 {
        self.config_file.retry_max_attempts
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.config_file.retry_wait_seconds)
    }

    /// Where the fetched export is persisted for verification and later read. Kept in place
    /// after the run, success or failure, because it aids debugging of the external automation.
    pub fn export_path(&self) -> PathBuf {
        self.artifacts.join(EXPORT_CSV)
    }

    /// Where the matched export email's HTML body is saved for inspection.
    pub fn email_html_path(&self) -> PathBuf {
        self.artifacts.join(EMAIL_HTML)
    }

    /// Returns the stored `client_secret_path` if it is absolute, otherwise resolves the
    /// relative path.
    pub fn client_secret_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.client_secret_path())
    }

    /// Returns the stored `token_path` if it is absolute, otherwise resolves the relative path.
    pub fn token_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.token_path())
    }

    pub fn aggregator_login_path(&self) -> PathBuf {
        self.secrets.join(AGGREGATOR_LOGIN_JSON)
    }

    pub fn session_path(&self) -> PathBuf {
        self.secrets.join(SESSION_JSON)
    }

    /// Checks if `p` is relative, and if so, resolves it. Returns it unchanged if it is
    /// absolute.
    fn resolve_secrets_file_path(&self, p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "ledsync",
///   "config_version": 1,
///   "sheet_url": "https://docs.google.com/spreadsheets/d/7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL",
///   "worksheet": "Transactions",
///   "aggregator_url": "https://app.example.com",
///   "category_filter": "Piano Income",
///   "lookback_days": 30,
///   "email_from": "exports@example.com",
///   "email_subject": "Transaction export complete",
///   "settle_wait_seconds": 30,
///   "poll_max_attempts": 10,
///   "poll_wait_seconds": 30,
///   "retry_max_attempts": 3,
///   "retry_wait_seconds": 5
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "ledsync"
    #[serde(default = "default_app_name")]
    app_name: String,

    /// Configuration file version
    #[serde(default = "default_config_version")]
    config_version: u8,

    /// URL to the ledger Google Sheet
    sheet_url: String,

    /// Name of the worksheet (tab) that holds the ledger rows
    #[serde(default = "default_worksheet")]
    worksheet: String,

    /// Base URL of the financial aggregator's API
    aggregator_url: String,

    /// Restrict the export to one transaction category; `null` exports everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category_filter: Option<String>,

    /// Incremental window in days, used once the ledger already has rows
    #[serde(default = "default_lookback_days")]
    lookback_days: u32,

    /// Sender address the export email is expected from; empty matches any sender
    #[serde(default)]
    email_from: String,

    /// Subject line the export email is expected to carry
    #[serde(default = "default_email_subject")]
    email_subject: String,

    /// Pins the deduplication key policy; `null` resolves it from the export's columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_policy: Option<KeyPolicy>,

    /// Seconds to wait after the export request before the first mailbox check
    #[serde(default = "default_settle_wait_seconds")]
    settle_wait_seconds: u64,

    /// Mailbox polling attempts before giving up on the export email
    #[serde(default = "default_poll_max_attempts")]
    poll_max_attempts: u32,

    /// Seconds between mailbox polling attempts
    #[serde(default = "default_poll_wait_seconds")]
    poll_wait_seconds: u64,

    /// Retry attempts for the trigger, fetch and append stages
    #[serde(default = "default_retry_max_attempts")]
    retry_max_attempts: u32,

    /// Seconds between retry attempts
    #[serde(default = "default_retry_wait_seconds")]
    retry_wait_seconds: u64,

    /// Path to the OAuth 2.0 client credentials file (optional, relative to config.json or
    /// absolute). Defaults to $LEDSYNC_HOME/.secrets/client_secret.json if not specified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_secret_path: Option<PathBuf>,

    /// Path to the OAuth token file (optional, relative to config.json or absolute)
    /// Defaults to $LEDSYNC_HOME/.secrets/token.json if not specified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_path: Option<PathBuf>,
}

fn default_app_name() -> String {
    APP_NAME.to_string()
}

fn default_config_version() -> u8 {
    CONFIG_VERSION
}

fn default_worksheet() -> String {
    String::from("Transactions")
}

fn default_lookback_days() -> u32 {
    30
}

fn default_email_subject() -> String {
    String::from("Transaction export complete")
}

fn default_settle_wait_seconds() -> u64 {
    30
}

fn default_poll_max_attempts() -> u32 {
    10
}

fn default_poll_wait_seconds() -> u64 {
    30
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_wait_seconds() -> u64 {
    5
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            config_version: default_config_version(),
            sheet_url: String::new(),
            worksheet: default_worksheet(),
            aggregator_url: String::new(),
            category_filter: None,
            lookback_days: default_lookback_days(),
            email_from: String::new(),
            email_subject: default_email_subject(),
            key_policy: None,
            settle_wait_seconds: default_settle_wait_seconds(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_wait_seconds: default_poll_wait_seconds(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_wait_seconds: default_retry_wait_seconds(),
            client_secret_path: None,
            token_path: None,
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile asynchronously from the specified path.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;

        let config: ConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );

        Ok(config)
    }

    /// Saves the ConfigFile to the specified path.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }

    /// Gets the client secret path.
    ///
    /// If the path is relative, it should be interpreted as relative to the config.json file.
    /// If None, defaults to $LEDSYNC_HOME/.secrets/client_secret.json
    pub fn client_secret_path(&self) -> PathBuf {
        self.client_secret_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON))
    }

    /// Gets the token path.
    ///
    /// If the path is relative, it should be interpreted as relative to the config.json file.
    /// If None, defaults to $LEDSYNC_HOME/.secrets/token.json
    pub fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(TOKEN_JSON))
    }
}

/// Extracts the spreadsheet ID from a Google Sheets URL
///
/// # Arguments
/// * `url` - The Google Sheets URL (e.g., "https://docs.google.com/spreadsheets/d/SPREADSHEET_ID/...")
///
/// # Returns
/// The spreadsheet ID or an error if the URL format is invalid. Returns an empty string if the
/// URL is empty.
fn extract_spreadsheet_id(url: &str) -> Result<&str> {
    if url.is_empty() {
        return Ok(url);
    }

    // URL format: https://docs.google.com/spreadsheets/d/SPREADSHEET_ID/...
    // or: https://docs.google.com/spreadsheets/d/SPREADSHEET_ID?foo=bar
    let parts: Vec<&str> = url.split('/').collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == "d" && i + 1 < parts.len() {
            // Extract the ID and remove any query parameters or fragments
            let id_part = parts[i + 1];
            let id = id_part
                .split('?')
                .next()
                .unwrap_or(id_part)
                .split('#')
                .next()
                .unwrap_or(id_part);
            return Ok(id);
        }
    }
    Err(anyhow::anyhow!(
        "Invalid Google Sheets URL format. Expected: https://docs.google.com/spreadsheets/d/SPREADSHEET_ID"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_login_files(dir: &Path) -> (PathBuf, PathBuf) {
        let secret = dir.join("client_secret.json");
        utils::write(&secret, "{}").await.unwrap();
        let login = dir.join("aggregator_login.json");
        utils::write(&login, r#"{"email":"a@b.c","password":"hunter2"}"#)
            .await
            .unwrap();
        (secret, login)
    }

    #[tokio::test]
    async fn test_config_create() {
        let dir = TempDir::new().unwrap();
        let home_dir = dir.path().join("ledsync_home");
        let (secret, login) = write_login_files(dir.path()).await;
        let sheet_url = "https://docs.google.com/spreadsheets/d/7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL/edit";

        let config = Config::create(
            &home_dir,
            &secret,
            &login,
            sheet_url,
            "https://app.example.com",
        )
        .await
        .unwrap();

        assert_eq!(sheet_url, config.sheet_url());
        assert_eq!(
            "7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL",
            config.spreadsheet_id()
        );
        assert!(config.secrets().is_dir());
        assert!(config.artifacts().is_dir());
        assert!(config.client_secret_path().is_file());
        assert!(config.aggregator_login_path().is_file());
    }

    #[tokio::test]
    async fn test_config_create_then_load() {
        let dir = TempDir::new().unwrap();
        let home_dir = dir.path().join("home");
        let (secret, login) = write_login_files(dir.path()).await;
        let url = "https://example.com/spreadsheets/d/MySheetIDX";

        Config::create(&home_dir, &secret, &login, url, "https://api.example.com")
            .await
            .unwrap();
        let config = Config::load(&home_dir).await.unwrap();

        assert_eq!("MySheetIDX", config.spreadsheet_id());
        assert_eq!("Transactions", config.worksheet());
        assert_eq!("https://api.example.com", config.aggregator_url());
        assert_eq!(config.retry_max_attempts(), 3);
        assert_eq!(config.poll_wait(), Duration::from_secs(30));
        assert_eq!(config.export_path(), config.artifacts().join("export.csv"));
    }

    #[tokio::test]
    async fn test_config_file_load_with_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let json = r#"{
            "sheet_url": "https://docs.google.com/spreadsheets/d/minimal",
            "aggregator_url": "https://app.example.com"
        }"#;
        utils::write(&config_path, json).await.unwrap();

        let config = ConfigFile::load(&config_path).await.unwrap();
        assert_eq!(config.worksheet, "Transactions");
        assert_eq!(config.email_subject, "Transaction export complete");
        assert_eq!(config.lookback_days, 30);
        assert_eq!(config.settle_wait_seconds, 30);
        assert_eq!(
            config.client_secret_path(),
            PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON)
        );
        assert_eq!(config.token_path(), PathBuf::from(SECRETS).join(TOKEN_JSON));
    }

    #[tokio::test]
    async fn test_config_file_load_invalid_app_name() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let json = r#"{
            "app_name": "wrong_app",
            "sheet_url": "https://docs.google.com/spreadsheets/d/test",
            "aggregator_url": "https://app.example.com"
        }"#;
        utils::write(&config_path, json).await.unwrap();

        let result = ConfigFile::load(&config_path).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid app_name"));
    }

    #[tokio::test]
    async fn test_config_file_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let original = ConfigFile {
            sheet_url: String::from("https://docs.google.com/spreadsheets/d/test123"),
            aggregator_url: String::from("https://app.example.com"),
            category_filter: Some(String::from("Piano Income")),
            key_policy: Some(KeyPolicy::Composite),
            ..ConfigFile::default()
        };
        original.save(&config_path).await.unwrap();
        let loaded = ConfigFile::load(&config_path).await.unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_extract_spreadsheet_id() {
        let url = "https://docs.google.com/spreadsheets/d/7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL/edit";
        assert_eq!(
            extract_spreadsheet_id(url).unwrap(),
            "7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL"
        );

        let url2 = "https://docs.google.com/spreadsheets/d/ABC123?foo=bar";
        assert_eq!(extract_spreadsheet_id(url2).unwrap(), "ABC123");

        assert!(extract_spreadsheet_id("https://example.com/invalid").is_err());
        assert_eq!(extract_spreadsheet_id("").unwrap(), "");
    }
}
