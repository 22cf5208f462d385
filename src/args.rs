//! These structs provide the CLI interface for the ledsync CLI.

use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// ledsync: keeps a Google Sheet ledger up-to-date with your financial aggregator.
///
/// The purpose of this program is to ask your financial aggregator for a filtered transaction
/// export, pick the download link out of the export email, fetch the file, and append only the
/// genuinely new rows to a Google Sheet ledger. Re-running it is always safe: rows the ledger
/// already holds are recognized and skipped.
///
/// You will need to set up a Google Docs API Key and OAuth for this, and provide your
/// aggregator login in a JSON file. See `ledsync init --help` to get started.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory and initialize the configuration files.
    ///
    /// This is the first command you should run when setting up the ledsync CLI. You need to
    /// get a few things ready beforehand.
    ///
    /// - Decide what directory you want to store data in and pass this as --ledsync-home. By
    ///   default, it will be $HOME/ledsync. If you want it somewhere else then you should
    ///   specify it.
    ///
    /// - Get the URL of your ledger Google Sheet and pass it as --sheet-url.
    ///
    /// - Set up your Google API access credentials (Sheets and Gmail read-only scopes) and
    ///   download them to a file. You will pass this as --api-key.
    ///
    /// - Put your aggregator account's email and password in a JSON file like
    ///   `{"email": "...", "password": "..."}` and pass it as --aggregator-login. Both files
    ///   are moved into the data directory's .secrets directory.
    Init(InitArgs),
    /// Authenticate with the Google APIs via OAuth.
    Auth(AuthArgs),
    /// Run the sync once: request an export, retrieve it, and append the new rows to the
    /// ledger.
    Sync(SyncArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG. See the tracing-subscriber crate for instructions.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where ledsync data and configuration is held. Defaults to ~/ledsync
    #[arg(long, env = "LEDSYNC_HOME", default_value_t = default_ledsync_home())]
    ledsync_home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, ledsync_home: PathBuf) -> Self {
        Self {
            log_level,
            ledsync_home: ledsync_home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn ledsync_home(&self) -> &DisplayPath {
        &self.ledsync_home
    }
}

/// Args for the `ledsync init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The URL to your ledger Google sheet. It looks like this:
    /// https://docs.google.com/spreadsheets/d/1a7Km9FxQwRbPt82JvN4LzYpH5OcGnWsT6iDuE3VhMjX
    #[arg(long)]
    sheet_url: String,

    /// The path to your downloaded OAuth API credentials. This file will be moved to the
    /// default secrets location in the main data directory.
    #[arg(long)]
    api_key: PathBuf,

    /// The path to a JSON file with your aggregator account's email and password. This file
    /// will be moved to the default secrets location in the main data directory.
    #[arg(long)]
    aggregator_login: PathBuf,

    /// The base URL of the aggregator's API.
    #[arg(long)]
    aggregator_url: String,
}

impl InitArgs {
    pub fn sheet_url(&self) -> &str {
        &self.sheet_url
    }

    pub fn api_key(&self) -> &Path {
        &self.api_key
    }

    pub fn aggregator_login(&self) -> &Path {
        &self.aggregator_login
    }

    pub fn aggregator_url(&self) -> &str {
        &self.aggregator_url
    }
}

/// Args for the `ledsync auth` command.
#[derive(Debug, Parser, Clone)]
pub struct AuthArgs {
    /// Verify and refresh authentication without opening a browser.
    #[arg(long)]
    verify: bool,
}

impl AuthArgs {
    pub fn verify(&self) -> bool {
        self.verify
    }
}

/// Args for the `ledsync sync` command. The sync takes no flags: it runs once and its behavior
/// comes from config.json.
#[derive(Debug, Parser, Clone)]
pub struct SyncArgs {}

fn default_ledsync_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("ledsync"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --ledsync-home or LEDSYNC_HOME instead of relying on the \
                default ledsync home directory. If you continue using the program right now, \
                you may have problems!",
            );
            PathBuf::from("ledsync")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}
