//! Shared test utilities for creating test environments.
//!
//! This module is only compiled when running tests (`#[cfg(test)]`).

use crate::{utils, Config};
use tempfile::TempDir;
use uuid::Uuid;

/// Test environment that sets up a ledsync home directory with a Config. Holds the TempDir to
/// keep the directory alive for the duration of the test. Each environment gets a unique
/// spreadsheet id so tests sharing the in-memory ledger registry do not collide.
pub struct TestEnv {
    _temp_dir: TempDir,
    config: Config,
}

impl TestEnv {
    /// Creates a test environment with a fully initialized home directory.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("ledsync");
        let secret_path = temp_dir.path().join("client_secret.json");
        let login_path = temp_dir.path().join("aggregator_login.json");

        // Minimal client_secret.json
        let secret_content = r#"{
            "installed": {
                "client_id": "test-client-id",
                "client_secret": "test-secret",
                "redirect_uris": ["http://localhost"],
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;
        utils::write(&secret_path, secret_content).await.unwrap();
        utils::write(&login_path, r#"{"email":"test@example.com","password":"pw"}"#)
            .await
            .unwrap();

        let rand = Uuid::new_v4().to_string().replace('-', "");
        let sheet_url = format!("https://docs.google.com/spreadsheets/d/{rand}/edit");
        let config = Config::create(
            &root,
            &secret_path,
            &login_path,
            &sheet_url,
            "https://app.example.com",
        )
        .await
        .unwrap();

        Self {
            _temp_dir: temp_dir,
            config,
        }
    }

    /// Returns a clone of the Config.
    pub fn config(&self) -> Config {
        self.config.clone()
    }
}
