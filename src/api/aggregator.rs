//! The API-based `ExportTrigger` strategy: a JSON session with the aggregator's web API.
//!
//! A saved session token is probed first so that most runs are non-interactive. When the
//! session is stale we log in with the saved credentials, and if the aggregator demands a
//! one-time code the `AuthPrompt` collaborator supplies it. The export request itself is a
//! single POST carrying the filter criteria.

use crate::api::files::{File, LoginFile, SessionFile};
use crate::api::{AuthPrompt, ExportTrigger, FilterCriteria};
use crate::{Config, Result, SyncError};
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

pub(super) struct ApiExportTrigger {
    http: reqwest::Client,
    base_url: Url,
    login: LoginFile,
    prompt: Arc<dyn AuthPrompt>,
    session: Mutex<File<SessionFile>>,
}

/// The aggregator's login response: either a session token, or a demand for a one-time code.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct LoginResponse {
    token: Option<String>,
    #[serde(default)]
    mfa_required: bool,
}

impl ApiExportTrigger {
    pub(super) async fn new(config: &Config, prompt: Arc<dyn AuthPrompt>) -> Result<Self> {
        let base_url = Url::parse(config.aggregator_url())
            .with_context(|| format!("Invalid aggregator URL '{}'", config.aggregator_url()))?;
        let login = LoginFile::load(&config.aggregator_login_path()).await?;

        // A missing session file just means we have never logged in from this home directory.
        let session_path = config.session_path();
        let session = match File::load(&session_path).await {
            Ok(file) => file,
            Err(_) => File::new(&session_path, SessionFile::default()),
        };

        let http = reqwest::Client::builder()
            .build()
            .context("Unable to build the aggregator HTTP client")?;

        Ok(Self {
            http,
            base_url,
            login,
            prompt,
            session: Mutex::new(session),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Unable to build the aggregator endpoint '{path}'"))
    }

    /// Returns a working session token, reusing the saved one when it still passes the probe.
    async fn ensure_session(&self) -> Result<String> {
        let mut session = self.session.lock().await;

        if let Some(token) = session.data().token() {
            debug!("Probing the saved aggregator session");
            if self.probe(token).await? {
                debug!("The saved aggregator session is still valid");
                return Ok(token.to_string());
            }
            info!("The saved aggregator session is stale; logging in again");
        }

        let token = self.log_in().await?;
        session.data_mut().set_token(&token);
        session.save().await?;
        Ok(token)
    }

    /// True when the saved session token is still accepted.
    async fn probe(&self, token: &str) -> Result<bool> {
        let response = self
            .http
            .get(self.endpoint("api/me")?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transient)?;
        Ok(response.status().is_success())
    }

    /// Password login, with a one-time code round when the aggregator asks for one.
    async fn log_in(&self) -> Result<String> {
        info!("Logging in to the aggregator");
        let response = self
            .http
            .post(self.endpoint("api/auth/login")?)
            .json(&json!({
                "email": self.login.email(),
                "password": self.login.password(),
            }))
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Transient(format!(
                "aggregator login failed with status {status}: {body}"
            ))
            .into());
        }

        let login: LoginResponse = response
            .json()
            .await
            .context("Unable to parse the aggregator login response")?;

        if let Some(token) = login.token {
            info!("Aggregator login successful");
            return Ok(token);
        }
        if !login.mfa_required {
            bail!("The aggregator login returned neither a session token nor an MFA challenge");
        }

        // The one-time code is an explicit suspension point: we wait on the prompt and resume
        // when the user supplies the code, or abandon this attempt if they cancel.
        let code = self
            .prompt
            .one_time_code("Enter the one-time code sent to your device")
            .await?;

        let response = self
            .http
            .post(self.endpoint("api/auth/mfa")?)
            .json(&json!({
                "email": self.login.email(),
                "code": code,
            }))
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(SyncError::Transient(format!(
                "aggregator one-time code verification failed with status {status}"
            ))
            .into());
        }

        let verified: LoginResponse = response
            .json()
            .await
            .context("Unable to parse the aggregator MFA response")?;
        let token = verified
            .token
            .context("The aggregator MFA response did not include a session token")?;
        info!("Aggregator login successful (one-time code accepted)");
        Ok(token)
    }
}

#[async_trait]
impl ExportTrigger for ApiExportTrigger {
    async fn trigger(&self, criteria: &FilterCriteria) -> Result<()> {
        let token = self.ensure_session().await?;

        let body = json!({
            "format": "csv",
            "category": criteria.category,
            "start_date": criteria.start_date.map(|d| d.to_string()),
            "end_date": criteria.end_date.map(|d| d.to_string()),
        });
        debug!("Requesting an export with criteria {body}");

        let response = self
            .http
            .post(self.endpoint("api/transactions/export")?)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Transient(format!(
                "the export request failed with status {status}: {body}"
            ))
            .into());
        }

        info!("Export requested; the aggregator will email a download link");
        Ok(())
    }
}

fn transient(e: reqwest::Error) -> anyhow::Error {
    SyncError::Transient(format!("aggregator request failed: {e}")).into()
}
