//! The Gmail-backed `LinkResolver`: searches the mailbox for the export-complete email and
//! pulls the download link out of its HTML body.
//!
//! The matched email's HTML is saved to the artifacts directory so a bad link extraction can
//! be diagnosed after the fact.

use crate::api::{EmailSearch, LinkResolver, TokenProvider};
use crate::{utils, Config, Result, SyncError};
use anyhow::Context;
use async_trait::async_trait;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::{alphabet, Engine};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// The anchor text the export email puts on its download link.
const DOWNLOAD_ANCHOR_TEXT: &str = "Download file";

/// Gmail returns body data in the URL-safe base64 alphabet, sometimes padded and sometimes
/// not.
const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub(super) struct GmailLinkResolver {
    config: Config,
    http: reqwest::Client,
    token_provider: Mutex<TokenProvider>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    payload: MessagePart,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    mime_type: Option<String>,
    body: Option<MessageBody>,
    parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    data: Option<String>,
}

impl GmailLinkResolver {
    pub(super) fn new(config: Config, token_provider: TokenProvider) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Unable to build the Gmail HTTP client")?;
        Ok(Self {
            config,
            http,
            token_provider: Mutex::new(token_provider),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut provider = self.token_provider.lock().await;
        Ok(provider.token_with_refresh().await?.to_string())
    }

    /// The most recent message id matching `search`, or `None` when nothing matches yet.
    async fn newest_matching_message(
        &self,
        token: &str,
        search: &EmailSearch,
    ) -> Result<Option<String>> {
        let mut query = format!("subject:\"{}\"", search.subject);
        if !search.from.is_empty() {
            query = format!("from:{} {query}", search.from);
        }
        debug!("Searching the mailbox with query: {query}");

        let response = self
            .http
            .get(format!("{GMAIL_BASE}/messages"))
            .query(&[("q", query.as_str()), ("maxResults", "5")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(transient)?
            .error_for_status()
            .map_err(transient)?;

        let list: MessageList = response
            .json()
            .await
            .context("Unable to parse the Gmail message list")?;

        // The list is newest-first; the most recent export email wins.
        Ok(list
            .messages
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|m| m.id))
    }

    /// Fetches the message and returns its decoded HTML body.
    async fn message_html(&self, token: &str, id: &str) -> Result<String> {
        let response = self
            .http
            .get(format!("{GMAIL_BASE}/messages/{id}"))
            .query(&[("format", "full")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(transient)?
            .error_for_status()
            .map_err(transient)?;

        let message: Message = response
            .json()
            .await
            .context("Unable to parse the Gmail message")?;

        let data = find_html_part(&message.payload)
            .context("The export email has no HTML body to search for the download link")?;
        let bytes = BASE64_URL
            .decode(data)
            .context("Unable to decode the email body")?;
        String::from_utf8(bytes).context("The email body is not valid UTF-8")
    }
}

#[async_trait]
impl LinkResolver for GmailLinkResolver {
    async fn resolve(&self, search: &EmailSearch) -> Result<Url> {
        let token = self.access_token().await?;

        let id = match self.newest_matching_message(&token, search).await? {
            Some(id) => id,
            None => return Err(SyncError::NotFoundYet.into()),
        };
        debug!("Found a matching export email: {id}");

        let html = self.message_html(&token, &id).await?;

        // Keep the email body around for inspection.
        let html_path = self.config.email_html_path();
        utils::write(&html_path, &html).await?;
        debug!("Saved the email body to {}", html_path.display());

        let link = extract_download_link(&html).ok_or_else(|| {
            SyncError::Transient(String::from(
                "the export email does not contain a download link",
            ))
        })?;
        info!("Found the export download link");
        Url::parse(&link).with_context(|| format!("The download link is not a valid URL: {link}"))
    }
}

/// Finds the first `text/html` part of the message, depth-first, and returns its raw base64
/// data.
fn find_html_part(part: &MessagePart) -> Option<&str> {
    if part.mime_type.as_deref() == Some("text/html") {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            return Some(data);
        }
    }
    part.parts
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find_map(find_html_part)
}

/// Finds the href of the anchor whose text is the download call-to-action. The email markup
/// varies, so this scans for the anchor text and then walks backwards to the nearest `href`
/// attribute rather than parsing the document.
fn extract_download_link(html: &str) -> Option<String> {
    let pos = html.find(DOWNLOAD_ANCHOR_TEXT)?;
    let href_start = html[..pos].rfind("href=\"")?;
    let value_start = href_start + "href=\"".len();
    let value_end = html[value_start..].find('"')? + value_start;
    let link = &html[value_start..value_end];
    if link.is_empty() {
        return None;
    }
    Some(link.to_string())
}

fn transient(e: reqwest::Error) -> anyhow::Error {
    SyncError::Transient(format!("mailbox request failed: {e}")).into()
}
