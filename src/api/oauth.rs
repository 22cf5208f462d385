//! OAuth 2.0 authentication for the Google APIs (Sheets for the ledger, Gmail for the export
//! email).
//!
//! This module handles the complete OAuth workflow including:
//! - Loading OAuth credentials from client_secret.json
//! - Managing access and refresh tokens in token.json
//! - Running the OAuth consent flow with a local callback server
//! - Automatic token refresh when expired

use crate::api::files::{File, SecretFile, TokenFile};
use crate::api::OAUTH_SCOPES;
use crate::Result;
use anyhow::{bail, Context};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use std::convert::Infallible;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const OAUTH_CALLBACK_PORT: u16 = 3030;

/// Holds the Google OAuth credentials and tokens, refreshing the access token when it is about
/// to expire. The consent flow (which opens a browser) only ever runs from
/// [`TokenProvider::initialize`]; everything else refreshes silently or fails.
pub(crate) struct TokenProvider {
    secret: File<SecretFile>,
    token: File<TokenFile>,
}

impl TokenProvider {
    /// Runs the complete OAuth consent flow and saves the resulting tokens.
    ///
    /// This function:
    /// 1. Loads OAuth credentials from client_secret.json
    /// 2. Starts a local HTTP server on localhost:3030
    /// 3. Prints the Google consent URL for the user to open
    /// 4. Waits for the OAuth callback with the authorization code
    /// 5. Exchanges the code for access and refresh tokens
    /// 6. Saves tokens to token.json
    pub(crate) async fn initialize(
        secret_path: impl AsRef<Path>,
        token_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let secret: File<SecretFile> = File::load(secret_path.as_ref())
            .await
            .context("Unable to load the OAuth client credentials")?;

        let client = oauth_client(secret.data())?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, _csrf) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(OAUTH_SCOPES.iter().map(|s| Scope::new(s.to_string())))
            .set_pkce_challenge(pkce_challenge)
            .url();

        info!("Open this URL in your browser to authorize access:");
        info!("{auth_url}");
        info!("Waiting for the OAuth callback on http://localhost:{OAUTH_CALLBACK_PORT} ...");

        let code = receive_callback_code().await?;
        debug!("Received an authorization code from the OAuth callback");

        let http = http_client()?;
        let token_response = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(&http)
            .await
            .context("Failed to exchange the authorization code for tokens")?;

        let refresh_token = token_response
            .refresh_token()
            .context("Google did not return a refresh token; revoke the app's access and retry")?
            .secret()
            .to_string();
        let expires_at = expiry(token_response.expires_in());

        let token_file = TokenFile::new(
            OAUTH_SCOPES.iter().map(|s| s.to_string()).collect(),
            token_response.access_token().secret().to_string(),
            refresh_token,
            expires_at,
            None,
        );
        let token = File::new(token_path.as_ref(), token_file);
        token.save().await?;
        info!("Authorization successful, tokens saved");

        Ok(Self { secret, token })
    }

    /// Loads existing credentials and tokens without any interaction. Fails if the token file
    /// is missing or carries the wrong scopes; the caller should direct the user to `auth`.
    pub(crate) async fn load(
        secret_path: impl AsRef<Path>,
        token_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let secret: File<SecretFile> = File::load(secret_path.as_ref())
            .await
            .context("Unable to load the OAuth client credentials")?;
        let token: File<TokenFile> = File::load(token_path.as_ref())
            .await
            .context("Unable to load the OAuth token file")?;
        token.data().validate_scopes()?;
        Ok(Self { secret, token })
    }

    /// The current access token, which may be stale. Prefer [`Self::token_with_refresh`].
    pub(crate) fn token(&self) -> &str {
        self.token.data().access_token()
    }

    /// Returns a valid access token, refreshing it first when it is expired or about to
    /// expire. The refresh is silent (no browser).
    pub(crate) async fn token_with_refresh(&mut self) -> Result<&str> {
        if self.token.data().is_expired() {
            self.refresh().await?;
        }
        Ok(self.token())
    }

    /// Unconditionally refreshes the access token using the refresh token and saves the
    /// result.
    pub(crate) async fn refresh(&mut self) -> Result<()> {
        debug!("Refreshing the Google OAuth access token");
        let client = oauth_client(self.secret.data())?;
        let http = http_client()?;
        let refresh_token = RefreshToken::new(self.token.data().refresh_token().to_string());
        let token_response = client
            .exchange_refresh_token(&refresh_token)
            .request_async(&http)
            .await
            .context("Failed to refresh the OAuth token")?;

        let expires_at = expiry(token_response.expires_in());
        self.token.data_mut().update(
            token_response.access_token().secret().to_string(),
            expires_at,
            token_response.refresh_token().map(|t| t.secret().clone()),
        );
        self.token.save().await?;
        Ok(())
    }
}

/// Builds the oauth2 client from the installed-application credentials.
fn oauth_client(
    secret: &SecretFile,
) -> Result<
    BasicClient<
        oauth2::EndpointSet,
        oauth2::EndpointNotSet,
        oauth2::EndpointNotSet,
        oauth2::EndpointNotSet,
        oauth2::EndpointSet,
    >,
> {
    Ok(
        BasicClient::new(ClientId::new(secret.client_id().to_string()))
            .set_client_secret(ClientSecret::new(secret.client_secret().to_string()))
            .set_auth_uri(
                AuthUrl::new(secret.auth_uri().to_string()).context("Invalid auth_uri")?,
            )
            .set_token_uri(
                TokenUrl::new(secret.token_uri().to_string()).context("Invalid token_uri")?,
            )
            .set_redirect_uri(
                RedirectUrl::new(format!("http://localhost:{OAUTH_CALLBACK_PORT}"))
                    .context("Invalid redirect URI")?,
            ),
    )
}

/// The HTTP client used for token exchanges. Redirects are disabled to prevent SSRF through a
/// malicious token endpoint, per the oauth2 crate's guidance.
fn http_client() -> Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("Unable to build the OAuth HTTP client")
}

fn expiry(expires_in: Option<std::time::Duration>) -> chrono::DateTime<chrono::Utc> {
    let lifetime = expires_in.unwrap_or(std::time::Duration::from_secs(3600));
    chrono::Utc::now() + chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::hours(1))
}

/// Serves exactly one HTTP request on the callback port and returns the `code` query parameter
/// from it.
async fn receive_callback_code() -> Result<String> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", OAUTH_CALLBACK_PORT))
        .await
        .with_context(|| format!("Unable to listen on localhost:{OAUTH_CALLBACK_PORT}"))?;
    let (stream, _) = listener
        .accept()
        .await
        .context("Failed to accept the OAuth callback connection")?;

    let code: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let service_code = code.clone();
    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
        let service_code = service_code.clone();
        async move {
            let query = req.uri().query().unwrap_or_default().to_string();
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                if key == "code" {
                    *service_code.lock().unwrap() = Some(value.into_owned());
                }
            }
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(
                "Authorization received. You can close this window and return to the terminal.",
            ))))
        }
    });

    let io = hyper_util::rt::TokioIo::new(stream);
    hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service)
        .await
        .context("The OAuth callback connection failed")?;

    let code = code.lock().unwrap().take();
    match code {
        Some(code) => Ok(code),
        None => bail!("The OAuth callback did not include an authorization code"),
    }
}
