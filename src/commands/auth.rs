//! Authentication command handlers for the Google OAuth flow.
//!
//! This module implements the CLI commands for:
//! - `ledsync auth` - Initial OAuth consent flow
//! - `ledsync auth --verify` - Verify and refresh authentication

use crate::api::TokenProvider;
use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;

/// Handles the `ledsync auth` command - runs the OAuth consent flow.
///
/// This is the ONLY command that should open a browser for OAuth authentication. It guides the
/// user through granting access to the ledger sheet and the mailbox, then saves tokens to
/// token.json with the required scopes.
///
/// # Errors
/// Returns an error if the OAuth flow fails or if client_secret.json is missing
pub async fn auth(config: &Config) -> Result<Out<()>> {
    let _ = TokenProvider::initialize(config.client_secret_path(), config.token_path()).await?;
    Ok("Authorization complete; tokens saved".into())
}

/// Handles the `ledsync auth --verify` command - verifies authentication.
///
/// This command NEVER opens a browser or triggers an interactive OAuth flow. It only verifies
/// that the existing cached tokens are valid, refreshing silently if needed. If the token is
/// missing, invalid, or has the wrong scopes, this command fails with an error message telling
/// the user to run `ledsync auth`.
pub async fn auth_verify(config: &Config) -> Result<Out<()>> {
    let mut token_provider = TokenProvider::load(config.client_secret_path(), config.token_path())
        .await
        .context(
            "Unable to use the existing tokens found in the token JSON file. \n\n\
            You should run 'ledsync auth' (without the --verify flag).",
        )?;
    token_provider
        .refresh()
        .await
        .context("Unable to refresh the token")?;
    Ok("Your OAuth token is valid!".into())
}
