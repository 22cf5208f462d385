use crate::api::{self, ConsolePrompt, Mode};
use crate::commands::Out;
use crate::sync::{SyncOrchestrator, SyncResult};
use crate::{Config, Result};
use std::sync::Arc;

/// Runs the sync pipeline once: trigger the export, resolve the download link from the
/// mailbox, fetch the file, and merge the new rows into the ledger.
pub async fn sync(config: Config, mode: Mode) -> Result<Out<SyncResult>> {
    let prompt = Arc::new(ConsolePrompt);
    let trigger = api::trigger(&config, prompt, mode).await?;
    let resolver = api::resolver(&config, mode).await?;
    let fetcher = api::fetcher(&config, mode).await?;
    let ledger = api::ledger(&config, mode).await?;

    let orchestrator = SyncOrchestrator::new(config, trigger, resolver, fetcher, ledger);
    let result = orchestrator.run().await?;

    let message = format!(
        "Appended {} new rows ({} duplicates skipped, {} incomplete rows excluded). \
        The export artifact is at {}",
        result.appended,
        result.duplicates,
        result.skipped,
        result.artifact.display()
    );
    Ok(Out::new(message, result))
}
