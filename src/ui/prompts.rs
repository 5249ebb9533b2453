//! Confirmation prompt with a non-interactive fallback

use super::context::UiContext;
use crate::error::{DepotError, DepotResult};

/// Ask a yes/no question
///
/// `--yes` answers yes. Without a terminal the default is returned unasked.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> DepotResult<bool> {
    if ctx.auto_yes() {
        eprintln!("  {} (auto-approved)", message);
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| DepotError::Internal(format!("prompt task failed: {}", e)))?
    .map_err(|e| DepotError::User(format!("Prompt failed: {}", e)))
}
