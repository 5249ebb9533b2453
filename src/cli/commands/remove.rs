//! Remove command - delete stored artifacts

use super::{descriptor_for, open_store};
use crate::artifact::ArtifactDescriptor;
use crate::audit::{self, AuditLog};
use crate::cli::args::RemoveArgs;
use crate::config::Config;
use crate::error::{DepotError, DepotResult};
use crate::ui::{self, UiContext};

/// Execute the remove command
pub async fn execute(args: RemoveArgs, config: &Config) -> DepotResult<()> {
    let ctx = UiContext::detect().with_auto_yes(args.yes);
    let store = open_store(config)?;
    let audit = AuditLog::new(config);

    let removed: Vec<ArtifactDescriptor> = if args.all {
        let entries = store.entries();
        if entries.is_empty() {
            ui::step_info(&ctx, "No artifacts in store");
            return Ok(());
        }
        let message = format!(
            "Remove all {} artifact file(s) from {}?",
            entries.len(),
            store.root().display()
        );
        if !ui::confirm(&ctx, &message, false).await? {
            ui::step_warn_hint(&ctx, "Nothing removed", "Pass --yes to skip the prompt");
            return Ok(());
        }
        store.remove_all()?;
        entries.into_iter().map(|e| e.descriptor).collect()
    } else {
        let key = args
            .key
            .ok_or_else(|| DepotError::User("Specify a key or --all".to_string()))?;
        match args.format {
            Some(ref format) => {
                let descriptor = descriptor_for(&key, Some(format));
                if store.remove(&descriptor)? {
                    vec![descriptor]
                } else {
                    Vec::new()
                }
            }
            None => {
                let descriptors = store.descriptors(&key);
                store.remove_key(&key)?;
                descriptors
            }
        }
    };

    store.save()?;
    for descriptor in &removed {
        audit.log_descriptor(audit::ARTIFACT_REMOVED, descriptor).await;
    }

    if removed.is_empty() {
        ui::step_info(&ctx, "Nothing to remove");
    } else {
        ui::step_ok(&ctx, &format!("Removed {} artifact file(s)", removed.len()));
    }
    Ok(())
}
