//! Verify command - check the index against the files on disk

use super::{blocking, open_store};
use crate::cli::args::VerifyArgs;
use crate::config::Config;
use crate::error::{DepotError, DepotResult};
use crate::ui::{self, UiContext};
use std::fs;
use std::sync::Arc;

/// Execute the verify command
pub async fn execute(args: VerifyArgs, config: &Config) -> DepotResult<()> {
    let ctx = UiContext::detect();
    let store = open_store(config)?;
    ui::intro(&ctx, &format!("Verifying {}", store.root().display()));

    // Opening already dropped entries whose files vanished
    if store.is_dirty() {
        ui::step_warn(&ctx, "Index referenced files that no longer exist");
    }

    let report = blocking({
        let store = Arc::clone(&store);
        move || store.verify()
    })
    .await?;

    ui::key_value(&ctx, "checked", &report.checked.to_string());
    for entry in &report.missing {
        ui::step_warn(&ctx, &format!("Missing file for {}", entry.descriptor));
    }
    for entry in &report.corrupt {
        ui::step_warn(
            &ctx,
            &format!("{} does not match its recorded checksum", entry.descriptor),
        );
    }
    for orphan in &report.orphans {
        ui::step_warn(&ctx, &format!("Unindexed file {}", orphan.display()));
    }

    if !args.repair {
        if store.is_dirty() {
            store.save()?;
        }
        if report.is_clean() && report.orphans.is_empty() {
            ui::outro_success(&ctx, "Store is consistent");
            return Ok(());
        }
        ui::outro_warn(&ctx, "Store has problems");
        return Err(DepotError::Inconsistent(format!(
            "{} missing, {} corrupt, {} unindexed",
            report.missing.len(),
            report.corrupt.len(),
            report.orphans.len()
        )));
    }

    let repaired = store.repair(&report)?;
    let mut deleted = 0;
    for orphan in &report.orphans {
        let path = store.root().join(orphan);
        match fs::remove_file(&path) {
            Ok(()) => deleted += 1,
            Err(e) => ui::step_warn(&ctx, &format!("Could not delete {}: {}", path.display(), e)),
        }
    }
    store.save()?;

    ui::outro_success(
        &ctx,
        &format!(
            "Repaired {} index entr{}, deleted {} unindexed file(s)",
            repaired,
            if repaired == 1 { "y" } else { "ies" },
            deleted
        ),
    );
    Ok(())
}
