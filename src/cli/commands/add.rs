//! Add command - store a local file as an artifact

use super::{blocking, descriptor_for, open_store};
use crate::audit::{self, AuditLog};
use crate::cli::args::AddArgs;
use crate::config::Config;
use crate::error::{DepotError, DepotResult};
use crate::store::pump;
use crate::ui::{self, UiContext};
use std::fs::File;
use std::sync::Arc;

/// Execute the add command
pub async fn execute(args: AddArgs, config: &Config) -> DepotResult<()> {
    let ctx = UiContext::detect();
    let store = open_store(config)?;
    let audit = AuditLog::new(config);

    let mut descriptor = descriptor_for(&args.key, args.format.as_deref());
    if let Some(classifier) = args.classifier {
        descriptor = descriptor.with_classifier(classifier);
    }
    if let Some(extension) = args.extension {
        descriptor = descriptor.with_extension(extension);
    }

    let (bytes, destination) = blocking({
        let store = Arc::clone(&store);
        let descriptor = descriptor.clone();
        let file = args.file.clone();
        move || {
            let mut source = File::open(&file)
                .map_err(|e| DepotError::io(format!("opening {}", file.display()), e))?;
            let mut sink = store.new_write_sink(&descriptor)?;
            let destination = sink.destination();
            let bytes = pump(&mut source, &mut sink)?;
            Ok((bytes, destination))
        }
    })
    .await?;

    store.save()?;
    audit.log_descriptor(audit::ARTIFACT_ADDED, &descriptor).await;

    ui::step_ok_detail(
        &ctx,
        &format!("Added {} ({} bytes)", descriptor, bytes),
        &destination.display().to_string(),
    );
    Ok(())
}
