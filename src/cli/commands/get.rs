//! Get command - stream an artifact's bytes to a file or stdout

use super::{blocking, build_provider, descriptor_for, open_store};
use crate::artifact::ArtifactDescriptor;
use crate::audit::{self, AuditLog};
use crate::cli::args::GetArgs;
use crate::config::Config;
use crate::error::{DepotError, DepotResult};
use crate::mirror::{MirroringProvider, Retrieval};
use crate::store::{RawStreamSink, StreamSink};
use crate::ui::{self, TaskSpinner, UiContext};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Execute the get command
pub async fn execute(args: GetArgs, config: &Config) -> DepotResult<()> {
    let ctx = UiContext::detect();
    let store = open_store(config)?;
    let provider = Arc::new(build_provider(config, Arc::clone(&store), &args.remotes, None)?);
    let audit = AuditLog::new(config);

    let descriptor = descriptor_for(&args.key, args.format.as_deref());
    let was_local = store.contains(&descriptor);

    let mut spinner = TaskSpinner::new(&ctx);
    let to_file = args.output.is_some();
    if to_file && !was_local {
        spinner.start(&format!("Fetching {}...", descriptor));
    }

    let served = blocking({
        let provider = Arc::clone(&provider);
        let descriptor = descriptor.clone();
        let output = args.output.clone();
        move || serve(&provider, &descriptor, output.as_deref())
    })
    .await;

    if store.is_dirty() {
        store.save()?;
    }

    match served {
        Ok(Retrieval::Served(bytes)) => {
            if !was_local {
                audit.log_descriptor(audit::ARTIFACT_MIRRORED, &descriptor).await;
            }
            if let Some(path) = args.output {
                let message = format!("Wrote {} ({} bytes)", descriptor, bytes);
                if was_local {
                    ui::step_ok_detail(&ctx, &message, &path.display().to_string());
                } else {
                    spinner.stop(&message);
                    ui::remark(&ctx, &path.display().to_string());
                }
            }
            Ok(())
        }
        Ok(Retrieval::NotFound) => {
            spinner.clear();
            Err(DepotError::ArtifactNotFound(descriptor.to_string()))
        }
        Err(e) => {
            if to_file && !was_local {
                spinner.stop_error(&format!("Could not fetch {}", descriptor));
            }
            if matches!(e, DepotError::MirroringFailed { .. }) {
                audit
                    .log(
                        audit::ARTIFACT_MIRROR_FAILED,
                        &serde_json::json!({ "key": descriptor.key.to_string(), "error": e.to_string() }),
                    )
                    .await;
            }
            Err(e)
        }
    }
}

/// Serve the descriptor into `output`, or stdout when there is none
///
/// A file output is written next to its destination and renamed into place
/// only once every byte arrived.
fn serve(
    provider: &MirroringProvider,
    descriptor: &ArtifactDescriptor,
    output: Option<&Path>,
) -> DepotResult<Retrieval> {
    let Some(path) = output else {
        return serve_to(provider, descriptor, io::stdout()).map(|(retrieval, _)| retrieval);
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let staged = NamedTempFile::new_in(&dir)
        .map_err(|e| DepotError::io(format!("creating temp file in {}", dir.display()), e))?;

    let (retrieval, staged) = serve_to(provider, descriptor, staged)?;
    if let Retrieval::Served(_) = retrieval {
        staged
            .persist(path)
            .map_err(|e| DepotError::io(format!("writing {}", path.display()), e.error))?;
    }
    Ok(retrieval)
}

fn serve_to<W: Write>(
    provider: &MirroringProvider,
    descriptor: &ArtifactDescriptor,
    output: W,
) -> DepotResult<(Retrieval, W)> {
    if descriptor.is_canonical() {
        let mut sink = StreamSink::new(descriptor.key.clone(), output);
        let retrieval = provider.get_artifact(&mut sink)?;
        Ok((retrieval, sink.into_inner()))
    } else {
        let mut sink = RawStreamSink::new(descriptor.clone(), output);
        let retrieval = provider.get_raw_artifact(&mut sink)?;
        Ok((retrieval, sink.into_inner()))
    }
}
