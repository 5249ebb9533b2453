//! Fetch command - make a batch of artifacts available locally

use super::{blocking, build_provider, open_store};
use crate::artifact::{ArtifactDescriptor, ArtifactKey};
use crate::audit::{self, AuditLog};
use crate::cli::args::FetchArgs;
use crate::config::Config;
use crate::error::{DepotError, DepotResult};
use crate::mirror::MirroringProvider;
use crate::ui::{self, FetchMark, FetchProgress, UiContext};
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

enum Outcome {
    Local,
    Mirrored(Vec<ArtifactDescriptor>),
    Missing,
    Failed(DepotError),
}

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> DepotResult<()> {
    let ctx = UiContext::detect();
    let store = open_store(config)?;
    let provider = Arc::new(build_provider(
        config,
        Arc::clone(&store),
        &args.remotes,
        args.policy.map(Into::into),
    )?);
    let audit = AuditLog::new(config);
    let jobs = args.jobs.unwrap_or(config.mirror.parallel_fetches).max(1);

    let mut seen = HashSet::new();
    let keys: Vec<ArtifactKey> = args
        .keys
        .into_iter()
        .filter(|key| seen.insert(key.clone()))
        .collect();
    let total = keys.len();
    debug!("Fetching {} key(s) with {} job(s)", total, jobs);

    let progress = FetchProgress::new(&ctx, total as u64);
    let mut results = stream::iter(keys)
        .map(|key| {
            let provider = Arc::clone(&provider);
            async move {
                let outcome = fetch_one(provider, key.clone()).await;
                (key, outcome)
            }
        })
        .buffer_unordered(jobs);

    let mut mirrored = 0usize;
    let mut local = 0usize;
    let mut missing = Vec::new();
    let mut failures = Vec::new();
    while let Some((key, outcome)) = results.next().await {
        let name = key.to_string();
        match outcome {
            Outcome::Local => {
                local += 1;
                progress.on_done(&name, FetchMark::Local);
            }
            Outcome::Mirrored(descriptors) => {
                mirrored += 1;
                progress.on_done(&name, FetchMark::Mirrored);
                for descriptor in &descriptors {
                    audit.log_descriptor(audit::ARTIFACT_MIRRORED, descriptor).await;
                }
            }
            Outcome::Missing => {
                progress.on_done(&name, FetchMark::Missing);
                missing.push(key);
            }
            Outcome::Failed(e) => {
                progress.on_done(&name, FetchMark::Failed);
                audit
                    .log(
                        audit::ARTIFACT_MIRROR_FAILED,
                        &serde_json::json!({ "key": name, "error": e.to_string() }),
                    )
                    .await;
                failures.push((key, e));
            }
        }
    }
    progress.finish();
    drop(results);

    // Keep whatever did get mirrored, even when other keys failed
    store.save()?;

    for key in &missing {
        ui::step_warn(&ctx, &format!("{} not found in the store or any remote", key));
    }
    for (key, e) in &failures {
        ui::step_error_detail(&ctx, &key.to_string(), &e.to_string());
    }

    let unavailable = missing.len() + failures.len();
    if unavailable == 0 {
        ui::outro_success(
            &ctx,
            &format!(
                "{} artifact(s) available ({} mirrored, {} already local)",
                total, mirrored, local
            ),
        );
        return Ok(());
    }

    if missing.is_empty() && failures.len() == 1 {
        if let Some((_, e)) = failures.pop() {
            return Err(e);
        }
    }
    Err(DepotError::User(format!(
        "{} of {} artifact(s) could not be fetched",
        unavailable, total
    )))
}

async fn fetch_one(provider: Arc<MirroringProvider>, key: ArtifactKey) -> Outcome {
    let result = blocking(move || {
        let canonical = ArtifactDescriptor::canonical(key.clone());
        let before = provider.descriptors(&key);
        let was_local = provider.contains(&canonical);

        if !provider.ensure_available(&key)? {
            return Ok(Outcome::Missing);
        }

        let added: Vec<ArtifactDescriptor> = provider
            .descriptors(&key)
            .into_iter()
            .filter(|d| !before.contains(d))
            .collect();
        if was_local && added.is_empty() {
            Ok(Outcome::Local)
        } else {
            Ok(Outcome::Mirrored(added))
        }
    })
    .await;

    result.unwrap_or_else(Outcome::Failed)
}
