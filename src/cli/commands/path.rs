//! Path command - print the file backing a stored artifact

use super::{descriptor_for, open_store};
use crate::cli::args::PathArgs;
use crate::config::Config;
use crate::error::{DepotError, DepotResult};

/// Execute the path command
///
/// Only consults the local store; nothing is mirrored.
pub async fn execute(args: PathArgs, config: &Config) -> DepotResult<()> {
    let store = open_store(config)?;
    let descriptor = descriptor_for(&args.key, args.format.as_deref());

    let path = store
        .file_for(&descriptor)
        .ok_or_else(|| DepotError::ArtifactNotFound(descriptor.to_string()))?;
    println!("{}", path.display());
    Ok(())
}
