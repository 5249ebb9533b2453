//! Store layout served over HTTP

use super::remote::{abort_not_found, CachedIndex, FetchStatus, RemoteArtifactSource};
use crate::artifact::{ArtifactDescriptor, ArtifactKey};
use crate::error::{DepotError, DepotResult};
use crate::store::index::ArtifactIndex;
use crate::store::local::{INDEX_FILE, META_DIR};
use crate::store::sink::{pump, RawArtifactSink};
use std::io::Read;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default overall timeout for a single request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Remote store reachable at an HTTP(S) base URL
///
/// Expects the same layout as a local store: the index at
/// `<base>/.meta/index.json` and files at their relative paths.
pub struct HttpSource {
    name: String,
    base: String,
    agent: ureq::Agent,
    index: CachedIndex,
}

impl HttpSource {
    pub fn new(name: impl Into<String>, base_url: &str) -> Self {
        Self::with_timeout(name, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(name: impl Into<String>, base_url: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            name: name.into(),
            base: base_url.trim_end_matches('/').to_string(),
            agent,
            index: CachedIndex::default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url_for(&self, relative: &Path) -> String {
        let segments: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => {
                    Some(urlencoding::encode(&s.to_string_lossy()).into_owned())
                }
                _ => None,
            })
            .collect();
        format!("{}/{}", self.base, segments.join("/"))
    }

    fn index(&self) -> DepotResult<Arc<ArtifactIndex>> {
        self.index.get_or_load(|| {
            let url = format!("{}/{}/{}", self.base, META_DIR, INDEX_FILE);
            debug!("Loading index of {} from {}", self.name, url);

            let response = match self.agent.get(&url).call() {
                Ok(response) => response,
                Err(ureq::Error::StatusCode(404)) => return Ok(ArtifactIndex::default()),
                Err(e) => return Err(DepotError::remote(&self.name, format!("GET {}: {}", url, e))),
            };

            let mut bytes = Vec::new();
            response
                .into_body()
                .into_reader()
                .read_to_end(&mut bytes)
                .map_err(|e| DepotError::remote(&self.name, format!("reading {}: {}", url, e)))?;
            Ok(ArtifactIndex::parse(&bytes))
        })
    }
}

impl RemoteArtifactSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptors(&self, key: &ArtifactKey) -> DepotResult<Vec<ArtifactDescriptor>> {
        Ok(self.index()?.descriptors(key))
    }

    fn fetch_into(
        &self,
        descriptor: &ArtifactDescriptor,
        sink: &mut dyn RawArtifactSink,
    ) -> DepotResult<FetchStatus> {
        let index = self.index()?;
        let Some(entry) = index.get(descriptor) else {
            return abort_not_found(sink);
        };

        let url = self.url_for(&entry.path);
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(404)) => return abort_not_found(sink),
            Err(e) => {
                sink.abort_write()?;
                return Err(DepotError::remote(&self.name, format!("GET {}: {}", url, e)));
            }
        };

        let mut reader = response.into_body().into_reader();
        let bytes = pump(&mut reader, sink)?;
        debug!("Fetched {} ({} bytes) from {}", descriptor, bytes, url);
        Ok(FetchStatus::Transferred)
    }
}
