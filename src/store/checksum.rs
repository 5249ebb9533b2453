//! Size and SHA-256 bookkeeping for stored artifacts

use crate::artifact::ArtifactDescriptor;
use crate::error::{DepotError, DepotResult};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Descriptor property holding the artifact size in bytes
pub const PROP_DOWNLOAD_SIZE: &str = "download.size";

/// Descriptor property holding the hex SHA-256 of the artifact
pub const PROP_SHA256: &str = "download.checksum.sha-256";

/// Measured size and digest of a byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksums {
    pub size: u64,
    pub sha256: String,
}

impl Checksums {
    /// Record these checksums in a descriptor's properties
    pub fn record(&self, descriptor: &mut ArtifactDescriptor) {
        descriptor
            .properties
            .insert(PROP_DOWNLOAD_SIZE.to_string(), self.size.to_string());
        descriptor
            .properties
            .insert(PROP_SHA256.to_string(), self.sha256.clone());
    }
}

/// Checksums a descriptor declares for its bytes
///
/// Unparseable sizes are ignored rather than treated as a mismatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectations {
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

impl Expectations {
    pub fn from_properties(descriptor: &ArtifactDescriptor) -> Self {
        Self {
            size: descriptor
                .property(PROP_DOWNLOAD_SIZE)
                .and_then(|s| s.trim().parse().ok()),
            sha256: descriptor
                .property(PROP_SHA256)
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_none() && self.sha256.is_none()
    }

    /// Compare measured checksums against these expectations
    pub fn verify(&self, descriptor: &ArtifactDescriptor, actual: &Checksums) -> DepotResult<()> {
        if let Some(expected) = self.size {
            if expected != actual.size {
                return Err(DepotError::SizeMismatch {
                    descriptor: descriptor.to_string(),
                    expected,
                    actual: actual.size,
                });
            }
        }
        if let Some(expected) = &self.sha256 {
            if *expected != actual.sha256 {
                return Err(DepotError::ChecksumMismatch {
                    descriptor: descriptor.to_string(),
                    expected: expected.clone(),
                    actual: actual.sha256.clone(),
                });
            }
        }
        Ok(())
    }

    /// Whether an existing file satisfies these expectations
    ///
    /// A file is never adopted on trust: empty expectations do not match.
    pub fn matches_file(&self, path: &Path) -> bool {
        !self.is_empty() && file_checksums(path).is_ok_and(|actual| self.matches(&actual))
    }

    /// Whether measured checksums satisfy every declared value; never true when nothing is declared
    pub fn matches(&self, actual: &Checksums) -> bool {
        !self.is_empty()
            && self.size.map_or(true, |s| s == actual.size)
            && self.sha256.as_ref().map_or(true, |h| *h == actual.sha256)
    }
}

impl From<&Checksums> for Expectations {
    fn from(sums: &Checksums) -> Self {
        Self {
            size: Some(sums.size),
            sha256: Some(sums.sha256.clone()),
        }
    }
}

/// Writer adapter that hashes and counts everything passing through it
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Checksums of everything written so far
    pub fn checksums(&self) -> Checksums {
        Checksums {
            size: self.size,
            sha256: hex::encode(self.hasher.clone().finalize()),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Measure the size and SHA-256 of a file
pub fn file_checksums(path: &Path) -> DepotResult<Checksums> {
    let mut file = File::open(path)
        .map_err(|e| DepotError::io(format!("opening {}", path.display()), e))?;

    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| DepotError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok(Checksums {
        size,
        sha256: hex::encode(hasher.finalize()),
    })
}
