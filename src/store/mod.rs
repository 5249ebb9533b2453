//! Local artifact storage
//!
//! - [`coordinate`]: descriptor to file path mapping
//! - [`index`]: persisted record of stored descriptors
//! - [`sink`]: the begin/commit/abort write protocol
//! - [`local`]: the store itself

pub mod checksum;
pub mod coordinate;
pub mod index;
pub mod local;
pub mod sink;

pub use checksum::{Checksums, Expectations, PROP_DOWNLOAD_SIZE, PROP_SHA256};
pub use coordinate::{Coordinate, CoordinateMapper};
pub use index::{ArtifactIndex, IndexedDescriptor};
pub use local::{ConsistencyReport, LocalArtifactStore, StoreWriteSink};
pub use sink::{pump, ArtifactSink, ProbeSink, RawArtifactSink, RawStreamSink, SinkState, StreamSink};
