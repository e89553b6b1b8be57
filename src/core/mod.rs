pub mod checksum;
pub mod comparator;
pub mod detector;
pub mod digest;
pub mod engine;
pub mod error;
pub mod listing;
pub mod manifest;
pub mod paths;

pub use checksum::LocalManifestBuilder;
pub use comparator::{ManifestComparator, Verdict};
pub use detector::{CompletionDetector, MarkerFileDetector, RunFolderDetector};
pub use digest::{normalize_digest, DigestAlgorithm};
pub use engine::{
    ChangeEvent, FinalizeOutcome, IngestEngine, IngestStatus, ManifestStatus, RunFolderState,
    SweepEntry, SweepReport,
};
pub use error::{IngestError, ManifestOrigin};
pub use listing::RemoteManifestBuilder;
pub use manifest::{Manifest, ManifestEntry};
pub use paths::to_ingested_path;
