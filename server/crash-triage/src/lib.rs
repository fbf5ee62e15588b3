//! Crash signature triage: deterministic, rule-based.
//!
//! Resolves channel versions, builds weekly crash trends per signature, drops
//! noisy (pre-existing) signatures, reduces linked bugs to one representative bug,
//! and renders the bug comment plus the status flags to set.
//!
//! Data sources are traits (`source`); `snapshot` implements them over a JSON dataset.

pub mod bugs;
pub mod config;
pub mod engine;
pub mod error;
pub mod ignored;
pub mod lifecycle;
pub mod noise;
pub mod report;
pub mod snapshot;
pub mod source;
pub mod trend;
pub mod types;
pub mod versions;

pub use config::Config;
pub use engine::{AnalyzeRequest, Engine};
pub use error::{SourceError, TriageError};
pub use report::generate_bug_report;
pub use snapshot::SnapshotSource;
pub use types::{Analysis, BugReport, Channel, SignatureAnalysis};
