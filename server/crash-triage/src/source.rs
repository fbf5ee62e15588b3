//! Interfaces of the external collaborators: crash data, bug tracker, version metadata.
//!
//! Every lookup is read-only and may run concurrently with any other one.
//! "No data" is `Ok(None)` / an empty result; `Err` means the source itself failed.

use chrono::NaiveDate;

use crate::error::SourceError;
use crate::types::{BugId, BugLifecycle, BugRelations, Channel, DateRange, ProcessType, StatusFlags};

/// Filter for crash-data lookups.
#[derive(Debug, Clone, Copy)]
pub struct CrashQuery<'a> {
  pub product: &'a str,
  pub channel: Channel,
  pub versions: &'a [String],
  pub signature: Option<&'a str>,
  pub process_type: Option<ProcessType>,
  pub range: DateRange,
}

impl<'a> CrashQuery<'a> {
  pub fn new(product: &'a str, channel: Channel, versions: &'a [String], range: DateRange) -> Self {
    Self {
      product,
      channel,
      versions,
      signature: None,
      process_type: None,
      range,
    }
  }

  pub fn signature(mut self, signature: &'a str) -> Self {
    self.signature = Some(signature);
    self
  }

  pub fn process_type(mut self, process_type: ProcessType) -> Self {
    self.process_type = Some(process_type);
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
  Signature,
  Platform,
}

pub trait CrashSource: Send + Sync {
  fn crash_count(&self, query: &CrashQuery<'_>) -> Result<u64, SourceError>;

  /// Values of `facet` among matching crashes, by count descending then value ascending.
  fn crash_facet(&self, query: &CrashQuery<'_>, facet: Facet) -> Result<Vec<(String, u64)>, SourceError>;
}

pub trait BugSource: Send + Sync {
  fn bug_lifecycle(&self, bug: BugId, flags: &StatusFlags) -> Result<Option<BugLifecycle>, SourceError>;

  fn bug_relations(&self, bug: BugId) -> Result<Option<BugRelations>, SourceError>;

  /// Bugs referencing `signature` directly.
  fn linked_bugs(&self, signature: &str) -> Result<Vec<BugId>, SourceError>;

  /// Signatures referenced by `bug`.
  fn bug_signatures(&self, bug: BugId) -> Result<Vec<String>, SourceError>;

  /// Tracker product of `bug`; `None` when unknown.
  fn bug_product(&self, bug: BugId) -> Result<Option<String>, SourceError>;
}

pub trait VersionSource: Send + Sync {
  /// Major version carried by `channel` on `as_of`.
  fn channel_base_version(&self, product: &str, channel: Channel, as_of: NaiveDate) -> Result<Option<u32>, SourceError>;

  /// Day `version` started shipping on `channel`.
  fn channel_version_shipped_date(
    &self,
    product: &str,
    channel: Channel,
    version: u32,
  ) -> Result<Option<NaiveDate>, SourceError>;

  /// Every build version string of `version` on `channel` (e.g. `48.0`, `48.0.1`).
  fn channel_versions(&self, product: &str, channel: Channel, version: u32) -> Result<Vec<String>, SourceError>;
}
