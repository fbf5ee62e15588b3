//! Point-in-time JSON dataset serving as crash, bug and version source.
//!
//! ```json
//! {
//!   "products": {"Firefox": {"channels": {"release": [{"major": 48, "shipped": "2016-07-25", "versions": ["48.0"]}]}}},
//!   "crashes": [{"signature": "s", "product": "Firefox", "channel": "release", "version": "48.0",
//!                "date": "2016-09-13", "process_type": "content", "platform": "Windows", "count": 3}],
//!   "bugs": [{"id": 1, "status": "NEW", "signatures": ["s"]}]
//! }
//! ```

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{SourceError, TriageError};
use crate::lifecycle::{self, BugRecord};
use crate::source::{BugSource, CrashQuery, CrashSource, Facet, VersionSource};
use crate::types::{BugId, BugLifecycle, BugRelations, Channel, ProcessType, StatusFlags};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
  #[serde(default)]
  pub products: BTreeMap<String, ProductReleases>,
  #[serde(default)]
  pub crashes: Vec<CrashRow>,
  #[serde(default)]
  pub bugs: Vec<BugRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductReleases {
  #[serde(default)]
  pub channels: BTreeMap<Channel, Vec<Release>>,
}

/// One major version on one channel.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
  pub major: u32,
  pub shipped: NaiveDate,
  #[serde(default)]
  pub versions: Vec<String>,
}

/// Crash count aggregated per day and dimensions.
#[derive(Debug, Clone, Deserialize)]
pub struct CrashRow {
  pub signature: String,
  pub product: String,
  pub channel: Channel,
  pub version: String,
  pub date: NaiveDate,
  #[serde(default)]
  pub process_type: ProcessType,
  #[serde(default)]
  pub platform: String,
  pub count: u64,
}

impl CrashRow {
  fn matches(&self, query: &CrashQuery<'_>) -> bool {
    self.product == query.product
      && self.channel == query.channel
      && query.range.contains(self.date)
      && query.versions.iter().any(|v| *v == self.version)
      && query.signature.map_or(true, |s| s == self.signature)
      && query.process_type.map_or(true, |p| p == self.process_type)
  }
}

/// Read-only source over a loaded `Snapshot`.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSource {
  products: BTreeMap<String, ProductReleases>,
  crashes: Vec<CrashRow>,
  bugs: BTreeMap<BugId, BugRecord>,
}

impl SnapshotSource {
  pub fn new(snapshot: Snapshot) -> Self {
    Self {
      products: snapshot.products,
      crashes: snapshot.crashes,
      bugs: snapshot.bugs.into_iter().map(|b| (b.id, b)).collect(),
    }
  }

  pub fn from_json(raw: &str) -> Result<Self, TriageError> {
    let snapshot: Snapshot = serde_json::from_str(raw)?;
    Ok(Self::new(snapshot))
  }

  pub fn load(path: &Path) -> Result<Self, TriageError> {
    let raw = std::fs::read_to_string(path)?;
    let source = Self::from_json(&raw)?;
    debug!(
      path = %path.display(),
      crash_rows = source.crashes.len(),
      bugs = source.bugs.len(),
      "dataset loaded"
    );
    Ok(source)
  }

  fn releases(&self, product: &str, channel: Channel) -> &[Release] {
    self
      .products
      .get(product)
      .and_then(|p| p.channels.get(&channel))
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  fn release(&self, product: &str, channel: Channel, major: u32) -> Option<&Release> {
    self.releases(product, channel).iter().find(|r| r.major == major)
  }
}

impl CrashSource for SnapshotSource {
  fn crash_count(&self, query: &CrashQuery<'_>) -> Result<u64, SourceError> {
    Ok(
      self
        .crashes
        .iter()
        .filter(|row| row.matches(query))
        .fold(0u64, |total, row| total.saturating_add(row.count)),
    )
  }

  fn crash_facet(&self, query: &CrashQuery<'_>, facet: Facet) -> Result<Vec<(String, u64)>, SourceError> {
    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
    for row in self.crashes.iter().filter(|row| row.matches(query)) {
      let value = match facet {
        Facet::Signature => row.signature.as_str(),
        Facet::Platform => row.platform.as_str(),
      };
      if value.is_empty() {
        continue;
      }
      let total = totals.entry(value).or_insert(0);
      *total = total.saturating_add(row.count);
    }

    let mut out: Vec<(String, u64)> = totals.into_iter().map(|(v, n)| (v.to_string(), n)).collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(out)
  }
}

impl BugSource for SnapshotSource {
  fn bug_lifecycle(&self, bug: BugId, flags: &StatusFlags) -> Result<Option<BugLifecycle>, SourceError> {
    Ok(self.bugs.get(&bug).map(|record| lifecycle::derive(record, flags)))
  }

  fn bug_relations(&self, bug: BugId) -> Result<Option<BugRelations>, SourceError> {
    Ok(self.bugs.get(&bug).map(BugRecord::relations))
  }

  fn linked_bugs(&self, signature: &str) -> Result<Vec<BugId>, SourceError> {
    Ok(
      self
        .bugs
        .values()
        .filter(|b| b.signatures.iter().any(|s| s == signature))
        .map(|b| b.id)
        .collect(),
    )
  }

  fn bug_signatures(&self, bug: BugId) -> Result<Vec<String>, SourceError> {
    Ok(self.bugs.get(&bug).map(|b| b.signatures.clone()).unwrap_or_default())
  }

  fn bug_product(&self, bug: BugId) -> Result<Option<String>, SourceError> {
    Ok(
      self
        .bugs
        .get(&bug)
        .filter(|b| !b.product.is_empty())
        .map(|b| b.product.clone()),
    )
  }
}

impl VersionSource for SnapshotSource {
  fn channel_base_version(&self, product: &str, channel: Channel, as_of: NaiveDate) -> Result<Option<u32>, SourceError> {
    Ok(
      self
        .releases(product, channel)
        .iter()
        .filter(|r| r.shipped <= as_of)
        .max_by_key(|r| (r.shipped, r.major))
        .map(|r| r.major),
    )
  }

  fn channel_version_shipped_date(
    &self,
    product: &str,
    channel: Channel,
    version: u32,
  ) -> Result<Option<NaiveDate>, SourceError> {
    Ok(self.release(product, channel, version).map(|r| r.shipped))
  }

  fn channel_versions(&self, product: &str, channel: Channel, version: u32) -> Result<Vec<String>, SourceError> {
    Ok(
      self
        .release(product, channel, version)
        .map(|r| r.versions.clone())
        .unwrap_or_default(),
    )
  }
}
