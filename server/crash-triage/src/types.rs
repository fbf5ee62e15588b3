//! Core types for the triage engine (domain models + JSON output contracts).

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::SourceError;

pub type BugId = u64;

// ---------------------------------------------------------------------------
// Channel (closed set, fixed order nightly -> esr)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
  Nightly,
  Aurora,
  Beta,
  Release,
  Esr,
}

impl Channel {
  pub const ALL: [Channel; 5] = [
    Channel::Nightly,
    Channel::Aurora,
    Channel::Beta,
    Channel::Release,
    Channel::Esr,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Nightly => "nightly",
      Self::Aurora => "aurora",
      Self::Beta => "beta",
      Self::Release => "release",
      Self::Esr => "esr",
    }
  }

  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "nightly" => Some(Self::Nightly),
      "aurora" | "dev-edition" | "devedition" | "aurora/dev-edition" => Some(Self::Aurora),
      "beta" => Some(Self::Beta),
      "release" => Some(Self::Release),
      "esr" => Some(Self::Esr),
      _ => None,
    }
  }
}

impl fmt::Display for Channel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Channel {
  type Err = SourceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_str_loose(s).ok_or_else(|| SourceError::UnknownChannel(s.to_string()))
  }
}

impl Serialize for Channel {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for Channel {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}

// ---------------------------------------------------------------------------
// Crash process types and ranks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
  #[default]
  Browser,
  Content,
  Plugin,
  Gpu,
}

impl ProcessType {
  pub const ALL: [ProcessType; 4] = [
    ProcessType::Browser,
    ProcessType::Content,
    ProcessType::Plugin,
    ProcessType::Gpu,
  ];

  /// Column title in the rank table.
  pub fn label(self) -> &'static str {
    match self {
      Self::Browser => "Browser",
      Self::Content => "Content",
      Self::Plugin => "Plugin",
      Self::Gpu => "GPU",
    }
  }
}

/// Position of a signature in the top crashers of a channel, per process type.
/// `None` means "not ranked".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrashRank {
  pub browser: Option<u32>,
  pub content: Option<u32>,
  pub plugin: Option<u32>,
  pub gpu: Option<u32>,
}

impl CrashRank {
  pub fn get(&self, process: ProcessType) -> Option<u32> {
    match process {
      ProcessType::Browser => self.browser,
      ProcessType::Content => self.content,
      ProcessType::Plugin => self.plugin,
      ProcessType::Gpu => self.gpu,
    }
  }

  pub fn set(&mut self, process: ProcessType, rank: u32) {
    let slot = match process {
      ProcessType::Browser => &mut self.browser,
      ProcessType::Content => &mut self.content,
      ProcessType::Plugin => &mut self.plugin,
      ProcessType::Gpu => &mut self.gpu,
    };
    *slot = Some(rank);
  }

  pub fn is_empty(&self) -> bool {
    ProcessType::ALL.iter().all(|p| self.get(*p).is_none())
  }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Half-open day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
  pub start: NaiveDate,
  pub end: NaiveDate,
}

impl DateRange {
  pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
    Self { start, end }
  }

  /// Days from `start` through `last`, both included.
  pub fn through(start: NaiveDate, last: NaiveDate) -> Self {
    Self::new(start, last.checked_add_days(Days::new(1)).unwrap_or(last))
  }

  pub fn contains(&self, day: NaiveDate) -> bool {
    self.start <= day && day < self.end
  }
}

/// Sentinel date of empty classification buckets.
pub fn beginning_of_time() -> DateTime<Utc> {
  Utc
    .with_ymd_and_hms(1468, 2, 3, 0, 0, 0)
    .single()
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// Channel -> status flag field name on the bug tracker.
pub type StatusFlags = BTreeMap<Channel, String>;

/// Resolved channel versions for one analysis run. Channels that could not be
/// resolved are absent from every map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
  /// Earliest channel start date (floor for crash queries).
  pub start_date: NaiveDate,
  /// `start_date` widened by the trend look-back window.
  pub min_date: NaiveDate,
  pub base_versions: BTreeMap<Channel, u32>,
  pub start_dates: BTreeMap<Channel, NaiveDate>,
  pub versions: BTreeMap<Channel, Vec<String>>,
}

impl VersionInfo {
  pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
    self.base_versions.keys().copied()
  }
}

// ---------------------------------------------------------------------------
// Trends
// ---------------------------------------------------------------------------

/// Weekly crash counts per channel; index 0 is the week holding the end date,
/// higher indices are older weeks.
pub type Trend = BTreeMap<Channel, Vec<u64>>;

// ---------------------------------------------------------------------------
// Bugs
// ---------------------------------------------------------------------------

/// Lifecycle snapshot of one bug.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BugLifecycle {
  pub assigned: bool,
  pub fixed: bool,
  pub patched: bool,
  pub resolved: bool,
  pub incomplete: bool,
  pub private: bool,
  /// Channels whose status flag explicitly asks for no change.
  pub no_change: BTreeSet<Channel>,
  /// Chronological; first is the earliest fix.
  pub fixed_dates: Vec<DateTime<Utc>>,
  pub last_change: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BugRelations {
  pub dupe_of: Option<BugId>,
  pub see_also: Vec<BugId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
  ResolvedFixedPatched,
  ResolvedFixedUnpatched,
  ResolvedUnfixed,
  UnresolvedAssigned,
  UnresolvedUnassigned,
}

impl Bucket {
  /// Selection order: most actionable first.
  pub const PRIORITY: [Bucket; 5] = [
    Bucket::UnresolvedUnassigned,
    Bucket::UnresolvedAssigned,
    Bucket::ResolvedUnfixed,
    Bucket::ResolvedFixedUnpatched,
    Bucket::ResolvedFixedPatched,
  ];

  pub fn is_fixed(self) -> bool {
    matches!(self, Bucket::ResolvedFixedPatched | Bucket::ResolvedFixedUnpatched)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketEntry {
  pub bug: Option<BugId>,
  pub date: DateTime<Utc>,
}

impl Default for BucketEntry {
  fn default() -> Self {
    Self {
      bug: None,
      date: beginning_of_time(),
    }
  }
}

/// Most recent bug per lifecycle bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LastBugClassification {
  pub resolved_fixed_patched: BucketEntry,
  pub resolved_fixed_unpatched: BucketEntry,
  pub resolved_unfixed: BucketEntry,
  pub unresolved_assigned: BucketEntry,
  pub unresolved_unassigned: BucketEntry,
}

impl LastBugClassification {
  pub fn get(&self, bucket: Bucket) -> &BucketEntry {
    match bucket {
      Bucket::ResolvedFixedPatched => &self.resolved_fixed_patched,
      Bucket::ResolvedFixedUnpatched => &self.resolved_fixed_unpatched,
      Bucket::ResolvedUnfixed => &self.resolved_unfixed,
      Bucket::UnresolvedAssigned => &self.unresolved_assigned,
      Bucket::UnresolvedUnassigned => &self.unresolved_unassigned,
    }
  }

  fn get_mut(&mut self, bucket: Bucket) -> &mut BucketEntry {
    match bucket {
      Bucket::ResolvedFixedPatched => &mut self.resolved_fixed_patched,
      Bucket::ResolvedFixedUnpatched => &mut self.resolved_fixed_unpatched,
      Bucket::ResolvedUnfixed => &mut self.resolved_unfixed,
      Bucket::UnresolvedAssigned => &mut self.unresolved_assigned,
      Bucket::UnresolvedUnassigned => &mut self.unresolved_unassigned,
    }
  }

  /// Keep `bug` in `bucket` if its date is strictly later than the current entry.
  pub fn offer(&mut self, bucket: Bucket, bug: BugId, date: DateTime<Utc>) {
    let entry = self.get_mut(bucket);
    if entry.bug.is_none() || date > entry.date {
      *entry = BucketEntry {
        bug: Some(bug),
        date,
      };
    }
  }

  /// Buckets currently holding `bug`.
  pub fn buckets_of(&self, bug: BugId) -> Vec<Bucket> {
    Bucket::PRIORITY
      .iter()
      .copied()
      .filter(|b| self.get(*b).bug == Some(bug))
      .collect()
  }
}

// ---------------------------------------------------------------------------
// Analysis output (JSON contract)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignatureAnalysis {
  /// Affected channels with their crash total since the channel start date.
  pub leftovers: Vec<(Channel, u64)>,
  pub bugs: BTreeSet<BugId>,
  pub platforms: Vec<String>,
  pub rank: BTreeMap<Channel, CrashRank>,
  pub trend: Trend,
  pub resolved: bool,
  pub private: bool,
  #[serde(rename = "bugid")]
  pub selected_bug: Option<BugId>,
  pub classification: LastBugClassification,
  /// `no_change` channels of the selected bug.
  pub no_change: BTreeSet<Channel>,
}

impl SignatureAnalysis {
  pub fn affected_channels(&self) -> impl Iterator<Item = Channel> + '_ {
    self.leftovers.iter().map(|(channel, _)| *channel)
  }

  pub fn leftover(&self, channel: Channel) -> Option<u64> {
    self
      .leftovers
      .iter()
      .find(|(c, _)| *c == channel)
      .map(|(_, count)| *count)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
  pub product: String,
  pub end_date: NaiveDate,
  pub start_date: NaiveDate,
  pub min_date: NaiveDate,
  pub base_versions: BTreeMap<Channel, u32>,
  pub start_dates: BTreeMap<Channel, NaiveDate>,
  pub status_flags: StatusFlags,
  pub signatures: BTreeMap<String, SignatureAnalysis>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
  pub body: String,
}

/// Payload for the bug-tracker write path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BugReport {
  pub comment: Comment,
  pub flags: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
  }

  #[test]
  fn channel_parsing_is_loose_but_closed() {
    assert_eq!(Channel::from_str_loose("Nightly"), Some(Channel::Nightly));
    assert_eq!(Channel::from_str_loose(" dev-edition "), Some(Channel::Aurora));
    assert_eq!(Channel::from_str_loose("ESR"), Some(Channel::Esr));
    assert_eq!(Channel::from_str_loose("canary"), None);
    assert!(matches!(
      "canary".parse::<Channel>(),
      Err(SourceError::UnknownChannel(name)) if name == "canary"
    ));
  }

  #[test]
  fn channel_order_matches_release_train() {
    let mut channels = vec![Channel::Esr, Channel::Beta, Channel::Nightly, Channel::Release, Channel::Aurora];
    channels.sort();
    assert_eq!(channels, Channel::ALL.to_vec());
  }

  #[test]
  fn channel_json_roundtrip_rejects_unknown() {
    let map: BTreeMap<Channel, u32> = serde_json::from_str(r#"{"beta": 49, "release": 48}"#).unwrap();
    assert_eq!(map[&Channel::Beta], 49);
    assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"beta":49,"release":48}"#);
    assert!(serde_json::from_str::<BTreeMap<Channel, u32>>(r#"{"canary": 1}"#).is_err());
  }

  #[test]
  fn empty_classification_holds_sentinel() {
    let c = LastBugClassification::default();
    for bucket in Bucket::PRIORITY {
      assert_eq!(c.get(bucket).bug, None);
      assert_eq!(c.get(bucket).date, beginning_of_time());
    }
    assert_eq!(beginning_of_time().format("%Y-%m-%d").to_string(), "1468-02-03");
  }

  #[test]
  fn offer_keeps_strictly_later_date() {
    let mut c = LastBugClassification::default();
    c.offer(Bucket::ResolvedUnfixed, 1, at(2016, 1, 1));
    c.offer(Bucket::ResolvedUnfixed, 2, at(2015, 1, 1));
    assert_eq!(c.get(Bucket::ResolvedUnfixed).bug, Some(1));
    c.offer(Bucket::ResolvedUnfixed, 3, at(2016, 1, 1));
    assert_eq!(c.get(Bucket::ResolvedUnfixed).bug, Some(1));
    c.offer(Bucket::ResolvedUnfixed, 4, at(2017, 1, 1));
    assert_eq!(c.get(Bucket::ResolvedUnfixed).bug, Some(4));
  }

  #[test]
  fn classification_serializes_with_bucket_names() {
    let json = serde_json::to_value(LastBugClassification::default()).unwrap();
    assert!(json.get("resolved-fixed-patched").is_some());
    assert!(json.get("unresolved-unassigned").is_some());
  }

  #[test]
  fn date_range_is_half_open() {
    let d = |day| NaiveDate::from_ymd_opt(2016, 9, day).unwrap();
    let r = DateRange::through(d(12), d(14));
    assert_eq!(r.end, d(15));
    assert!(r.contains(d(12)));
    assert!(r.contains(d(14)));
    assert!(!r.contains(d(15)));
  }
}
