//! Raw bug-tracker records and their reduction to a `BugLifecycle`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{BugId, BugLifecycle, BugRelations, StatusFlags};

const UNASSIGNED: &str = "nobody@mozilla.org";
const RESOLVED_STATUSES: [&str; 3] = ["RESOLVED", "VERIFIED", "CLOSED"];
const NO_CHANGE_VALUES: [&str; 3] = ["wontfix", "fix-optional", "disabled"];
const FIXED_VALUES: [&str; 2] = ["fixed", "verified"];

/// One bug as exported by the tracker. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BugRecord {
  pub id: BugId,
  /// Tracker product the bug is filed under (`Core`, `Toolkit`, ...).
  #[serde(default)]
  pub product: String,
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub resolution: String,
  #[serde(default)]
  pub assigned_to: String,
  /// Security groups; any group makes the bug private.
  #[serde(default)]
  pub groups: Vec<String>,
  /// Custom fields, status flags included (`cf_status_firefox51 = "affected"`).
  #[serde(default)]
  pub flags: BTreeMap<String, String>,
  #[serde(default)]
  pub history: Vec<HistoryChange>,
  #[serde(default)]
  pub comments: Vec<CommentRecord>,
  #[serde(default)]
  pub attachments: Vec<Attachment>,
  #[serde(default)]
  pub dupe_of: Option<BugId>,
  #[serde(default)]
  pub see_also: Vec<BugId>,
  /// Crash signatures referenced by the bug.
  #[serde(default)]
  pub signatures: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryChange {
  pub when: DateTime<Utc>,
  pub field: String,
  #[serde(default)]
  pub removed: String,
  #[serde(default)]
  pub added: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentRecord {
  pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
  #[serde(default)]
  pub is_patch: bool,
  #[serde(default)]
  pub is_obsolete: bool,
}

impl BugRecord {
  pub fn relations(&self) -> BugRelations {
    BugRelations {
      dupe_of: self.dupe_of,
      see_also: self.see_also.clone(),
    }
  }
}

/// Reduce a raw record to lifecycle booleans, fix dates and last change.
pub fn derive(bug: &BugRecord, status_flags: &StatusFlags) -> BugLifecycle {
  let resolved = RESOLVED_STATUSES.contains(&bug.status.to_ascii_uppercase().as_str());
  let incomplete = bug.resolution.eq_ignore_ascii_case("INCOMPLETE");

  let mut fixed_dates: Vec<DateTime<Utc>> = bug
    .history
    .iter()
    .filter(|c| c.field == "resolution" && c.added.eq_ignore_ascii_case("FIXED"))
    .map(|c| c.when)
    .collect();
  fixed_dates.sort();

  let flag_values = status_flags
    .iter()
    .filter_map(|(channel, name)| bug.flags.get(name).map(|v| (*channel, v.to_ascii_lowercase())));

  let mut no_change = BTreeSet::new();
  let mut flag_fixed = false;
  for (channel, value) in flag_values {
    if NO_CHANGE_VALUES.contains(&value.as_str()) {
      no_change.insert(channel);
    }
    if FIXED_VALUES.contains(&value.as_str()) {
      flag_fixed = true;
    }
  }

  let has_patch = bug.attachments.iter().any(|a| a.is_patch && !a.is_obsolete);
  let assignee = bug.assigned_to.trim();

  let last_change = bug
    .history
    .iter()
    .map(|c| c.when)
    .chain(bug.comments.iter().map(|c| c.time))
    .max();

  BugLifecycle {
    assigned: !assignee.is_empty() && !assignee.eq_ignore_ascii_case(UNASSIGNED),
    fixed: !fixed_dates.is_empty(),
    patched: has_patch || flag_fixed,
    resolved,
    incomplete,
    private: !bug.groups.is_empty(),
    no_change,
    fixed_dates,
    last_change,
  }
}
