//! Engine configuration with sane defaults, optionally loaded from TOML.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::TriageError;
use crate::ignored;

/// Tunable thresholds for signature triage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Signatures never analyzed. In TOML either `"'a', 'b'"` or `["a", "b"]`.
  #[serde(deserialize_with = "ignored::deserialize")]
  pub ignored: BTreeSet<String>,
  /// Crash count in the oldest trend week at or above which a signature is noisy.
  pub noise_threshold: u64,
  /// Minimum number of trend weeks before the noise rule applies.
  pub noise_window: usize,
  /// Trailing weeks per trend (channels with an older start date get more).
  pub lookback_weeks: usize,
  /// Top signatures per channel considered during discovery.
  pub signature_limit: usize,
  /// Top signatures per channel and process type that get a rank.
  pub rank_limit: usize,
  /// Max weekly columns in the report trend table.
  pub report_weeks: usize,
  /// Tracker products whose bugs may be selected, per analyzed product.
  /// Products without an entry accept bugs from any tracker product.
  pub bug_products: BTreeMap<String, BTreeSet<String>>,
}

fn products(names: &[&str]) -> BTreeSet<String> {
  names.iter().map(|n| n.to_string()).collect()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      ignored: BTreeSet::new(),
      noise_threshold: 5,
      noise_window: 10,
      lookback_weeks: 7,
      signature_limit: 100,
      rank_limit: 300,
      report_weeks: 7,
      bug_products: [
        (
          "Firefox".to_string(),
          products(&["Core", "External Software Affecting Firefox", "Firefox", "NSPR", "NSS", "Toolkit"]),
        ),
        (
          "FennecAndroid".to_string(),
          products(&["Core", "Firefox for Android", "NSPR", "NSS", "Toolkit"]),
        ),
      ]
      .into_iter()
      .collect(),
    }
  }
}

impl Config {
  pub fn from_toml_str(raw: &str) -> Result<Self, TriageError> {
    let config: Config = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load(path: &Path) -> Result<Self, TriageError> {
    let raw = std::fs::read_to_string(path)?;
    let config = Self::from_toml_str(&raw)?;
    tracing::debug!(path = %path.display(), ignored = config.ignored.len(), "configuration loaded");
    Ok(config)
  }

  fn validate(&self) -> Result<(), TriageError> {
    if self.lookback_weeks == 0 {
      return Err(TriageError::validation("lookback_weeks", "must be at least 1"));
    }
    if self.noise_window == 0 {
      return Err(TriageError::validation("noise_window", "must be at least 1"));
    }
    if self.report_weeks == 0 {
      return Err(TriageError::validation("report_weeks", "must be at least 1"));
    }
    Ok(())
  }
}
