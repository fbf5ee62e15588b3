//! Noise classification: a signature whose whole volume is older than its
//! regression point predates the suspected regression.
//!
//! The regression point is a week offset into the trend (0 is the week holding
//! the end date). The signature is noisy on a channel when the trend covers at
//! least `window` weeks counted from that point, the regression week itself shows
//! no crashes, and the oldest week reaches `threshold`.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::types::{Channel, Trend};

/// Channel plus the week offset of its regression point.
pub type AffectedChannel = (Channel, usize);

/// Noise rule over one channel trend anchored at week `point`.
/// Histories shorter than `point + window` weeks are never noisy.
pub fn is_noisy_trend(weeks: &[u64], point: usize, threshold: u64, window: usize) -> bool {
  let Some(needed) = point.checked_add(window.max(1)) else {
    return false;
  };
  if weeks.len() < needed || weeks[point] > 0 {
    return false;
  }
  weeks.last().is_some_and(|oldest| *oldest >= threshold)
}

/// Signatures noisy on any of their affected channels.
pub fn get_noisy(
  trends: &BTreeMap<String, Trend>,
  affected: &BTreeMap<String, Vec<AffectedChannel>>,
  threshold: u64,
  window: usize,
) -> BTreeSet<String> {
  let mut noisy = BTreeSet::new();

  for (signature, channels) in affected {
    let Some(trend) = trends.get(signature) else {
      continue;
    };
    let hit = channels.iter().find(|(channel, point)| {
      trend
        .get(channel)
        .is_some_and(|weeks| is_noisy_trend(weeks, *point, threshold, window))
    });
    if let Some((channel, point)) = hit {
      debug!(%signature, %channel, point, "noisy signature");
      noisy.insert(signature.clone());
    }
  }

  noisy
}
