//! Weekly crash trends: Monday-based week bucketing and the per-week query batch.

use chrono::{Datelike, Days, NaiveDate};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::SourceError;
use crate::source::{CrashQuery, CrashSource};
use crate::types::{Channel, DateRange, Trend, VersionInfo};

/// Monday of the week holding `day`.
pub fn week_start(day: NaiveDate) -> NaiveDate {
  let back = day.weekday().num_days_from_monday() as u64;
  day.checked_sub_days(Days::new(back)).unwrap_or(day)
}

/// Day range of week `offset` (0 = week of `end_date`, truncated after `end_date`).
pub fn week_range(end_date: NaiveDate, offset: usize) -> DateRange {
  let monday = week_start(end_date)
    .checked_sub_days(Days::new(offset as u64 * 7))
    .unwrap_or(NaiveDate::MIN);
  let next_monday = monday.checked_add_days(Days::new(7)).unwrap_or(monday);
  if offset == 0 {
    DateRange::through(monday, end_date)
  } else {
    DateRange::new(monday, next_monday)
  }
}

/// Weeks in a trend: at least `lookback`, more when the channel started earlier.
pub fn week_count(channel_start: NaiveDate, end_date: NaiveDate, lookback: usize) -> usize {
  let span = (week_start(end_date) - week_start(channel_start)).num_days();
  let since_start = if span < 0 { 1 } else { span as usize / 7 + 1 };
  since_start.max(lookback)
}

/// Build the trend of every (signature, affected channel) pair.
///
/// One `crash_count` per week, issued as a single parallel batch; the batch is
/// joined before anything is returned and the first source error aborts it.
pub fn build(
  crashes: &dyn CrashSource,
  product: &str,
  info: &VersionInfo,
  affected: &BTreeMap<String, Vec<Channel>>,
  end_date: NaiveDate,
  lookback: usize,
) -> Result<BTreeMap<String, Trend>, SourceError> {
  let mut trends: BTreeMap<String, Trend> = BTreeMap::new();
  let mut jobs: Vec<(&str, Channel, usize)> = Vec::new();

  for (signature, channels) in affected {
    for channel in channels {
      let (Some(start), Some(_)) = (info.start_dates.get(channel), info.versions.get(channel)) else {
        continue;
      };
      let weeks = week_count(*start, end_date, lookback);
      trends
        .entry(signature.clone())
        .or_default()
        .insert(*channel, vec![0; weeks]);
      jobs.extend((0..weeks).map(|week| (signature.as_str(), *channel, week)));
    }
  }

  debug!(queries = jobs.len(), "trend batch");

  let counts = jobs
    .par_iter()
    .map(|&(signature, channel, week)| {
      let versions = info.versions.get(&channel).map(Vec::as_slice).unwrap_or(&[]);
      let query = CrashQuery::new(product, channel, versions, week_range(end_date, week)).signature(signature);
      crashes.crash_count(&query).map(|n| (signature, channel, week, n))
    })
    .collect::<Result<Vec<_>, SourceError>>()?;

  for (signature, channel, week, n) in counts {
    if let Some(slot) = trends
      .get_mut(signature)
      .and_then(|t| t.get_mut(&channel))
      .and_then(|weeks| weeks.get_mut(week))
    {
      *slot = n;
    }
  }

  Ok(trends)
}
