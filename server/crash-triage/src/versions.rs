//! Version resolution: base version per channel -> start date, build versions, search floor.

use chrono::{Days, NaiveDate};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::source::VersionSource;
use crate::trend::week_start;
use crate::types::{Channel, StatusFlags, VersionInfo};

/// Resolve the channels of `product` as of `end_date`.
///
/// With `base_versions` only the given channels are considered; otherwise every
/// channel is asked for its current major version. A channel without a version,
/// ship date or build list is dropped.
pub fn resolve(
  source: &dyn VersionSource,
  product: &str,
  end_date: NaiveDate,
  base_versions: Option<&BTreeMap<Channel, u32>>,
  lookback_weeks: usize,
) -> Result<VersionInfo, SourceError> {
  let requested: Vec<(Channel, Option<u32>)> = match base_versions {
    Some(given) => given.iter().map(|(c, v)| (*c, Some(*v))).collect(),
    None => Channel::ALL.iter().map(|c| (*c, None)).collect(),
  };

  let mut resolved_versions = BTreeMap::new();
  let mut start_dates = BTreeMap::new();
  let mut versions = BTreeMap::new();

  for (channel, given) in requested {
    let base = match given {
      Some(v) => v,
      None => match source.channel_base_version(product, channel, end_date)? {
        Some(v) => v,
        None => {
          debug!(%channel, "no base version, channel skipped");
          continue;
        }
      },
    };

    let Some(shipped) = source.channel_version_shipped_date(product, channel, base)? else {
      warn!(%channel, version = base, "no ship date, channel skipped");
      continue;
    };

    let builds = source.channel_versions(product, channel, base)?;
    if builds.is_empty() {
      warn!(%channel, version = base, "no build versions, channel skipped");
      continue;
    }

    resolved_versions.insert(channel, base);
    start_dates.insert(channel, shipped);
    versions.insert(channel, builds);
  }

  let start_date = start_dates.values().min().copied().unwrap_or(end_date);
  let weeks_back = lookback_weeks.saturating_sub(1) as u64 * 7;
  let lookback_floor = week_start(end_date)
    .checked_sub_days(Days::new(weeks_back))
    .unwrap_or(NaiveDate::MIN);
  let min_date = start_date.min(lookback_floor);

  debug!(
    %product,
    channels = resolved_versions.len(),
    %start_date,
    %min_date,
    "versions resolved"
  );

  Ok(VersionInfo {
    start_date,
    min_date,
    base_versions: resolved_versions,
    start_dates,
    versions,
  })
}

/// Status flag field names for `product`, e.g. `cf_status_firefox51`, `cf_status_firefox_esr45`.
pub fn status_flags(product: &str, base_versions: &BTreeMap<Channel, u32>) -> StatusFlags {
  let prefix = match product.to_ascii_lowercase().as_str() {
    "fennec" | "fennecandroid" => "firefox".to_string(),
    other => other.replace(' ', ""),
  };

  base_versions
    .iter()
    .map(|(channel, version)| {
      let name = match channel {
        Channel::Esr => format!("cf_status_{}_esr{}", prefix, version),
        _ => format!("cf_status_{}{}", prefix, version),
      };
      (*channel, name)
    })
    .collect()
}
