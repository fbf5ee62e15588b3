//! Orchestration: versions -> discovery -> leftovers/ranks/platforms -> trends ->
//! noise -> bugs -> per-signature analysis.

use chrono::{Days, NaiveDate, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::bugs::{self, ReducedBugs};
use crate::config::Config;
use crate::error::{SourceError, TriageError};
use crate::noise;
use crate::report;
use crate::source::{BugSource, CrashQuery, CrashSource, Facet, VersionSource};
use crate::trend;
use crate::types::*;
use crate::versions;

/// One `analyze` run. Empty `signatures` and `bugs` mean "discover the top crashers".
/// With both set, only the listed signatures referenced by one of the bugs are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeRequest {
  pub product: String,
  /// Defaults to today (UTC).
  pub end_date: Option<NaiveDate>,
  /// Channel -> major version; looked up when absent.
  pub base_versions: Option<BTreeMap<Channel, u32>>,
  /// Overrides `Config::lookback_weeks`.
  pub lookback_weeks: Option<usize>,
  pub signatures: Vec<String>,
  pub bugs: Vec<BugId>,
  pub check_noisy: bool,
}

impl AnalyzeRequest {
  pub fn new(product: impl Into<String>) -> Self {
    Self {
      product: product.into(),
      ..Self::default()
    }
  }
}

/// The triage engine. Stateless between runs; all data comes from the sources.
pub struct Engine<'a> {
  config: Config,
  crashes: &'a dyn CrashSource,
  bugs: &'a dyn BugSource,
  versions: &'a dyn VersionSource,
}

impl<'a> Engine<'a> {
  pub fn new(
    config: Config,
    crashes: &'a dyn CrashSource,
    bugs: &'a dyn BugSource,
    versions: &'a dyn VersionSource,
  ) -> Self {
    Self {
      config,
      crashes,
      bugs,
      versions,
    }
  }

  /// Engine over a single source serving crashes, bugs and versions.
  pub fn with_source<S>(config: Config, source: &'a S) -> Self
  where
    S: CrashSource + BugSource + VersionSource,
  {
    Self::new(config, source, source, source)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Run the whole pipeline. Any source failure aborts the run.
  pub fn analyze(&self, request: &AnalyzeRequest) -> Result<Analysis, TriageError> {
    let product = request.product.trim();
    if product.is_empty() {
      return Err(TriageError::validation("product", "must not be empty"));
    }
    let lookback = request.lookback_weeks.unwrap_or(self.config.lookback_weeks);
    if lookback == 0 {
      return Err(TriageError::validation("lookback_weeks", "must be at least 1"));
    }
    let end_date = request.end_date.unwrap_or_else(|| Utc::now().date_naive());

    let info = versions::resolve(self.versions, product, end_date, request.base_versions.as_ref(), lookback)?;
    let status_flags = versions::status_flags(product, &info.base_versions);

    let candidates = self.discover(product, &info, end_date, request)?;
    debug!(candidates = candidates.len(), "signatures discovered");

    let leftovers = self.leftovers(product, &info, end_date, &candidates)?;
    let mut affected: BTreeMap<String, Vec<Channel>> = leftovers
      .iter()
      .map(|(signature, counts)| (signature.clone(), counts.iter().map(|(c, _)| *c).collect()))
      .collect();

    let mut trends = trend::build(self.crashes, product, &info, &affected, end_date, lookback)?;

    if request.check_noisy {
      // Regressions are observed in the end-date week.
      let points: BTreeMap<String, Vec<noise::AffectedChannel>> = affected
        .iter()
        .map(|(signature, channels)| (signature.clone(), channels.iter().map(|c| (*c, 0)).collect()))
        .collect();
      let noisy = noise::get_noisy(
        &trends,
        &points,
        self.config.noise_threshold,
        self.config.noise_window,
      );
      if !noisy.is_empty() {
        info!(count = noisy.len(), "noisy signatures dropped");
      }
      affected.retain(|signature, _| !noisy.contains(signature));
      trends.retain(|signature, _| !noisy.contains(signature));
    }

    let ranks = self.ranks(product, &info, end_date, &affected)?;
    let platforms = self.platforms(product, &info, end_date, &affected)?;

    let linked = affected
      .keys()
      .collect::<Vec<_>>()
      .par_iter()
      .map(|signature| {
        self
          .bugs
          .linked_bugs(signature)
          .map(|bugs| ((*signature).clone(), bugs))
      })
      .collect::<Result<BTreeMap<_, _>, SourceError>>()?;
    let reduced = bugs::reduce(self.bugs, &linked, &status_flags, self.config.bug_products.get(product))?;

    let mut signatures = BTreeMap::new();
    for (signature, channels) in &affected {
      let counts = leftovers.get(signature).cloned().unwrap_or_default();
      let rank: BTreeMap<Channel, CrashRank> = channels
        .iter()
        .map(|channel| {
          let rank = ranks
            .get(&(signature.clone(), *channel))
            .cloned()
            .unwrap_or_default();
          (*channel, rank)
        })
        .collect();

      let mut analysis = SignatureAnalysis {
        leftovers: counts,
        platforms: platforms.get(signature).cloned().unwrap_or_default(),
        rank,
        trend: trends.remove(signature).unwrap_or_default(),
        ..SignatureAnalysis::default()
      };
      select_bug(&mut analysis, signature, &reduced, info.min_date);
      signatures.insert(signature.clone(), analysis);
    }

    info!(
      %product,
      %end_date,
      signatures = signatures.len(),
      channels = info.base_versions.len(),
      "analysis complete"
    );

    Ok(Analysis {
      product: product.to_string(),
      end_date,
      start_date: info.start_date,
      min_date: info.min_date,
      base_versions: info.base_versions,
      start_dates: info.start_dates,
      status_flags,
      signatures,
    })
  }

  /// Report for one analyzed signature, `None` when it is not part of `analysis`.
  pub fn report(&self, analysis: &Analysis, signature: &str) -> Option<BugReport> {
    let entry = analysis.signatures.get(signature)?;
    Some(report::generate_bug_report_with_weeks(
      signature,
      entry,
      &analysis.status_flags,
      &analysis.base_versions,
      &analysis.start_dates,
      analysis.end_date,
      self.config.report_weeks,
    ))
  }

  fn discover(
    &self,
    product: &str,
    info: &VersionInfo,
    end_date: NaiveDate,
    request: &AnalyzeRequest,
  ) -> Result<BTreeSet<String>, SourceError> {
    let from_bugs: Option<BTreeSet<String>> = if request.bugs.is_empty() {
      None
    } else {
      let signatures = request
        .bugs
        .par_iter()
        .map(|bug| self.bugs.bug_signatures(*bug))
        .collect::<Result<Vec<_>, SourceError>>()?;
      Some(signatures.into_iter().flatten().collect())
    };

    let mut found: BTreeSet<String> = if !request.signatures.is_empty() {
      let mut listed: BTreeSet<String> = request
        .signatures
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
      if let Some(from_bugs) = &from_bugs {
        listed.retain(|s| from_bugs.contains(s));
      }
      listed
    } else if let Some(from_bugs) = from_bugs {
      from_bugs
    } else {
      let channels: Vec<Channel> = info.channels().collect();
      channels
        .par_iter()
        .map(|channel| {
          let query = CrashQuery::new(product, *channel, builds(info, *channel), channel_window(info, *channel, end_date));
          self.crashes.crash_facet(&query, Facet::Signature)
        })
        .collect::<Result<Vec<_>, SourceError>>()?
        .into_iter()
        .flat_map(|top| top.into_iter().take(self.config.signature_limit).map(|(s, _)| s))
        .collect()
    };

    found.retain(|signature| !self.config.ignored.contains(signature));
    Ok(found)
  }

  /// Crash totals since channel start; only channels with crashes are kept.
  fn leftovers(
    &self,
    product: &str,
    info: &VersionInfo,
    end_date: NaiveDate,
    signatures: &BTreeSet<String>,
  ) -> Result<BTreeMap<String, Vec<(Channel, u64)>>, SourceError> {
    let jobs: Vec<(&str, Channel)> = signatures
      .iter()
      .flat_map(|s| info.channels().map(move |c| (s.as_str(), c)))
      .collect();

    let counts = jobs
      .par_iter()
      .map(|&(signature, channel)| {
        let query = CrashQuery::new(product, channel, builds(info, channel), channel_window(info, channel, end_date))
          .signature(signature);
        self.crashes.crash_count(&query).map(|n| (signature, channel, n))
      })
      .collect::<Result<Vec<_>, SourceError>>()?;

    let mut out: BTreeMap<String, Vec<(Channel, u64)>> = BTreeMap::new();
    for (signature, channel, n) in counts {
      if n > 0 {
        out.entry(signature.to_string()).or_default().push((channel, n));
      }
    }
    Ok(out)
  }

  /// Rank of each (signature, channel) among the top crashers of the last 7 days.
  fn ranks(
    &self,
    product: &str,
    info: &VersionInfo,
    end_date: NaiveDate,
    affected: &BTreeMap<String, Vec<Channel>>,
  ) -> Result<BTreeMap<(String, Channel), CrashRank>, SourceError> {
    let channels: BTreeSet<Channel> = affected.values().flatten().copied().collect();
    let jobs: Vec<(Channel, ProcessType)> = channels
      .iter()
      .flat_map(|c| ProcessType::ALL.iter().map(move |p| (*c, *p)))
      .collect();
    let week = DateRange::through(
      end_date.checked_sub_days(Days::new(6)).unwrap_or(end_date),
      end_date,
    );

    let tops = jobs
      .par_iter()
      .map(|&(channel, process)| {
        let query = CrashQuery::new(product, channel, builds(info, channel), week).process_type(process);
        self
          .crashes
          .crash_facet(&query, Facet::Signature)
          .map(|top| (channel, process, top))
      })
      .collect::<Result<Vec<_>, SourceError>>()?;

    let mut ranks: BTreeMap<(String, Channel), CrashRank> = BTreeMap::new();
    for (channel, process, top) in tops {
      for (position, (signature, _)) in top.into_iter().take(self.config.rank_limit).enumerate() {
        if !affected.get(&signature).is_some_and(|c| c.contains(&channel)) {
          continue;
        }
        ranks
          .entry((signature, channel))
          .or_default()
          .set(process, position as u32 + 1);
      }
    }
    Ok(ranks)
  }

  fn platforms(
    &self,
    product: &str,
    info: &VersionInfo,
    end_date: NaiveDate,
    affected: &BTreeMap<String, Vec<Channel>>,
  ) -> Result<BTreeMap<String, Vec<String>>, SourceError> {
    let jobs: Vec<(&str, Channel)> = affected
      .iter()
      .flat_map(|(s, channels)| channels.iter().map(move |c| (s.as_str(), *c)))
      .collect();

    let facets = jobs
      .par_iter()
      .map(|&(signature, channel)| {
        let query = CrashQuery::new(product, channel, builds(info, channel), channel_window(info, channel, end_date))
          .signature(signature);
        self
          .crashes
          .crash_facet(&query, Facet::Platform)
          .map(|values| (signature, values))
      })
      .collect::<Result<Vec<_>, SourceError>>()?;

    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (signature, values) in facets {
      let platforms = out.entry(signature.to_string()).or_default();
      for (platform, _) in values {
        if !platforms.contains(&platform) {
          platforms.push(platform);
        }
      }
    }
    Ok(out)
  }
}

fn builds(info: &VersionInfo, channel: Channel) -> &[String] {
  info.versions.get(&channel).map(Vec::as_slice).unwrap_or(&[])
}

/// `[channel start, end_date]`.
fn channel_window(info: &VersionInfo, channel: Channel, end_date: NaiveDate) -> DateRange {
  let start = info.start_dates.get(&channel).copied().unwrap_or(info.start_date);
  DateRange::through(start, end_date)
}

fn select_bug(analysis: &mut SignatureAnalysis, signature: &str, reduced: &ReducedBugs, min_date: NaiveDate) {
  let Some(set) = reduced.by_signature.get(signature) else {
    return;
  };
  let classification = bugs::get_last_bugs_info(set, &reduced.lifecycles, min_date);
  let selected = bugs::get_last_bug(&classification);
  let selected_life = selected.and_then(|bug| reduced.lifecycles.get(&bug));

  analysis.bugs = set.clone();
  analysis.private = set
    .iter()
    .filter_map(|bug| reduced.lifecycles.get(bug))
    .any(|life| life.private);
  analysis.resolved = selected_life.is_some_and(|life| life.resolved);
  analysis.no_change = selected_life.map(|life| life.no_change.clone()).unwrap_or_default();
  analysis.selected_bug = selected;
  analysis.classification = classification;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::snapshot::{Snapshot, SnapshotSource};

  fn day(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, m, d).unwrap()
  }

  fn source() -> SnapshotSource {
    let snapshot: Snapshot = serde_json::from_str(
      r#"{
      "products": {"Firefox": {"channels": {
        "release": [{"major": 48, "shipped": "2016-07-25", "versions": ["48.0"]}],
        "beta": [{"major": 49, "shipped": "2016-08-02", "versions": ["49.0b1"]}]
      }}},
      "crashes": [
        {"signature": "hot", "product": "Firefox", "channel": "release", "version": "48.0",
         "date": "2016-09-13", "process_type": "content", "platform": "Windows", "count": 9},
        {"signature": "hot", "product": "Firefox", "channel": "beta", "version": "49.0b1",
         "date": "2016-08-10", "platform": "Linux", "count": 2},
        {"signature": "cold", "product": "Firefox", "channel": "release", "version": "48.0",
         "date": "2016-09-13", "process_type": "content", "platform": "Linux", "count": 1},
        {"signature": "skip me", "product": "Firefox", "channel": "release", "version": "48.0",
         "date": "2016-09-13", "count": 50}
      ],
      "bugs": [
        {"id": 10, "status": "NEW", "signatures": ["hot"],
         "history": [{"when": "2016-09-01T00:00:00Z", "field": "cc", "added": "x"}]}
      ]
    }"#,
    )
    .unwrap();
    SnapshotSource::new(snapshot)
  }

  fn config() -> Config {
    Config {
      ignored: ["skip me".to_string()].into_iter().collect(),
      ..Config::default()
    }
  }

  fn request() -> AnalyzeRequest {
    AnalyzeRequest {
      end_date: Some(day(9, 14)),
      ..AnalyzeRequest::new("Firefox")
    }
  }

  #[test]
  fn discovers_top_signatures_minus_ignored() {
    let source = source();
    let engine = Engine::with_source(config(), &source);
    let analysis = engine.analyze(&request()).unwrap();
    assert_eq!(analysis.signatures.keys().collect::<Vec<_>>(), vec!["cold", "hot"]);

    let hot = &analysis.signatures["hot"];
    assert_eq!(hot.leftovers, vec![(Channel::Beta, 2), (Channel::Release, 9)]);
    assert_eq!(hot.platforms, vec!["Linux".to_string(), "Windows".to_string()]);
    assert_eq!(hot.selected_bug, Some(10));
    assert!(!hot.resolved);
    assert_eq!(hot.rank[&Channel::Release].content, Some(1));
    assert_eq!(hot.rank[&Channel::Beta], CrashRank::default());

    let cold = &analysis.signatures["cold"];
    assert_eq!(cold.rank[&Channel::Release].content, Some(2));
    assert_eq!(cold.selected_bug, None);
    assert!(cold.bugs.is_empty());
  }

  #[test]
  fn explicit_signatures_skip_discovery() {
    let source = source();
    let engine = Engine::with_source(config(), &source);
    let req = AnalyzeRequest {
      signatures: vec!["cold".into(), "unknown".into(), "skip me".into()],
      ..request()
    };
    let analysis = engine.analyze(&req).unwrap();
    // unknown has no crashes, skip me is ignored.
    assert_eq!(analysis.signatures.keys().collect::<Vec<_>>(), vec!["cold"]);
  }

  #[test]
  fn bugs_seed_signatures() {
    let source = source();
    let engine = Engine::with_source(config(), &source);
    let req = AnalyzeRequest {
      bugs: vec![10],
      ..request()
    };
    let analysis = engine.analyze(&req).unwrap();
    assert_eq!(analysis.signatures.keys().collect::<Vec<_>>(), vec!["hot"]);
  }

  #[test]
  fn bugs_filter_listed_signatures() {
    let source = source();
    let engine = Engine::with_source(config(), &source);
    let req = AnalyzeRequest {
      signatures: vec!["hot".into(), "cold".into()],
      bugs: vec![10],
      ..request()
    };
    let analysis = engine.analyze(&req).unwrap();
    assert_eq!(analysis.signatures.keys().collect::<Vec<_>>(), vec!["hot"]);
  }

  #[test]
  fn empty_product_is_rejected() {
    let source = source();
    let engine = Engine::with_source(config(), &source);
    let err = engine.analyze(&AnalyzeRequest::new("  ")).unwrap_err();
    assert!(matches!(err, TriageError::Validation { ref field, .. } if field == "product"));
  }

  #[test]
  fn zero_lookback_is_rejected() {
    let source = source();
    let engine = Engine::with_source(config(), &source);
    let req = AnalyzeRequest {
      lookback_weeks: Some(0),
      ..request()
    };
    assert!(matches!(engine.analyze(&req), Err(TriageError::Validation { .. })));
  }

  struct Down;

  impl CrashSource for Down {
    fn crash_count(&self, _: &CrashQuery<'_>) -> Result<u64, SourceError> {
      Err(SourceError::unavailable("crash-stats", "timeout"))
    }

    fn crash_facet(&self, _: &CrashQuery<'_>, _: Facet) -> Result<Vec<(String, u64)>, SourceError> {
      Err(SourceError::unavailable("crash-stats", "timeout"))
    }
  }

  #[test]
  fn source_failure_aborts_the_run() {
    let source = source();
    let engine = Engine::new(config(), &Down, &source, &source);
    let err = engine.analyze(&request()).unwrap_err();
    assert!(matches!(err, TriageError::Source(SourceError::Unavailable { .. })));
  }

  #[test]
  fn report_for_unknown_signature_is_none() {
    let source = source();
    let engine = Engine::with_source(config(), &source);
    let analysis = engine.analyze(&request()).unwrap();
    assert!(engine.report(&analysis, "nope").is_none());
    let report = engine.report(&analysis, "hot").unwrap();
    assert_eq!(report.flags.len(), 2);
    assert!(report.comment.body.starts_with("Crash volume for signature 'hot':"));
  }
}
