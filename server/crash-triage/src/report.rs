//! Bug comment rendering. The layout is consumed verbatim by the bug tracker.

use chrono::{Days, NaiveDate};
use std::collections::BTreeMap;

use crate::trend::week_start;
use crate::types::{BugReport, Channel, Comment, ProcessType, SignatureAnalysis, StatusFlags};

/// Width of a channel name column (`release`).
const CHANNEL_WIDTH: usize = 7;
/// Width of one weekly count column.
const WEEK_COLUMN: usize = 8;
/// Width of one rank column, leading space included.
const RANK_COLUMN: usize = 10;
const DEFAULT_REPORT_WEEKS: usize = 7;

/// Render the comment and the status flags to set for `signature`.
pub fn generate_bug_report(
  signature: &str,
  analysis: &SignatureAnalysis,
  status_flags: &StatusFlags,
  base_versions: &BTreeMap<Channel, u32>,
  start_dates: &BTreeMap<Channel, NaiveDate>,
  end_date: NaiveDate,
) -> BugReport {
  generate_bug_report_with_weeks(
    signature,
    analysis,
    status_flags,
    base_versions,
    start_dates,
    end_date,
    DEFAULT_REPORT_WEEKS,
  )
}

/// Same as [`generate_bug_report`] with at most `report_weeks` trend columns.
pub fn generate_bug_report_with_weeks(
  signature: &str,
  analysis: &SignatureAnalysis,
  status_flags: &StatusFlags,
  base_versions: &BTreeMap<Channel, u32>,
  start_dates: &BTreeMap<Channel, NaiveDate>,
  end_date: NaiveDate,
  report_weeks: usize,
) -> BugReport {
  let mut sections = vec![volume_section(signature, analysis, base_versions, start_dates)];
  if let Some(trend) = trend_section(analysis, end_date, report_weeks) {
    sections.push(trend);
  }
  if !analysis.platforms.is_empty() {
    sections.push(format!("Affected platforms: {}", analysis.platforms.join(", ")));
  }
  if let Some(rank) = rank_section(analysis) {
    sections.push(rank);
  }

  BugReport {
    comment: Comment {
      body: sections.join("\n\n"),
    },
    flags: flags_to_set(analysis, status_flags),
  }
}

fn channel_label(channel: Channel) -> String {
  format!(" - {:<width$}", channel.as_str(), width = CHANNEL_WIDTH)
}

fn volume_section(
  signature: &str,
  analysis: &SignatureAnalysis,
  base_versions: &BTreeMap<Channel, u32>,
  start_dates: &BTreeMap<Channel, NaiveDate>,
) -> String {
  let mut lines = vec![format!("Crash volume for signature '{}':", signature)];
  for (channel, version) in base_versions {
    let Some(start) = start_dates.get(channel) else {
      continue;
    };
    lines.push(format!(
      "{} (version {}): {} crashes from {}.",
      channel_label(*channel),
      version,
      analysis.leftover(*channel).unwrap_or(0),
      start.format("%Y-%m-%d"),
    ));
  }
  lines.join("\n")
}

/// Weekly table, previous weeks only. A column exists while at least one channel
/// still has data for it; shorter rows simply end.
fn trend_section(analysis: &SignatureAnalysis, end_date: NaiveDate, report_weeks: usize) -> Option<String> {
  let longest = analysis.trend.values().map(Vec::len).max().unwrap_or(0);
  let columns = longest.saturating_sub(1).min(report_weeks);
  if columns == 0 {
    return None;
  }

  let monday = week_start(end_date);
  let sunday = monday.checked_add_days(Days::new(6)).unwrap_or(monday);
  let mut lines = vec![
    format!(
      "Crash volume on the last weeks (Week N is from {} to {}):",
      monday.format("%m-%d"),
      sunday.format("%m-%d"),
    ),
    format!(
      "{:width$}{}",
      "",
      (1..=columns)
        .map(|k| format!("{:>w$}", format!("W. N-{}", k), w = WEEK_COLUMN))
        .collect::<String>(),
      width = CHANNEL_WIDTH + 3,
    ),
  ];

  for (channel, weeks) in &analysis.trend {
    let row: String = weeks
      .iter()
      .skip(1)
      .take(columns)
      .map(|n| format!("{:>w$}", n, w = WEEK_COLUMN))
      .collect();
    lines.push(format!("{}{}", channel_label(*channel), row).trim_end().to_string());
  }

  Some(lines.join("\n"))
}

fn rank_section(analysis: &SignatureAnalysis) -> Option<String> {
  if analysis.rank.values().all(|r| r.is_empty()) {
    return None;
  }
  let show_gpu = analysis.rank.values().any(|r| r.gpu.is_some());
  let processes: Vec<ProcessType> = ProcessType::ALL
    .iter()
    .copied()
    .filter(|p| *p != ProcessType::Gpu || show_gpu)
    .collect();

  let cell = |text: &str| format!(" {:<w$}", text, w = RANK_COLUMN - 1);

  let header: String = processes.iter().map(|p| cell(p.label())).collect();
  let mut lines = vec![
    "Crash rank on the last 7 days:".to_string(),
    format!("{:width$}{}", "", header, width = CHANNEL_WIDTH + 3).trim_end().to_string(),
  ];

  for (channel, rank) in &analysis.rank {
    let row: String = processes
      .iter()
      .map(|p| cell(&rank.get(*p).map(|r| format!("#{}", r)).unwrap_or_default()))
      .collect();
    lines.push(format!("{}{}", channel_label(*channel), row).trim_end().to_string());
  }

  Some(lines.join("\n"))
}

/// `affected` on every affected channel the selected bug does not pin.
fn flags_to_set(analysis: &SignatureAnalysis, status_flags: &StatusFlags) -> BTreeMap<String, String> {
  analysis
    .affected_channels()
    .filter(|channel| !analysis.no_change.contains(channel))
    .filter_map(|channel| status_flags.get(&channel))
    .map(|flag| (flag.clone(), "affected".to_string()))
    .collect()
}
