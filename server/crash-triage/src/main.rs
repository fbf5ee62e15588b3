//! Binary entrypoint: analyze a JSON crash/bug dataset, print JSON to stdout.
//!
//! `crash-triage analyze` prints the whole analysis; `crash-triage report` prints
//! the bug report of one signature. Logs go to stderr (`RUST_LOG`, default `warn`).

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use crash_triage::types::BugId;
use crash_triage::{AnalyzeRequest, Channel, Config, Engine, SnapshotSource};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crash-triage")]
#[command(version)]
#[command(about = "Triage crash signatures against their bugs", long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Analyze signatures and print the analysis as JSON
  Analyze(AnalyzeArgs),
  /// Print the bug report of one analyzed signature
  Report {
    #[command(flatten)]
    analyze: AnalyzeArgs,

    /// Signature to report on
    #[arg(long, value_name = "SIGNATURE")]
    target: String,

    /// Print the comment body only
    #[arg(long)]
    body_only: bool,
  },
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
  /// JSON dataset (products, crashes, bugs)
  #[arg(long, value_name = "FILE")]
  data: PathBuf,

  /// Product name, e.g. Firefox
  #[arg(long)]
  product: String,

  /// Last day analyzed, YYYY-MM-DD (default: today)
  #[arg(long, value_name = "DATE")]
  end_date: Option<NaiveDate>,

  /// Base version of a channel, e.g. release=48 (repeatable)
  #[arg(long = "base-version", value_name = "CHANNEL=N", value_parser = parse_base_version)]
  base_versions: Vec<(Channel, u32)>,

  /// Signature to analyze (repeatable)
  #[arg(long = "signature", value_name = "SIGNATURE")]
  signatures: Vec<String>,

  /// Bug whose signatures are analyzed (repeatable)
  #[arg(long = "bug", value_name = "ID")]
  bugs: Vec<BugId>,

  /// Trailing weeks per trend
  #[arg(long, value_name = "N")]
  lookback_weeks: Option<usize>,

  /// Drop signatures that already crashed before the trend window
  #[arg(long)]
  check_noisy: bool,

  /// TOML configuration file
  #[arg(long, value_name = "FILE")]
  config: Option<PathBuf>,
}

impl AnalyzeArgs {
  fn request(&self) -> AnalyzeRequest {
    AnalyzeRequest {
      product: self.product.clone(),
      end_date: self.end_date,
      base_versions: (!self.base_versions.is_empty())
        .then(|| self.base_versions.iter().copied().collect::<BTreeMap<_, _>>()),
      lookback_weeks: self.lookback_weeks,
      signatures: self.signatures.clone(),
      bugs: self.bugs.clone(),
      check_noisy: self.check_noisy,
    }
  }

  fn config(&self) -> Result<Config> {
    match &self.config {
      Some(path) => Config::load(path).with_context(|| format!("config {}", path.display())),
      None => Ok(Config::default()),
    }
  }
}

fn parse_base_version(raw: &str) -> Result<(Channel, u32), String> {
  let (channel, version) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected CHANNEL=N, got '{}'", raw))?;
  let channel: Channel = channel.trim().parse().map_err(|e| format!("{}", e))?;
  let version = version
    .trim()
    .parse()
    .map_err(|_| format!("invalid version '{}'", version.trim()))?;
  Ok((channel, version))
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(io::stderr)
    .init();

  if let Err(e) = run(Cli::parse()) {
    let _ = writeln!(io::stderr(), "crash-triage: {:#}", e);
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  let (args, target) = match &cli.command {
    Command::Analyze(args) => (args, None),
    Command::Report {
      analyze,
      target,
      body_only,
    } => (analyze, Some((target.as_str(), *body_only))),
  };

  let config = args.config()?;
  let source = SnapshotSource::load(&args.data).with_context(|| format!("dataset {}", args.data.display()))?;
  let engine = Engine::with_source(config, &source);
  let analysis = engine.analyze(&args.request())?;

  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());
  match target {
    None => serde_json::to_writer_pretty(&mut out, &analysis)?,
    Some((signature, body_only)) => {
      let report = engine
        .report(&analysis, signature)
        .ok_or_else(|| anyhow!("signature '{}' not found in the analysis", signature))?;
      if body_only {
        out.write_all(report.comment.body.as_bytes())?;
      } else {
        serde_json::to_writer_pretty(&mut out, &report)?;
      }
    }
  }
  writeln!(out)?;
  out.flush()?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn base_version_argument() {
    assert_eq!(parse_base_version("release=48"), Ok((Channel::Release, 48)));
    assert_eq!(parse_base_version("Dev-Edition = 50"), Ok((Channel::Aurora, 50)));
    assert!(parse_base_version("release").is_err());
    assert!(parse_base_version("canary=1").is_err());
    assert!(parse_base_version("beta=x").is_err());
  }

  #[test]
  fn cli_definition_is_consistent() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
  }

  #[test]
  fn report_arguments() {
    let cli = Cli::try_parse_from([
      "crash-triage",
      "report",
      "--data",
      "d.json",
      "--product",
      "Firefox",
      "--base-version",
      "release=48",
      "--base-version",
      "beta=49",
      "--end-date",
      "2016-09-14",
      "--target",
      "sig",
      "--body-only",
    ])
    .unwrap();
    let Command::Report {
      analyze,
      target,
      body_only,
    } = cli.command
    else {
      panic!("expected report");
    };
    assert_eq!(target, "sig");
    assert!(body_only);
    let request = analyze.request();
    assert_eq!(request.end_date, NaiveDate::from_ymd_opt(2016, 9, 14));
    assert_eq!(request.base_versions.unwrap().len(), 2);
  }
}
