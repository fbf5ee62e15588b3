//! Bug reduction: merge duplicate/see-also bugs, bucket them by lifecycle, pick one.

use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::SourceError;
use crate::source::BugSource;
use crate::types::{Bucket, BugId, BugLifecycle, BugRelations, LastBugClassification, StatusFlags};

/// Reduced bug sets per signature plus the lifecycle of every bug they hold.
#[derive(Debug, Clone, Default)]
pub struct ReducedBugs {
  pub by_signature: BTreeMap<String, BTreeSet<BugId>>,
  pub lifecycles: BTreeMap<BugId, BugLifecycle>,
}

/// Fetch relations of `seeds` and of every bug reachable from them.
///
/// Runs in rounds: each round is one parallel batch over the newly discovered bugs.
/// Bugs the tracker cannot resolve are left out of the returned map.
pub fn fetch_relations(
  source: &dyn BugSource,
  seeds: &BTreeSet<BugId>,
) -> Result<BTreeMap<BugId, BugRelations>, SourceError> {
  let mut known: BTreeMap<BugId, BugRelations> = BTreeMap::new();
  let mut missing: BTreeSet<BugId> = BTreeSet::new();
  let mut frontier: Vec<BugId> = seeds.iter().copied().collect();

  while !frontier.is_empty() {
    let fetched = frontier
      .par_iter()
      .map(|bug| source.bug_relations(*bug).map(|rel| (*bug, rel)))
      .collect::<Result<Vec<_>, SourceError>>()?;

    let mut next = BTreeSet::new();
    for (bug, rel) in fetched {
      match rel {
        Some(rel) => {
          next.extend(rel.dupe_of.iter().chain(rel.see_also.iter()).copied());
          known.insert(bug, rel);
        }
        None => {
          debug!(bug, "unreachable bug skipped");
          missing.insert(bug);
        }
      }
    }
    next.retain(|b| !known.contains_key(b) && !missing.contains(b));
    frontier = next.into_iter().collect();
  }

  Ok(known)
}

/// End of the duplicate chain starting at `bug`; `None` when `bug` is unknown.
/// A duplicate cycle resolves to its smallest bug id.
pub fn canonical(bug: BugId, relations: &BTreeMap<BugId, BugRelations>) -> Option<BugId> {
  if !relations.contains_key(&bug) {
    return None;
  }
  let mut path = vec![bug];
  let mut current = bug;
  loop {
    let next = match relations.get(&current).and_then(|r| r.dupe_of) {
      Some(next) if relations.contains_key(&next) => next,
      _ => return Some(current),
    };
    if let Some(pos) = path.iter().position(|b| *b == next) {
      return path[pos..].iter().min().copied();
    }
    path.push(next);
    current = next;
  }
}

/// Replace duplicates by their canonical bug and close the set over see-also links.
/// Idempotent: reducing a reduced set returns it unchanged.
pub fn reduce_set(bugs: &BTreeSet<BugId>, relations: &BTreeMap<BugId, BugRelations>) -> BTreeSet<BugId> {
  let mut out = BTreeSet::new();
  let mut seen = BTreeSet::new();
  let mut stack: Vec<BugId> = bugs.iter().copied().collect();

  while let Some(bug) = stack.pop() {
    if !seen.insert(bug) {
      continue;
    }
    let Some(id) = canonical(bug, relations) else {
      continue;
    };
    out.insert(id);
    for origin in [bug, id] {
      if let Some(rel) = relations.get(&origin) {
        stack.extend(rel.see_also.iter().copied());
      }
    }
  }

  out
}

/// Lifecycle bucket and the date that orders bugs inside it.
/// Incomplete bugs and bugs without any recorded change fall in no bucket.
pub fn classify(life: &BugLifecycle) -> Option<(Bucket, DateTime<Utc>)> {
  if life.incomplete {
    return None;
  }
  let bucket = match (life.resolved, life.fixed, life.patched, life.assigned) {
    (true, true, true, _) => Bucket::ResolvedFixedPatched,
    (true, true, false, _) => Bucket::ResolvedFixedUnpatched,
    (true, false, _, _) => Bucket::ResolvedUnfixed,
    (false, _, _, true) => Bucket::UnresolvedAssigned,
    (false, _, _, false) => Bucket::UnresolvedUnassigned,
  };
  let date = match bucket {
    Bucket::ResolvedFixedPatched | Bucket::ResolvedFixedUnpatched => {
      life.fixed_dates.last().copied().or(life.last_change)
    }
    _ => life.last_change,
  }?;
  Some((bucket, date))
}

/// Most recent bug per bucket among `bugs`. Bugs without lifecycle are ignored,
/// and so are fixes landed before `min_date`: they predate every analyzed build.
pub fn get_last_bugs_info(
  bugs: &BTreeSet<BugId>,
  lifecycles: &BTreeMap<BugId, BugLifecycle>,
  min_date: NaiveDate,
) -> LastBugClassification {
  let mut info = LastBugClassification::default();
  for bug in bugs {
    let Some((bucket, date)) = lifecycles.get(bug).and_then(classify) else {
      continue;
    };
    if bucket.is_fixed() && date.date_naive() < min_date {
      debug!(bug, %date, "fix older than the analyzed builds");
      continue;
    }
    info.offer(bucket, *bug, date);
  }
  info
}

/// First non-empty bucket in priority order.
pub fn get_last_bug(info: &LastBugClassification) -> Option<BugId> {
  Bucket::PRIORITY.iter().find_map(|bucket| info.get(*bucket).bug)
}

/// Bugs of `bugs` filed under one of `products`.
/// Bugs whose product the tracker does not know are kept.
pub fn filter_bugs(
  source: &dyn BugSource,
  bugs: &BTreeSet<BugId>,
  products: &BTreeSet<String>,
) -> Result<BTreeSet<BugId>, SourceError> {
  let ids: Vec<BugId> = bugs.iter().copied().collect();
  let kept = ids
    .par_iter()
    .map(|bug| source.bug_product(*bug).map(|product| (*bug, product)))
    .collect::<Result<Vec<_>, SourceError>>()?
    .into_iter()
    .filter(|(_, product)| product.as_ref().map_or(true, |p| products.contains(p)))
    .map(|(bug, _)| bug)
    .collect();
  Ok(kept)
}

/// Reduce the bugs linked to each signature and load their lifecycles.
/// With `products`, reduced bugs filed elsewhere are dropped.
pub fn reduce(
  source: &dyn BugSource,
  linked: &BTreeMap<String, Vec<BugId>>,
  flags: &StatusFlags,
  products: Option<&BTreeSet<String>>,
) -> Result<ReducedBugs, SourceError> {
  let seeds: BTreeSet<BugId> = linked.values().flatten().copied().collect();
  let relations = fetch_relations(source, &seeds)?;

  let mut by_signature: BTreeMap<String, BTreeSet<BugId>> = linked
    .iter()
    .map(|(signature, bugs)| {
      let direct: BTreeSet<BugId> = bugs.iter().copied().collect();
      (signature.clone(), reduce_set(&direct, &relations))
    })
    .collect();

  let mut wanted: BTreeSet<BugId> = by_signature.values().flatten().copied().collect();
  if let Some(products) = products {
    let kept = filter_bugs(source, &wanted, products)?;
    if kept.len() < wanted.len() {
      debug!(count = wanted.len() - kept.len(), "bugs from other products dropped");
      for set in by_signature.values_mut() {
        set.retain(|bug| kept.contains(bug));
      }
      wanted = kept;
    }
  }
  let wanted: Vec<BugId> = wanted.into_iter().collect();

  let lifecycles = wanted
    .par_iter()
    .map(|bug| source.bug_lifecycle(*bug, flags).map(|life| (*bug, life)))
    .collect::<Result<Vec<_>, SourceError>>()?
    .into_iter()
    .filter_map(|(bug, life)| life.map(|l| (bug, l)))
    .collect();

  debug!(signatures = by_signature.len(), bugs = wanted.len(), "bugs reduced");

  Ok(ReducedBugs {
    by_signature,
    lifecycles,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
  }

  fn rel(dupe_of: Option<BugId>, see_also: &[BugId]) -> BugRelations {
    BugRelations {
      dupe_of,
      see_also: see_also.to_vec(),
    }
  }

  fn set(ids: &[BugId]) -> BTreeSet<BugId> {
    ids.iter().copied().collect()
  }

  fn unresolved(assigned: bool, last: DateTime<Utc>) -> BugLifecycle {
    BugLifecycle {
      assigned,
      last_change: Some(last),
      ..BugLifecycle::default()
    }
  }

  fn resolved_unfixed(last: DateTime<Utc>) -> BugLifecycle {
    BugLifecycle {
      resolved: true,
      last_change: Some(last),
      ..BugLifecycle::default()
    }
  }

  fn resolved_fixed(patched: bool, fixed: DateTime<Utc>, last: DateTime<Utc>) -> BugLifecycle {
    BugLifecycle {
      resolved: true,
      fixed: true,
      patched,
      assigned: true,
      fixed_dates: vec![fixed],
      last_change: Some(last),
      ..BugLifecycle::default()
    }
  }

  #[test]
  fn duplicate_is_replaced_by_target() {
    let relations: BTreeMap<BugId, BugRelations> = [
      (730283, rel(Some(719114), &[])),
      (719114, rel(None, &[])),
      (952381, rel(None, &[])),
    ]
    .into_iter()
    .collect();
    let reduced = reduce_set(&set(&[730283, 719114, 952381]), &relations);
    assert_eq!(reduced, set(&[719114, 952381]));
  }

  #[test]
  fn see_also_is_merged_and_unknown_skipped() {
    let relations: BTreeMap<BugId, BugRelations> = [
      (1, rel(None, &[2, 99])),
      (2, rel(None, &[3])),
      (3, rel(Some(4), &[])),
      (4, rel(None, &[1])),
    ]
    .into_iter()
    .collect();
    let reduced = reduce_set(&set(&[1, 42]), &relations);
    assert_eq!(reduced, set(&[1, 2, 4]));
    assert_eq!(reduce_set(&reduced, &relations), reduced);
  }

  #[test]
  fn duplicate_chain_and_cycle() {
    let relations: BTreeMap<BugId, BugRelations> = [
      (10, rel(Some(11), &[])),
      (11, rel(Some(12), &[])),
      (12, rel(None, &[])),
      (20, rel(Some(22), &[])),
      (21, rel(Some(20), &[])),
      (22, rel(Some(21), &[])),
      (30, rel(Some(31), &[])),
    ]
    .into_iter()
    .collect();
    assert_eq!(canonical(10, &relations), Some(12));
    assert_eq!(canonical(22, &relations), Some(20));
    // dupe target unknown: stays itself.
    assert_eq!(canonical(30, &relations), Some(30));
    assert_eq!(canonical(31, &relations), None);
    assert_eq!(reduce_set(&set(&[10, 22, 30]), &relations), set(&[12, 20, 30]));
  }

  #[test]
  fn classification_buckets() {
    let d = at(2016, 8, 30);
    assert_eq!(classify(&unresolved(false, d)), Some((Bucket::UnresolvedUnassigned, d)));
    assert_eq!(classify(&unresolved(true, d)), Some((Bucket::UnresolvedAssigned, d)));
    assert_eq!(classify(&resolved_unfixed(d)), Some((Bucket::ResolvedUnfixed, d)));
    let fixed = at(2016, 1, 1);
    assert_eq!(
      classify(&resolved_fixed(true, fixed, d)),
      Some((Bucket::ResolvedFixedPatched, fixed))
    );
    assert_eq!(
      classify(&resolved_fixed(false, fixed, d)),
      Some((Bucket::ResolvedFixedUnpatched, fixed))
    );
  }

  #[test]
  fn incomplete_or_silent_bugs_are_excluded() {
    let mut incomplete = resolved_unfixed(at(2016, 8, 30));
    incomplete.incomplete = true;
    assert_eq!(classify(&incomplete), None);
    assert_eq!(classify(&BugLifecycle::default()), None);
  }

  #[test]
  fn latest_fix_date_orders_fixed_bugs() {
    let mut life = resolved_fixed(true, at(2015, 1, 1), at(2016, 9, 1));
    life.fixed_dates.push(at(2016, 2, 1));
    assert_eq!(classify(&life), Some((Bucket::ResolvedFixedPatched, at(2016, 2, 1))));
  }

  #[test]
  fn unresolved_unassigned_beats_more_recent_resolved() {
    let lifecycles: BTreeMap<BugId, BugLifecycle> = [
      (952381, resolved_unfixed(at(2016, 9, 1))),
      (719114, unresolved(false, at(2016, 8, 30))),
    ]
    .into_iter()
    .collect();
    let info = get_last_bugs_info(&set(&[952381, 719114]), &lifecycles, NaiveDate::MIN);
    assert_eq!(info.resolved_unfixed.bug, Some(952381));
    assert_eq!(info.unresolved_unassigned.bug, Some(719114));
    assert_eq!(info.unresolved_unassigned.date, at(2016, 8, 30));
    assert_eq!(info.resolved_fixed_patched.bug, None);
    assert_eq!(get_last_bug(&info), Some(719114));
  }

  #[test]
  fn most_recent_bug_wins_inside_a_bucket() {
    let lifecycles: BTreeMap<BugId, BugLifecycle> = [
      (1, unresolved(true, at(2016, 1, 1))),
      (2, unresolved(true, at(2016, 6, 1))),
      (3, unresolved(true, at(2016, 3, 1))),
    ]
    .into_iter()
    .collect();
    let info = get_last_bugs_info(&set(&[1, 2, 3]), &lifecycles, NaiveDate::MIN);
    assert_eq!(get_last_bug(&info), Some(2));
  }

  #[test]
  fn fixes_before_min_date_are_not_candidates() {
    let min_date = NaiveDate::from_ymd_opt(2016, 3, 16).unwrap();
    let lifecycles: BTreeMap<BugId, BugLifecycle> = [
      (1, resolved_fixed(true, at(2015, 11, 2), at(2016, 9, 1))),
      (2, resolved_unfixed(at(2014, 5, 13))),
      (3, resolved_fixed(false, at(2016, 3, 16), at(2016, 3, 16))),
    ]
    .into_iter()
    .collect();
    let info = get_last_bugs_info(&set(&[1, 2, 3]), &lifecycles, min_date);
    assert_eq!(info.resolved_fixed_patched.bug, None);
    assert_eq!(info.resolved_fixed_unpatched.bug, Some(3));
    // Only fixes are cut off; an old unfixed resolution still counts.
    assert_eq!(info.resolved_unfixed.bug, Some(2));

    let all = get_last_bugs_info(&set(&[1, 3]), &lifecycles, NaiveDate::MIN);
    assert_eq!(all.resolved_fixed_patched.bug, Some(1));
    assert_eq!(get_last_bug(&all), Some(3));
  }

  #[test]
  fn empty_set_selects_nothing() {
    let info = get_last_bugs_info(&BTreeSet::new(), &BTreeMap::new(), NaiveDate::MIN);
    assert_eq!(info, LastBugClassification::default());
    assert_eq!(get_last_bug(&info), None);
  }

  #[derive(Default)]
  struct Tracker {
    relations: BTreeMap<BugId, BugRelations>,
    lifecycles: BTreeMap<BugId, BugLifecycle>,
    products: BTreeMap<BugId, &'static str>,
  }

  impl BugSource for Tracker {
    fn bug_lifecycle(&self, bug: BugId, _: &StatusFlags) -> Result<Option<BugLifecycle>, SourceError> {
      Ok(self.lifecycles.get(&bug).cloned())
    }

    fn bug_relations(&self, bug: BugId) -> Result<Option<BugRelations>, SourceError> {
      Ok(self.relations.get(&bug).cloned())
    }

    fn linked_bugs(&self, _: &str) -> Result<Vec<BugId>, SourceError> {
      Ok(Vec::new())
    }

    fn bug_signatures(&self, _: BugId) -> Result<Vec<String>, SourceError> {
      Ok(Vec::new())
    }

    fn bug_product(&self, bug: BugId) -> Result<Option<String>, SourceError> {
      Ok(self.products.get(&bug).map(|p| p.to_string()))
    }
  }

  #[test]
  fn reduce_walks_the_tracker() {
    let tracker = Tracker {
      relations: [
        (1, rel(Some(2), &[])),
        (2, rel(None, &[3])),
        (3, rel(None, &[])),
        (5, rel(None, &[])),
      ]
      .into_iter()
      .collect(),
      lifecycles: [(2, unresolved(false, at(2016, 1, 1))), (3, resolved_unfixed(at(2016, 2, 1)))]
        .into_iter()
        .collect(),
      ..Tracker::default()
    };
    let linked: BTreeMap<String, Vec<BugId>> = [
      ("a".to_string(), vec![1]),
      ("b".to_string(), vec![5, 404]),
    ]
    .into_iter()
    .collect();
    let reduced = reduce(&tracker, &linked, &StatusFlags::new(), None).unwrap();
    assert_eq!(reduced.by_signature["a"], set(&[2, 3]));
    assert_eq!(reduced.by_signature["b"], set(&[5]));
    // bug 5 has no lifecycle: absent, not an error.
    assert_eq!(reduced.lifecycles.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
  }

  #[test]
  fn bugs_from_other_products_are_dropped() {
    let tracker = Tracker {
      relations: [
        (633447, rel(None, &[])),
        (633452, rel(None, &[634534])),
        (48460, rel(None, &[])),
        (634534, rel(None, &[])),
        (631998, rel(None, &[])),
        (700000, rel(None, &[])),
      ]
      .into_iter()
      .collect(),
      lifecycles: [(633447, unresolved(false, at(2016, 8, 1)))].into_iter().collect(),
      products: [
        (633447, "Core"),
        (633452, "Firefox"),
        (48460, "Mozilla Localizations"),
        (634534, "Thunderbird"),
        (631998, "SeaMonkey"),
      ]
      .into_iter()
      .collect(),
    };
    let products: BTreeSet<String> = ["Core", "Firefox", "Toolkit"].into_iter().map(String::from).collect();

    let all = set(&[633447, 633452, 48460, 634534, 631998, 700000]);
    assert_eq!(
      filter_bugs(&tracker, &all, &products).unwrap(),
      set(&[633447, 633452, 700000])
    );

    let linked: BTreeMap<String, Vec<BugId>> = [("sig".to_string(), vec![633447, 633452, 48460, 631998, 700000])]
      .into_iter()
      .collect();
    let reduced = reduce(&tracker, &linked, &StatusFlags::new(), Some(&products)).unwrap();
    // 700000 has no known product and stays.
    assert_eq!(reduced.by_signature["sig"], set(&[633447, 633452, 700000]));
    assert_eq!(reduced.lifecycles.keys().copied().collect::<Vec<_>>(), vec![633447]);

    let unfiltered = reduce(&tracker, &linked, &StatusFlags::new(), None).unwrap();
    assert_eq!(unfiltered.by_signature["sig"].len(), 6);
  }
}
