/*!
Tabulation of the sense of safety (question BP1_1) of INEGI's urban public security survey
(ENSU), per municipality and per quarter.

The crate is split in small pieces that can be used independently:
- [`period`] recovers the (year, quarter) of a release from the name of its file
- [`normalize`] canonicalizes the names of entities and municipalities
- [`schema`] finds the columns of interest in the successive vintages of the survey
- [`builder`] tabulates the records of one release for a target entity
- [`select_sources`] and [`consolidate`] assemble the releases into a single table
- [`state_series`] sums the municipalities into one series for the whole entity

```
use perception_tally::*;

let rows = vec![
    SourceRecord {
        entity_name: Some("Yucatán".to_string()),
        municipality_name: Some("Mérida".to_string()),
        city_name: None,
        response_code: Some("1".to_string()),
    },
    SourceRecord {
        entity_name: Some("CAMPECHE".to_string()),
        municipality_name: Some("Campeche".to_string()),
        city_name: None,
        response_code: Some("2".to_string()),
    },
];
let period = period::parse_period("conjunto_de_datos_ensu_cb_0619.csv").unwrap();
let tally = tally_period(&rows, period, "YUCATAN", &TallyRules::DEFAULT_RULES)?;
assert_eq!(tally.rows.len(), 1);
assert_eq!(tally.rows[0].municipality_name, "MERIDA");
assert_eq!(tally.rows[0].pct_safe, 100.0);
# Ok::<(), TallyErrors>(())
```
*/
mod config;

pub mod builder;
pub mod manual;
pub mod normalize;
pub mod period;
pub mod schema;

use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

pub use crate::config::*;

use crate::builder::TallyBuilder;

/// Tabulates the records of one source file for the target entity.
///
/// Arguments:
/// * `records` the raw records of the file
/// * `period` the period of the file, shared by all its records
/// * `target_entity` the entity to keep, in any casing or accentuation
/// * `rules` the rules that govern the grouping
pub fn tally_period(
    records: &[SourceRecord],
    period: PeriodLabel,
    target_entity: &str,
    rules: &TallyRules,
) -> Result<PeriodTally, TallyErrors> {
    let mut builder = TallyBuilder::new(target_entity, rules)?;
    for record in records.iter() {
        builder.add_record(record);
    }
    Ok(builder.finish(period))
}

// Greater means preferred.
fn compare_candidates(
    a: &SourceCandidate,
    b: &SourceCandidate,
    policy: DuplicatePolicy,
) -> Ordering {
    let by_count = a
        .tally
        .diagnostics
        .matched_records
        .cmp(&b.tally.diagnostics.matched_records);
    let by_time = a.modified.cmp(&b.modified);
    let first = match policy {
        DuplicatePolicy::LargestMatchedCount => by_count.then(by_time),
        DuplicatePolicy::MostRecent => by_time.then(by_count),
    };
    // The path only matters to make the choice deterministic.
    first.then_with(|| a.source.cmp(&b.source))
}

fn discard_reason(
    kept: &SourceCandidate,
    other: &SourceCandidate,
    policy: DuplicatePolicy,
) -> String {
    let kept_count = kept.tally.diagnostics.matched_records;
    let other_count = other.tally.diagnostics.matched_records;
    let count_reason = || {
        (kept_count != other_count).then(|| {
            format!(
                "fewer records for the target entity ({} < {})",
                other_count, kept_count
            )
        })
    };
    let time_reason = || {
        (kept.modified != other.modified).then(|| {
            format!(
                "older modification time ({:?} < {:?})",
                other.modified, kept.modified
            )
        })
    };
    let reason = match policy {
        DuplicatePolicy::LargestMatchedCount => count_reason().or_else(time_reason),
        DuplicatePolicy::MostRecent => time_reason().or_else(count_reason),
    };
    reason.unwrap_or_else(|| {
        "same record count and modification time, path sorts first".to_string()
    })
}

/// Keeps a single source file per period.
///
/// Re-released files regularly map to the same period. Counting them all would count the
/// same quarter twice: only the preferred file according to the policy is kept, and every
/// other one is reported as discarded.
pub fn select_sources(
    candidates: Vec<SourceCandidate>,
    policy: DuplicatePolicy,
) -> SourceSelection {
    let mut by_period: BTreeMap<PeriodLabel, Vec<SourceCandidate>> = BTreeMap::new();
    for c in candidates {
        by_period.entry(c.tally.period).or_default().push(c);
    }

    let mut selection = SourceSelection::default();
    for (period, mut group) in by_period {
        // Most preferred last.
        group.sort_by(|a, b| compare_candidates(a, b, policy));
        let kept = match group.pop() {
            Some(c) => c,
            None => continue,
        };
        for other in group.into_iter().rev() {
            let reason = discard_reason(&kept, &other, policy);
            warn!(
                "{}: discarding {} in favor of {}: {}",
                period, other.source, kept.source, reason
            );
            selection.discarded.push(DiscardedSource {
                source: other.source,
                kept_source: kept.source.clone(),
                period,
                reason,
            });
        }
        debug!("select_sources: {}: keeping {}", period, kept.source);
        selection.kept.push(kept);
    }
    info!(
        "select_sources: {} periods kept, {} files discarded",
        selection.kept.len(),
        selection.discarded.len()
    );
    selection
}

/// Concatenates the rows of all the periods, sorted by period then municipality.
///
/// Fails if a period appears more than once: duplicates must be resolved before, for example
/// with [`select_sources`].
pub fn consolidate(tallies: &[PeriodTally]) -> Result<Vec<AggregateRow>, TallyErrors> {
    let mut seen: HashSet<PeriodLabel> = HashSet::new();
    let mut rows: Vec<AggregateRow> = Vec::new();
    for tally in tallies.iter() {
        if !seen.insert(tally.period) {
            return Err(TallyErrors::DuplicatePeriod(tally.period));
        }
        rows.extend(tally.rows.iter().cloned());
    }
    rows.sort_by(|a, b| a.output_order(b));
    Ok(rows)
}

/// The series of the whole entity, one entry per period, in chronological order.
///
/// The counts of every row of a period are added up before computing the percentages, so
/// each municipality weighs by its number of records. The changes are computed on the
/// share of unsafe responses.
pub fn state_series(rows: &[AggregateRow]) -> Vec<StatePeriod> {
    let mut by_period: BTreeMap<PeriodLabel, (u64, u64, u64)> = BTreeMap::new();
    for row in rows.iter() {
        let counts = by_period.entry(row.period).or_insert((0, 0, 0));
        counts.0 += row.total_safe;
        counts.1 += row.total_unsafe;
        counts.2 += row.total_no_answer;
    }

    let mut series: Vec<StatePeriod> = Vec::new();
    for (period, (safe, unsafe_, no_answer)) in by_period {
        let total = safe + unsafe_ + no_answer;
        let pct_unsafe = percentage(unsafe_, total);
        let quarterly_change = series.last().map(|p| round2(pct_unsafe - p.pct_unsafe));
        let yearly_change = series
            .iter()
            .find(|p| p.period.year + 1 == period.year && p.period.quarter == period.quarter)
            .map(|p| round2(pct_unsafe - p.pct_unsafe));
        debug!(
            "state_series: {}: {} records, {}% unsafe",
            period, total, pct_unsafe
        );
        series.push(StatePeriod {
            period,
            total_records: total,
            total_safe: safe,
            total_unsafe: unsafe_,
            total_no_answer: no_answer,
            pct_safe: percentage(safe, total),
            pct_unsafe,
            pct_no_answer: percentage(no_answer, total),
            quarterly_change,
            yearly_change,
        });
    }
    series
}
