// ********* Input data structures ***********

use std::cmp::Ordering;
use std::error::Error;
use std::fmt::Display;

/// A quarterly survey release, identified by its year and its quarter.
///
/// The quarter is guaranteed to be in `1..=4` when built through [`PeriodLabel::new`].
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct PeriodLabel {
    pub year: u16,
    pub quarter: u8,
}

impl PeriodLabel {
    pub fn new(year: u16, quarter: u8) -> Option<PeriodLabel> {
        if (1..=4).contains(&quarter) {
            Some(PeriodLabel { year, quarter })
        } else {
            None
        }
    }

    /// The quarter containing the given month (1-12).
    pub fn from_month(year: u16, month: u8) -> Option<PeriodLabel> {
        if (1..=12).contains(&month) {
            PeriodLabel::new(year, (month - 1) / 3 + 1)
        } else {
            None
        }
    }
}

impl Display for PeriodLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_Q{}", self.year, self.quarter)
    }
}

/// The coded answers of question BP1_1.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum ResponseCode {
    /// 1: feels safe
    Safe,
    /// 2: feels unsafe
    Unsafe,
    /// 9: does not know or did not answer
    NoAnswer,
}

impl ResponseCode {
    pub fn code(&self) -> u8 {
        match self {
            ResponseCode::Safe => 1,
            ResponseCode::Unsafe => 2,
            ResponseCode::NoAnswer => 9,
        }
    }

    /// Coerces a raw cell into a response.
    ///
    /// Integers and integral floats (`"1"`, `" 2 "`, `"9.0"`) are accepted. Everything else,
    /// including codes outside of {1, 2, 9}, returns `None`.
    pub fn coerce(raw: &str) -> Option<ResponseCode> {
        let s = raw.trim();
        let value: i64 = match s.parse::<i64>() {
            Ok(x) => x,
            Err(_) => {
                let f = s.parse::<f64>().ok()?;
                if !f.is_finite() || f.fract() != 0.0 {
                    return None;
                }
                f as i64
            }
        };
        match value {
            1 => Some(ResponseCode::Safe),
            2 => Some(ResponseCode::Unsafe),
            9 => Some(ResponseCode::NoAnswer),
            _ => None,
        }
    }
}

/// One row of a raw survey file, restricted to the fields of interest.
///
/// The values are kept as they were read: no normalization has been applied yet.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct SourceRecord {
    pub entity_name: Option<String>,
    pub municipality_name: Option<String>,
    pub city_name: Option<String>,
    pub response_code: Option<String>,
}

// ******** Output data structures *********

/// The tabulation for one municipality (and optionally one city) in one period.
///
/// Invariant: `total_records == total_safe + total_unsafe + total_no_answer`.
#[derive(PartialEq, Debug, Clone)]
pub struct AggregateRow {
    pub entity_name: String,
    pub municipality_name: String,
    pub city_name: Option<String>,
    pub total_records: u64,
    pub total_safe: u64,
    pub total_unsafe: u64,
    pub total_no_answer: u64,
    pub pct_safe: f64,
    pub pct_unsafe: f64,
    pub pct_no_answer: f64,
    pub period: PeriodLabel,
}

impl AggregateRow {
    pub fn new(
        entity_name: &str,
        municipality_name: &str,
        city_name: Option<&str>,
        counts: (u64, u64, u64),
        period: PeriodLabel,
    ) -> AggregateRow {
        let (total_safe, total_unsafe, total_no_answer) = counts;
        let total_records = total_safe + total_unsafe + total_no_answer;
        AggregateRow {
            entity_name: entity_name.to_string(),
            municipality_name: municipality_name.to_string(),
            city_name: city_name.map(|s| s.to_string()),
            total_records,
            total_safe,
            total_unsafe,
            total_no_answer,
            pct_safe: percentage(total_safe, total_records),
            pct_unsafe: percentage(total_unsafe, total_records),
            pct_no_answer: percentage(total_no_answer, total_records),
            period,
        }
    }

    /// The ordering of the consolidated output: period, then municipality, then city.
    pub fn output_order(&self, other: &AggregateRow) -> Ordering {
        (
            self.period,
            &self.municipality_name,
            &self.city_name,
            &self.entity_name,
        )
            .cmp(&(
                other.period,
                &other.municipality_name,
                &other.city_name,
                &other.entity_name,
            ))
    }
}

/// `100 * count / total`, rounded to 2 decimals. Zero when the total is zero.
pub fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(100.0 * (count as f64) / (total as f64))
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// The entity as a whole in one period: the counts of all its municipalities added up.
///
/// The percentages are therefore weighted by the number of records of each municipality.
#[derive(PartialEq, Debug, Clone)]
pub struct StatePeriod {
    pub period: PeriodLabel,
    pub total_records: u64,
    pub total_safe: u64,
    pub total_unsafe: u64,
    pub total_no_answer: u64,
    pub pct_safe: f64,
    pub pct_unsafe: f64,
    pub pct_no_answer: f64,
    /// Change of `pct_unsafe` (in points) since the previous period of the series.
    pub quarterly_change: Option<f64>,
    /// Change of `pct_unsafe` (in points) since the same quarter of the previous year.
    pub yearly_change: Option<f64>,
}

/// Counters kept while reading one source file, for auditing.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct TallyDiagnostics {
    /// All the records seen.
    pub total_records: u64,
    /// The records whose normalized entity is the target entity.
    pub matched_records: u64,
    /// Matched records dropped because the response could not be coerced to {1, 2, 9}.
    pub invalid_response: u64,
    /// Matched records dropped because the municipality is missing.
    pub missing_municipality: u64,
    /// The raw values that were rejected as responses, with their number of occurences.
    pub invalid_values: Vec<(String, u64)>,
}

impl TallyDiagnostics {
    pub fn excluded_records(&self) -> u64 {
        self.invalid_response + self.missing_municipality
    }
}

/// The result of tabulating one source file.
#[derive(PartialEq, Debug, Clone)]
pub struct PeriodTally {
    pub period: PeriodLabel,
    pub rows: Vec<AggregateRow>,
    pub diagnostics: TallyDiagnostics,
}

/// A source file that produced a tally, competing with other files for its period.
#[derive(PartialEq, Debug, Clone)]
pub struct SourceCandidate {
    pub source: String,
    /// Seconds since the epoch, if known.
    pub modified: Option<u64>,
    pub tally: PeriodTally,
}

#[derive(PartialEq, Debug, Clone)]
pub struct DiscardedSource {
    pub source: String,
    pub kept_source: String,
    pub period: PeriodLabel,
    pub reason: String,
}

#[derive(PartialEq, Debug, Clone, Default)]
pub struct SourceSelection {
    /// At most one candidate per period, ordered by period.
    pub kept: Vec<SourceCandidate>,
    pub discarded: Vec<DiscardedSource>,
}

/// Errors that prevent the tabulation from starting.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum TallyErrors {
    /// The target entity is empty once normalized.
    EmptyTargetEntity,
    /// The same period was provided twice to the consolidation.
    DuplicatePeriod(PeriodLabel),
}

impl Error for TallyErrors {}

impl Display for TallyErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TallyErrors::EmptyTargetEntity => write!(f, "the target entity is empty"),
            TallyErrors::DuplicatePeriod(p) => {
                write!(f, "period {} was provided more than once", p)
            }
        }
    }
}

// ********* Configuration **********

/// How to pick a single source file when several map to the same period.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum DuplicatePolicy {
    /// Keep the file with the most records of the target entity, then the most recent one.
    LargestMatchedCount,
    /// Keep the most recent file, then the one with the most records of the target entity.
    MostRecent,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct TallyRules {
    /// Groups by (municipality, city) instead of municipality alone.
    pub group_by_city: bool,
    /// Groups with fewer records than this are reported in the logs.
    pub small_group_threshold: u64,
    pub duplicate_policy: DuplicatePolicy,
}

impl TallyRules {
    pub const DEFAULT_RULES: TallyRules = TallyRules {
        group_by_city: false,
        small_group_threshold: 5,
        duplicate_policy: DuplicatePolicy::LargestMatchedCount,
    };
}
