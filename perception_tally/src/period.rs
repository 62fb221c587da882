//! Recovers the survey period (year, quarter) from the path of a source file.
//!
//! The releases of the survey were published over the years with several naming
//! conventions. All of them are listed in a single ordered table, [`PERIOD_RULES`]: the first
//! rule producing a valid period wins. When no rule applies, a last heuristic looks for a
//! plausible year token and a quarter token next to it.
//!
//! The file name is tried first, then the names of up to [`MAX_PARENT_DEPTH`] parent
//! directories, closest first.

use log::debug;
use regex::Regex;
use std::sync::OnceLock;

use crate::config::PeriodLabel;

/// Bumped every time a rule is added, removed or reordered, since this changes the periods
/// attributed to existing files.
pub const PERIOD_RULES_VERSION: u32 = 1;

/// How many parent directories are inspected when the file name has no period.
pub const MAX_PARENT_DEPTH: usize = 3;

/// The range of years accepted by the fallback heuristic.
pub const PLAUSIBLE_YEARS: std::ops::RangeInclusive<u16> = 2015..=2029;

/// The meaning of the two capture groups of a rule.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Extraction {
    /// (year, quarter)
    YearQuarter,
    /// (quarter, year)
    QuarterYear,
    /// (month, year)
    MonthYear,
    /// (year, month)
    YearMonth,
    /// (month, two-digit year in the 2000s)
    MonthShortYear,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct PeriodRule {
    pub name: &'static str,
    /// Applied to the lower-cased name.
    pub pattern: &'static str,
    pub extraction: Extraction,
}

pub const PERIOD_RULES: [PeriodRule; 7] = [
    // ensu_2019_2t, conjunto_de_datos_cb_ensu_2024_1t_csv
    PeriodRule {
        name: "year_quarter_t",
        pattern: r"(?:^|[^0-9])(20\d{2})[_\- ]?([1-4])t(?:[^a-z0-9]|$)",
        extraction: Extraction::YearQuarter,
    },
    // ensu_2022_q3, ensu_2019_t2
    PeriodRule {
        name: "year_q",
        pattern: r"(?:^|[^0-9])(20\d{2})[_\- ]?[qt]([1-4])(?:[^0-9]|$)",
        extraction: Extraction::YearQuarter,
    },
    // datos_t1_2020, q2_2019
    PeriodRule {
        name: "q_year",
        pattern: r"(?:^|[^a-z0-9])[qt]([1-4])[_\- ]?(20\d{2})(?:[^0-9]|$)",
        extraction: Extraction::QuarterYear,
    },
    // conjunto_de_datos_cb_ensu_12_2021, 08_2021_datos
    PeriodRule {
        name: "month_year",
        pattern: r"(?:^|[^0-9])(\d{1,2})[_\-](20\d{2})(?:[^0-9]|$)",
        extraction: Extraction::MonthYear,
    },
    // conjunto_de_datos_ensu_cb_0625
    PeriodRule {
        name: "cb_month_short_year",
        pattern: r"cb[_\-]?(\d{2})(\d{2})(?:[^0-9]|$)",
        extraction: Extraction::MonthShortYear,
    },
    // ensu0322
    PeriodRule {
        name: "ensu_month_short_year",
        pattern: r"ensu[a-z_]*?(\d{2})(\d{2})(?:[^0-9]|$)",
        extraction: Extraction::MonthShortYear,
    },
    // 2023_05_ensu
    PeriodRule {
        name: "year_month",
        pattern: r"(?:^|[^0-9])(20\d{2})[_\-](\d{1,2})(?:[^0-9]|$)",
        extraction: Extraction::YearMonth,
    },
];

pub const FALLBACK_RULE_NAME: &str = "year_token_fallback";

/// A period and where it was found.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PeriodMatch {
    pub label: PeriodLabel,
    /// The name of the rule that matched.
    pub rule: &'static str,
    /// 0 for the file name, 1 for its directory, and so on.
    pub depth: usize,
}

fn compiled_rules() -> &'static Vec<(PeriodRule, Regex)> {
    static COMPILED: OnceLock<Vec<(PeriodRule, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PERIOD_RULES
            .iter()
            .map(|rule| {
                let re = Regex::new(rule.pattern).expect("period rule patterns are valid");
                (*rule, re)
            })
            .collect()
    })
}

/// Returns the period of a file, or `None` if it cannot be determined.
///
/// ```
/// use perception_tally::period::parse_period;
/// use perception_tally::PeriodLabel;
///
/// assert_eq!(
///     parse_period("data/conjunto_de_datos_ensu_cb_0625.csv"),
///     PeriodLabel::new(2025, 2)
/// );
/// assert_eq!(parse_period("data/diccionario.csv"), None);
/// ```
pub fn parse_period(path: &str) -> Option<PeriodLabel> {
    locate_period(path).map(|m| m.label)
}

/// Same as [`parse_period`], but also reports which rule and which path component matched.
pub fn locate_period(path: &str) -> Option<PeriodMatch> {
    let normalized = path.replace('\\', "/");
    let components: Vec<&str> = normalized
        .split('/')
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .collect();
    for (depth, component) in components.iter().rev().take(MAX_PARENT_DEPTH + 1).enumerate() {
        if let Some((label, rule)) = parse_name(component) {
            debug!(
                "locate_period: {:?}: found {} with rule {} at depth {}",
                path, label, rule, depth
            );
            return Some(PeriodMatch { label, rule, depth });
        }
    }
    debug!("locate_period: {:?}: no period found", path);
    None
}

/// Applies the rule table, then the fallback heuristic, to a single name.
pub fn parse_name(name: &str) -> Option<(PeriodLabel, &'static str)> {
    let lower = name.to_lowercase();
    for (rule, re) in compiled_rules().iter() {
        for caps in re.captures_iter(&lower) {
            let (Some(first), Some(second)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            if let Some(label) = extract(rule.extraction, first.as_str(), second.as_str()) {
                return Some((label, rule.name));
            }
        }
    }
    fallback_year_token(&lower).map(|label| (label, FALLBACK_RULE_NAME))
}

fn extract(extraction: Extraction, first: &str, second: &str) -> Option<PeriodLabel> {
    let a: u16 = first.parse().ok()?;
    let b: u16 = second.parse().ok()?;
    match extraction {
        Extraction::YearQuarter => PeriodLabel::new(a, u8::try_from(b).ok()?),
        Extraction::QuarterYear => PeriodLabel::new(b, u8::try_from(a).ok()?),
        Extraction::MonthYear => PeriodLabel::from_month(b, u8::try_from(a).ok()?),
        Extraction::YearMonth => PeriodLabel::from_month(a, u8::try_from(b).ok()?),
        Extraction::MonthShortYear => PeriodLabel::from_month(2000 + b, u8::try_from(a).ok()?),
    }
}

// A quarter written with a letter: 2t, t2, q2
fn lettered_quarter(token: &str) -> Option<u8> {
    let digits: &str = if let Some(d) = token.strip_suffix('t') {
        d
    } else if let Some(d) = token.strip_prefix('t').or_else(|| token.strip_prefix('q')) {
        d
    } else {
        return None;
    };
    match digits.parse::<u8>() {
        Ok(q) if (1..=4).contains(&q) && digits.len() == 1 => Some(q),
        _ => None,
    }
}

/// The last resort: a 4-digit token in [`PLAUSIBLE_YEARS`], combined with the nearest token
/// that reads as a quarter.
///
/// A bare number greater than 10 is taken to be a year suffix and ignored. A bare number
/// up to 10 is taken to be a quarter, and rejected if it is not in 1..=4.
fn fallback_year_token(lower: &str) -> Option<PeriodLabel> {
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let (year_idx, year) = tokens.iter().enumerate().find_map(|(idx, t)| {
        if t.len() == 4 && t.chars().all(|c| c.is_ascii_digit()) {
            let y: u16 = t.parse().ok()?;
            if PLAUSIBLE_YEARS.contains(&y) {
                return Some((idx, y));
            }
        }
        None
    })?;

    let mut others: Vec<(usize, &str)> = tokens
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != year_idx)
        .map(|(idx, t)| (idx.abs_diff(year_idx), *t))
        .collect();
    // Closest first, and the token before the year wins over the token after it.
    others.sort_by_key(|(dist, _)| *dist);

    for (_, token) in others {
        if let Some(q) = lettered_quarter(token) {
            return PeriodLabel::new(year, q);
        }
        if token.len() <= 2 && token.chars().all(|c| c.is_ascii_digit()) {
            let n: u8 = token.parse().ok()?;
            if n > 10 {
                // Most likely a two-digit year.
                continue;
            }
            return PeriodLabel::new(year, n);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(year: u16, quarter: u8) -> Option<PeriodLabel> {
        PeriodLabel::new(year, quarter)
    }

    #[test]
    fn year_and_lettered_quarter() {
        assert_eq!(parse_period("conjunto_de_datos_cb_ENSU_2019_2t.csv"), p(2019, 2));
        assert_eq!(parse_period("ensu_2024_1t_csv/conjunto_de_datos.csv"), p(2024, 1));
        assert_eq!(parse_period("ensu_2022_q3.csv"), p(2022, 3));
        assert_eq!(parse_period("ENSU_2019_T2.csv"), p(2019, 2));
        assert_eq!(parse_period("datos_t1_2020.csv"), p(2020, 1));
        assert_eq!(parse_period("Q4_2018_ensu.csv"), p(2018, 4));
    }

    #[test]
    fn month_then_year() {
        assert_eq!(parse_period("conjunto_de_datos_CB_ENSU_12_2021.csv"), p(2021, 4));
        assert_eq!(parse_period("08_2021_datos.csv"), p(2021, 3));
        assert_eq!(parse_period("ensu_04_2017_csv.csv"), p(2017, 2));
        // Not a month: the rule does not apply.
        assert_eq!(parse_period("ensu_13_2017.csv"), None);
    }

    #[test]
    fn compact_month_and_year() {
        assert_eq!(parse_period("conjunto_de_datos_ensu_cb_0324.csv"), p(2024, 1));
        assert_eq!(parse_period("conjunto_de_datos_ensu_cb_0625.csv"), p(2025, 2));
        assert_eq!(parse_period("ensu_cb_0917.csv"), p(2017, 3));
        assert_eq!(parse_period("ensu0322.csv"), p(2022, 1));
    }

    #[test]
    fn year_then_month() {
        assert_eq!(parse_period("2023_05_ensu.csv"), p(2023, 2));
        assert_eq!(parse_period("ensu_2020_11.csv"), p(2020, 4));
    }

    #[test]
    fn not_found() {
        assert_eq!(parse_period("archivo_sin_fecha.csv"), None);
        assert_eq!(parse_period(""), None);
        assert_eq!(parse_period("diccionario_de_datos.csv"), None);
    }

    #[test]
    fn parent_directories() {
        let m = locate_period("raw/ensu_cb_0319/conjunto_de_datos/conjunto_de_datos_ensu.csv")
            .unwrap();
        assert_eq!(m.label, PeriodLabel { year: 2019, quarter: 1 });
        assert_eq!(m.depth, 2);
        assert_eq!(m.rule, "cb_month_short_year");

        assert_eq!(
            parse_period(r"C:\datos\ENSU_2018_3T\conjunto_de_datos\tabla.csv"),
            p(2018, 3)
        );
        // Too far up.
        assert_eq!(parse_period("ensu_2018_3t/a/b/c/d.csv"), None);
    }

    #[test]
    fn fallback_heuristic() {
        assert_eq!(
            parse_name("ensu 2018 trimestre 2.csv"),
            Some((PeriodLabel { year: 2018, quarter: 2 }, FALLBACK_RULE_NAME))
        );
        // 18 reads as a year suffix, not a quarter.
        assert_eq!(parse_name("ensu 18 2018.csv"), None);
        // Bare numbers between 5 and 10 are not quarters.
        assert_eq!(parse_name("ensu 2018 7.csv"), None);
        // Outside of the plausible years.
        assert_eq!(parse_name("ensu 2031 2.csv"), None);
        // A lettered quarter before the year.
        assert_eq!(
            parse_name("ensu 2t 2019 extra"),
            Some((PeriodLabel { year: 2019, quarter: 2 }, FALLBACK_RULE_NAME))
        );
    }

    #[test]
    fn quarter_always_in_range_and_deterministic() {
        let names = [
            "conjunto_de_datos_cb_ENSU_2019_2t.csv",
            "conjunto_de_datos_CB_ENSU_12_2021.csv",
            "conjunto_de_datos_ensu_cb_0625.csv",
            "ensu_2022_q3.csv",
            "2023_05_ensu.csv",
            "ensu 2018 trimestre 2.csv",
        ];
        for name in names {
            let first = parse_period(name).unwrap();
            assert!((1..=4).contains(&first.quarter));
            assert!((2015..=2029).contains(&first.year));
            assert_eq!(parse_period(name), Some(first));
        }
    }
}
