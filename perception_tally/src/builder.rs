use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

pub use crate::config::*;
use crate::normalize::{normalize_entity, normalize_optional, normalize_text};

/// A builder that tabulates records one at a time.
///
/// Using the builder should be considered when reading large files, since the records do not
/// need to be kept in memory.
///
/// ```
/// use perception_tally::builder::TallyBuilder;
/// use perception_tally::{PeriodLabel, TallyRules};
/// # use perception_tally::TallyErrors;
///
/// let mut builder = TallyBuilder::new("Yucatán", &TallyRules::DEFAULT_RULES)?;
///
/// builder.add_fields(Some("YUCATAN"), Some("Mérida"), None, Some("1"));
/// builder.add_fields(Some("yucatan"), Some("MERIDA"), None, Some("2.0"));
/// builder.add_fields(Some("CAMPECHE"), Some("Campeche"), None, Some("1"));
///
/// let tally = builder.finish(PeriodLabel::new(2019, 2).unwrap());
/// assert_eq!(tally.rows.len(), 1);
/// assert_eq!(tally.rows[0].total_records, 2);
/// # Ok::<(), TallyErrors>(())
/// ```
pub struct TallyBuilder {
    pub(crate) _rules: TallyRules,
    pub(crate) _target: String,
    // Numeric municipality code (without leading zeros) -> name
    pub(crate) _municipality_codes: HashMap<String, String>,
    // (municipality, city) -> (safe, unsafe, no answer)
    pub(crate) _groups: BTreeMap<(String, Option<String>), (u64, u64, u64)>,
    pub(crate) _diagnostics: TallyDiagnostics,
    pub(crate) _invalid_values: BTreeMap<String, u64>,
}

fn code_key(code: &str) -> Option<String> {
    let s = code.trim();
    let s = s.strip_suffix(".0").unwrap_or(s);
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let trimmed = s.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0" } else { trimmed }.to_string())
}

impl TallyBuilder {
    pub fn new(target_entity: &str, rules: &TallyRules) -> Result<TallyBuilder, TallyErrors> {
        let target = normalize_entity(Some(target_entity));
        if target.is_empty() {
            return Err(TallyErrors::EmptyTargetEntity);
        }
        Ok(TallyBuilder {
            _rules: rules.clone(),
            _target: target,
            _municipality_codes: HashMap::new(),
            _groups: BTreeMap::new(),
            _diagnostics: TallyDiagnostics::default(),
            _invalid_values: BTreeMap::new(),
        })
    }

    /// Registers a catalogue translating numeric municipality codes into names.
    ///
    /// Older vintages only carry the INEGI code of the municipality. Codes are compared
    /// numerically: `"050"` and `"50"` are the same code.
    pub fn municipality_codes(self, codes: &[(String, String)]) -> TallyBuilder {
        let catalogue: HashMap<String, String> = codes
            .iter()
            .filter_map(|(code, name)| code_key(code).map(|k| (k, normalize_text(name))))
            .collect();
        TallyBuilder {
            _municipality_codes: catalogue,
            ..self
        }
    }

    /// The normalized name of the entity being tabulated.
    pub fn target_entity(&self) -> &str {
        &self._target
    }

    pub fn add_record(&mut self, record: &SourceRecord) {
        self.add_fields(
            record.entity_name.as_deref(),
            record.municipality_name.as_deref(),
            record.city_name.as_deref(),
            record.response_code.as_deref(),
        )
    }

    /// Adds a record given by its raw fields.
    pub fn add_fields(
        &mut self,
        entity: Option<&str>,
        municipality: Option<&str>,
        city: Option<&str>,
        response: Option<&str>,
    ) {
        self._diagnostics.total_records += 1;
        if normalize_entity(entity) != self._target {
            return;
        }
        self._diagnostics.matched_records += 1;

        let code = match response.and_then(ResponseCode::coerce) {
            Some(code) => code,
            None => {
                self._diagnostics.invalid_response += 1;
                let raw = response.map(|s| s.trim()).unwrap_or("").to_string();
                *self._invalid_values.entry(raw).or_insert(0) += 1;
                return;
            }
        };

        let municipality_name = self.municipality_name(municipality);
        if municipality_name.is_empty() {
            self._diagnostics.missing_municipality += 1;
            return;
        }

        let city_name = if self._rules.group_by_city {
            Some(normalize_optional(city)).filter(|s| !s.is_empty())
        } else {
            None
        };

        let counts = self
            ._groups
            .entry((municipality_name, city_name))
            .or_insert((0, 0, 0));
        match code {
            ResponseCode::Safe => counts.0 += 1,
            ResponseCode::Unsafe => counts.1 += 1,
            ResponseCode::NoAnswer => counts.2 += 1,
        }
    }

    // Numeric codes without a catalogue entry keep their value without leading zeros.
    fn municipality_name(&self, raw: Option<&str>) -> String {
        match raw.and_then(code_key) {
            Some(k) => match self._municipality_codes.get(&k) {
                Some(name) => name.clone(),
                None => k,
            },
            None => normalize_optional(raw),
        }
    }

    /// The counters accumulated so far.
    pub fn diagnostics(&self) -> TallyDiagnostics {
        TallyDiagnostics {
            invalid_values: self
                ._invalid_values
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            ..self._diagnostics.clone()
        }
    }

    /// Produces one row per group, ordered by municipality and city.
    pub fn finish(self, period: PeriodLabel) -> PeriodTally {
        let diagnostics = self.diagnostics();
        let mut rows: Vec<AggregateRow> = Vec::new();
        for ((municipality, city), counts) in self._groups.iter() {
            let row = AggregateRow::new(
                &self._target,
                municipality,
                city.as_deref(),
                *counts,
                period,
            );
            if row.total_records < self._rules.small_group_threshold {
                warn!(
                    "{}: {} {:?}: only {} records, percentages are not significant",
                    period, municipality, city, row.total_records
                );
            }
            debug!("finish: {}: {:?}", period, row);
            rows.push(row);
        }
        info!(
            "{}: {} records, {} for {}, {} excluded, {} groups",
            period,
            diagnostics.total_records,
            diagnostics.matched_records,
            self._target,
            diagnostics.excluded_records(),
            rows.len()
        );
        PeriodTally {
            period,
            rows,
            diagnostics,
        }
    }
}
