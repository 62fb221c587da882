use log::{debug, error, info, warn};

use perception_tally::builder::TallyBuilder;
use perception_tally::period::{locate_period, PERIOD_RULES_VERSION};
use perception_tally::*;
use snafu::{prelude::*, Snafu};

use serde::Serialize;
use serde_json::json;
use serde_json::Value as JSValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use text_diff::print_diff;

mod config_reader;
mod discovery;
mod io_common;
mod io_csv;
mod io_output;

pub use crate::ensu::config_reader::build_settings;
use crate::ensu::discovery::*;
use crate::ensu::io_common::*;
use crate::ensu::io_csv::*;
use crate::ensu::io_output::*;

#[derive(Debug, Snafu)]
pub enum EnsuError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("File {path} is neither valid UTF-8 nor Latin-1"))]
    Decoding { path: String },
    #[snafu(display("Error reading the header of {path}"))]
    CsvHeader { source: csv::Error, path: String },
    #[snafu(display("File {path} is missing the columns {missing:?}"))]
    MissingColumns {
        path: String,
        missing: Vec<&'static str>,
    },
    #[snafu(display("Error parsing line {lineno} of {path}"))]
    CsvLineParse {
        source: csv::Error,
        path: String,
        lineno: usize,
    },
    #[snafu(display("Line {lineno} of {path} has an invalid period"))]
    InvalidPeriod { path: String, lineno: usize },
    #[snafu(display("Error writing CSV output"))]
    CsvWrite { source: csv::Error },
    #[snafu(display("Error writing {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error reading JSON file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON file {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error serializing the run summary"))]
    WritingJson { source: serde_json::Error },
    #[snafu(display("Input directory {path} does not exist"))]
    MissingInputDir { path: String },
    #[snafu(display("Tabulation error: {source}"))]
    Tally { source: TallyErrors },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type EnsuResult<T> = Result<T, EnsuError>;
pub type BEnsuResult<T> = Result<T, Box<EnsuError>>;

/// The settings of a run, once the configuration file and the command line are merged.
#[derive(PartialEq, Debug, Clone)]
pub struct RunSettings {
    pub input_dir: PathBuf,
    /// `None` writes the table to the standard output.
    pub out: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub reference: Option<PathBuf>,
    pub entity: String,
    pub rules: TallyRules,
    pub incremental: bool,
    pub markers: FileMarkers,
    pub municipality_codes: Vec<(String, String)>,
}

impl RunSettings {
    pub fn new(input_dir: &Path) -> RunSettings {
        RunSettings {
            input_dir: input_dir.to_path_buf(),
            out: None,
            summary: None,
            reference: None,
            entity: DEFAULT_ENTITY.to_string(),
            rules: TallyRules::DEFAULT_RULES,
            incremental: false,
            markers: FileMarkers::default(),
            municipality_codes: Vec::new(),
        }
    }
}

pub const DEFAULT_ENTITY: &str = "YUCATAN";

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Tabulated and kept in the output.
    Processed,
    /// Read correctly, but without any record of the target entity.
    Empty,
    /// Another file was preferred for the same period.
    Discarded,
    /// No period could be found in the path.
    Skipped,
    /// Unreadable, or missing required columns.
    Failed,
    /// Incremental mode: the period was already in the output.
    Carried,
}

/// What happened to one source file, as written in the run summary.
#[derive(PartialEq, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub path: String,
    pub status: FileStatus,
    pub period: Option<String>,
    pub period_rule: Option<String>,
    pub encoding: Option<String>,
    pub delimiter: Option<String>,
    pub total_records: u64,
    pub matched_records: u64,
    pub excluded_records: u64,
    pub invalid_response: u64,
    pub missing_municipality: u64,
    pub malformed_rows: u64,
    pub invalid_values: BTreeMap<String, u64>,
    pub message: Option<String>,
}

impl FileReport {
    fn new(path: &str) -> FileReport {
        FileReport {
            path: path.to_string(),
            status: FileStatus::Skipped,
            period: None,
            period_rule: None,
            encoding: None,
            delimiter: None,
            total_records: 0,
            matched_records: 0,
            excluded_records: 0,
            invalid_response: 0,
            missing_municipality: 0,
            malformed_rows: 0,
            invalid_values: BTreeMap::new(),
            message: None,
        }
    }

    fn record_file(&mut self, ft: &FileTally) {
        let d = &ft.tally.diagnostics;
        self.encoding = Some(ft.encoding.to_string());
        self.delimiter = Some((ft.delimiter as char).to_string());
        self.total_records = d.total_records;
        self.matched_records = d.matched_records;
        self.excluded_records = d.excluded_records();
        self.invalid_response = d.invalid_response;
        self.missing_municipality = d.missing_municipality;
        self.malformed_rows = ft.malformed_rows;
        self.invalid_values = d.invalid_values.iter().cloned().collect();
    }
}

/// The outcome of a run.
#[derive(PartialEq, Debug, Clone)]
pub struct RunReport {
    pub rows: Vec<AggregateRow>,
    pub files: Vec<FileReport>,
}

impl RunReport {
    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }
}

fn new_builder(settings: &RunSettings) -> EnsuResult<TallyBuilder> {
    let builder = TallyBuilder::new(&settings.entity, &settings.rules).context(TallySnafu {})?;
    Ok(builder.municipality_codes(&settings.municipality_codes))
}

// Rows of the existing output, for the incremental mode.
fn load_existing_rows(settings: &RunSettings) -> Vec<AggregateRow> {
    let out = match &settings.out {
        Some(p) => p,
        None => {
            warn!("Incremental mode requires an output file, processing all the periods");
            return Vec::new();
        }
    };
    if !out.exists() {
        info!("No existing output at {}, processing all the periods", out.display());
        return Vec::new();
    }
    match read_aggregate_csv(out) {
        Ok(rows) => {
            info!("Read {} existing rows from {}", rows.len(), out.display());
            rows
        }
        Err(e) => {
            warn!(
                "Could not read the existing output {}: {}. Processing all the periods",
                out.display(),
                e
            );
            Vec::new()
        }
    }
}

// Periods of the existing output that can be carried as they are. A period tabulated for
// another entity, or with another grouping, is tabulated again.
fn carried_tallies(
    rows: Vec<AggregateRow>,
    target: &str,
    group_by_city: bool,
) -> Vec<PeriodTally> {
    let mut by_period: BTreeMap<PeriodLabel, Vec<AggregateRow>> = BTreeMap::new();
    for row in rows {
        by_period.entry(row.period).or_default().push(row);
    }
    let mut res: Vec<PeriodTally> = Vec::new();
    for (period, rows) in by_period {
        if let Some(other) = rows.iter().find(|r| r.entity_name != target) {
            warn!(
                "{}: the existing output holds rows for {}, not {}. Tabulating the period again",
                period, other.entity_name, target
            );
            continue;
        }
        if rows.iter().any(|r| r.city_name.is_some() != group_by_city) {
            warn!(
                "{}: the existing output has another grouping by city. Tabulating it again",
                period
            );
            continue;
        }
        debug!("carried_tallies: {}: {} rows", period, rows.len());
        res.push(PeriodTally {
            period,
            rows,
            diagnostics: TallyDiagnostics::default(),
        });
    }
    res
}

fn state_series_js(rows: &[AggregateRow]) -> Vec<JSValue> {
    state_series(rows)
        .iter()
        .map(|p| {
            json!({
                "period": p.period.to_string(),
                "totalRecords": p.total_records,
                "totalSafe": p.total_safe,
                "totalUnsafe": p.total_unsafe,
                "totalNoAnswer": p.total_no_answer,
                "pctSafe": p.pct_safe,
                "pctUnsafe": p.pct_unsafe,
                "pctNoAnswer": p.pct_no_answer,
                "quarterlyChange": p.quarterly_change,
                "yearlyChange": p.yearly_change,
            })
        })
        .collect()
}

fn build_summary_js(target: &str, settings: &RunSettings, report: &RunReport) -> JSValue {
    let periods: BTreeSet<String> = report.rows.iter().map(|r| r.period.to_string()).collect();
    json!({
        "entity": target,
        "groupByCity": settings.rules.group_by_city,
        "periodRulesVersion": PERIOD_RULES_VERSION,
        "periods": periods,
        "rows": report.rows.len(),
        "stateSeries": state_series_js(&report.rows),
        "files": report.files,
    })
}

fn check_reference(path: &Path, produced: &str) -> EnsuResult<()> {
    let p = path.display().to_string();
    let reference = fs::read_to_string(path).context(OpeningFileSnafu { path: p.clone() })?;
    let reference = reference.replace("\r\n", "\n");
    if reference.trim_end() != produced.trim_end() {
        warn!("Found differences with the reference file {}", p);
        print_diff(reference.trim_end(), produced.trim_end(), "\n");
        whatever!(
            "Difference detected between the tabulated output and the reference {}",
            p
        )
    }
    info!("Output matches the reference {}", p);
    Ok(())
}

/// Runs the whole pipeline: discovery, period extraction, tabulation, duplicate resolution
/// and output.
///
/// Failures scoped to a single file are logged and reported in the summary, they never abort
/// the run.
pub fn run_tally(settings: &RunSettings) -> EnsuResult<RunReport> {
    let input = settings.input_dir.display().to_string();
    ensure!(
        settings.input_dir.is_dir(),
        MissingInputDirSnafu { path: input.clone() }
    );
    let target = new_builder(settings)?.target_entity().to_string();
    info!("Tabulating {} from {}", target, input);

    let carried: Vec<PeriodTally> = if settings.incremental {
        carried_tallies(load_existing_rows(settings), &target, settings.rules.group_by_city)
    } else {
        Vec::new()
    };
    let carried_periods: BTreeSet<PeriodLabel> = carried.iter().map(|t| t.period).collect();

    let files = discover_files(&settings.input_dir, &settings.markers);
    info!("Found {} candidate files under {}", files.len(), input);

    let mut reports: Vec<FileReport> = Vec::new();
    let mut candidates: Vec<SourceCandidate> = Vec::new();
    for path in files.iter() {
        let p = path.display().to_string();
        let mut report = FileReport::new(&p);
        let period_match = match locate_period(&relative_path(&settings.input_dir, path)) {
            Some(m) => m,
            None => {
                warn!("{}: no period found in the path, skipping", p);
                report.message = Some("no period found in the path".to_string());
                reports.push(report);
                continue;
            }
        };
        debug!("{}: {:?}", p, period_match);
        let period = period_match.label;
        report.period = Some(period.to_string());
        report.period_rule = Some(period_match.rule.to_string());

        if carried_periods.contains(&period) {
            info!("{}: period {} is already in the output, skipping", p, period);
            report.status = FileStatus::Carried;
            reports.push(report);
            continue;
        }

        match read_survey_file(path, period, new_builder(settings)?) {
            Ok(ft) => {
                report.record_file(&ft);
                if ft.tally.rows.is_empty() {
                    info!("{}: no record for {}", p, target);
                    report.status = FileStatus::Empty;
                } else {
                    report.status = FileStatus::Processed;
                    candidates.push(SourceCandidate {
                        source: p.clone(),
                        modified: modified_secs(path),
                        tally: ft.tally,
                    });
                }
            }
            Err(e) => {
                error!("{}: skipping file: {}", p, e);
                report.status = FileStatus::Failed;
                report.message = Some(e.to_string());
            }
        }
        reports.push(report);
    }

    let selection = select_sources(candidates, settings.rules.duplicate_policy);
    for d in selection.discarded.iter() {
        if let Some(r) = reports.iter_mut().find(|r| r.path == d.source) {
            r.status = FileStatus::Discarded;
            r.message = Some(format!("{} (kept {})", d.reason, d.kept_source));
        }
    }

    let mut tallies: Vec<PeriodTally> = selection.kept.into_iter().map(|c| c.tally).collect();
    tallies.extend(carried);
    let rows = consolidate(&tallies).context(TallySnafu {})?;

    let rendered = render_aggregate_csv(&rows, settings.rules.group_by_city)?;
    match &settings.out {
        Some(out) => {
            fs::write(out, &rendered).context(WritingOutputSnafu {
                path: out.display().to_string(),
            })?;
            info!("Wrote {} rows to {}", rows.len(), out.display());
        }
        None => print!("{}", rendered),
    }

    let report = RunReport {
        rows,
        files: reports,
    };
    if let Some(summary) = &settings.summary {
        write_summary(summary, &build_summary_js(&target, settings, &report))?;
    }
    info!(
        "{} rows over {} periods. Files: {} processed, {} empty, {} discarded, {} skipped, {} failed, {} carried",
        report.rows.len(),
        tallies.len(),
        report.count(FileStatus::Processed),
        report.count(FileStatus::Empty),
        report.count(FileStatus::Discarded),
        report.count(FileStatus::Skipped),
        report.count(FileStatus::Failed),
        report.count(FileStatus::Carried),
    );

    if let Some(reference) = &settings.reference {
        check_reference(reference, &rendered)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_file(root: &Path, rel: &str, contents: &[u8]) -> PathBuf {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, contents).unwrap();
        p
    }

    fn survey(rows: &[(&str, &str, &str, usize)]) -> String {
        let mut s = "ID_VIV,NOM_ENT,NOM_MUN,NOM_CD,BP1_1\n".to_string();
        let mut id = 0;
        for (ent, mun, code, n) in rows {
            for _ in 0..*n {
                id += 1;
                s.push_str(&format!("{},{},{},{},{}\n", id, ent, mun, mun, code));
            }
        }
        s
    }

    fn report_for<'a>(report: &'a RunReport, name: &str) -> &'a FileReport {
        report.files.iter().find(|f| f.path.ends_with(name)).unwrap()
    }

    #[test]
    fn end_to_end() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempdir().unwrap();
        let input = dir.path().join("data");
        write_file(
            &input,
            "conjunto_de_datos_ensu_2021_3t.csv",
            survey(&[
                ("YUCATAN", "Merida", "1", 70),
                ("YUCATAN", "Merida", "2", 20),
                ("YUCATAN", "Merida", "9", 10),
                ("CAMPECHE", "Campeche", "1", 5),
            ])
            .as_bytes(),
        );
        write_file(
            &input,
            "diccionario_de_datos/diccionario_ensu_2021_3t.csv",
            b"NOMBRE,DESCRIPCION\nBP1_1,Percepcion\n",
        );
        write_file(&input, "ensu_notas.csv", b"a,b\n1,2\n");

        let mut settings = RunSettings::new(&input);
        let out = dir.path().join("out.csv");
        let summary = dir.path().join("summary.json");
        settings.out = Some(out.clone());
        settings.summary = Some(summary.clone());
        let report = run_tally(&settings).unwrap();

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.rows.len(), 1);
        let written = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            lines,
            vec![
                "entity_name,municipality_name,total_records,total_safe,total_unsafe,total_no_answer,pct_safe,pct_unsafe,pct_no_answer,year,quarter",
                "YUCATAN,MERIDA,100,70,20,10,70.00,20.00,10.00,2021,3",
            ]
        );
        let processed = report_for(&report, "conjunto_de_datos_ensu_2021_3t.csv");
        assert_eq!(processed.status, FileStatus::Processed);
        assert_eq!(processed.total_records, 105);
        assert_eq!(processed.matched_records, 100);
        assert_eq!(processed.encoding.as_deref(), Some("utf-8"));
        assert_eq!(report_for(&report, "ensu_notas.csv").status, FileStatus::Skipped);

        let js: JSValue = serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
        assert_eq!(js["entity"], "YUCATAN");
        assert_eq!(js["periods"], json!(["2021_Q3"]));
        assert_eq!(js["files"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_periods_are_resolved() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "ENSU_2019_2T/ensu_2019_2t.csv",
            survey(&[("YUCATAN", "Merida", "1", 10)]).as_bytes(),
        );
        write_file(
            dir.path(),
            "reedicion/conjunto_de_datos_ensu_cb_0619.csv",
            survey(&[("Yucatán", "Mérida", "2", 30)]).as_bytes(),
        );
        let mut settings = RunSettings::new(dir.path());
        settings.out = Some(dir.path().join("out.csv"));
        let report = run_tally(&settings).unwrap();

        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.period, PeriodLabel::new(2019, 2).unwrap());
        assert_eq!((row.total_records, row.total_unsafe), (30, 30));
        let discarded = report_for(&report, "ensu_2019_2t.csv");
        assert_eq!(discarded.status, FileStatus::Discarded);
        assert!(discarded
            .message
            .as_ref()
            .unwrap()
            .contains("conjunto_de_datos_ensu_cb_0619.csv"));
        assert_eq!(
            report_for(&report, "conjunto_de_datos_ensu_cb_0619.csv").status,
            FileStatus::Processed
        );
    }

    #[test]
    fn latin1_semicolon_file() {
        let dir = tempdir().unwrap();
        let mut contents: Vec<u8> = b"NOM_ENT;NOM_MUN;BP1_1\n".to_vec();
        for _ in 0..3 {
            contents.extend_from_slice(b"Yucat\xe1n;M\xe9rida;1\n");
        }
        contents.extend_from_slice(b"Yucat\xe1n;Kanas\xedn;9\n");
        write_file(dir.path(), "conjunto_de_datos_CB_ENSU_12_2021.csv", &contents);

        let mut settings = RunSettings::new(dir.path());
        settings.out = Some(dir.path().join("out.csv"));
        let report = run_tally(&settings).unwrap();

        let names: Vec<&str> = report
            .rows
            .iter()
            .map(|r| r.municipality_name.as_str())
            .collect();
        assert_eq!(names, vec!["KANASIN", "MERIDA"]);
        assert_eq!(report.rows[0].period, PeriodLabel::new(2021, 4).unwrap());
        assert_eq!(report.files[0].encoding.as_deref(), Some("windows-1252"));
    }

    #[test]
    fn missing_columns_do_not_abort() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "ensu_2020_1t.csv",
            b"NOM_ENT,NOM_MUN,BP1_2\nYUCATAN,MERIDA,1\n",
        );
        write_file(
            dir.path(),
            "ensu_2020_2t.csv",
            survey(&[("YUCATAN", "Progreso", "1", 6)]).as_bytes(),
        );
        let mut settings = RunSettings::new(dir.path());
        settings.out = Some(dir.path().join("out.csv"));
        let report = run_tally(&settings).unwrap();

        let failed = report_for(&report, "ensu_2020_1t.csv");
        assert_eq!(failed.status, FileStatus::Failed);
        assert!(failed.message.as_ref().unwrap().contains("BP1_1"));
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].municipality_name, "PROGRESO");
    }

    #[test]
    fn legacy_codes_and_cities() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "ensu_2015_4t.csv",
            b"\xef\xbb\xbf\"CVE_ENT\",\"CVE_MUN\",\"CD\",\"BP11\"\n31,050,Merida,1\n31,50,Caucel,2\n04,002,Campeche,1\n31,050,Merida,\n",
        );
        let mut settings = RunSettings::new(dir.path());
        settings.out = Some(dir.path().join("out.csv"));
        settings.rules.group_by_city = true;
        settings.municipality_codes = vec![("050".to_string(), "Mérida".to_string())];
        let report = run_tally(&settings).unwrap();

        let keys: Vec<(&str, Option<&str>)> = report
            .rows
            .iter()
            .map(|r| (r.municipality_name.as_str(), r.city_name.as_deref()))
            .collect();
        assert_eq!(keys, vec![("MERIDA", Some("CAUCEL")), ("MERIDA", Some("MERIDA"))]);
        let f = &report.files[0];
        assert_eq!((f.matched_records, f.invalid_response), (3, 1));
        let written = fs::read_to_string(dir.path().join("out.csv")).unwrap();
        assert!(written.lines().next().unwrap().ends_with(",city_name"));
    }

    #[test]
    fn incremental_carries_existing_periods() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        write_file(
            &input,
            "ensu_2019_2t.csv",
            survey(&[("YUCATAN", "Merida", "1", 8)]).as_bytes(),
        );
        let mut settings = RunSettings::new(&input);
        settings.out = Some(dir.path().join("out.csv"));
        settings.incremental = true;
        let first = run_tally(&settings).unwrap();
        assert_eq!(first.count(FileStatus::Processed), 1);

        write_file(
            &input,
            "ensu_2019_3t.csv",
            survey(&[("YUCATAN", "Merida", "2", 8)]).as_bytes(),
        );
        let second = run_tally(&settings).unwrap();
        assert_eq!(second.count(FileStatus::Carried), 1);
        assert_eq!(second.count(FileStatus::Processed), 1);
        assert_eq!(second.rows.len(), 2);
        assert_eq!(second.rows[0], first.rows[0]);
        assert_eq!(second.rows[1].total_unsafe, 8);
    }

    #[test]
    fn incremental_retabulates_another_entity() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        write_file(
            &input,
            "ensu_2019_2t.csv",
            survey(&[("YUCATAN", "Merida", "1", 8), ("CAMPECHE", "Campeche", "2", 6)])
                .as_bytes(),
        );
        let mut settings = RunSettings::new(&input);
        settings.out = Some(dir.path().join("out.csv"));
        settings.incremental = true;
        settings.entity = "Campeche".to_string();
        let first = run_tally(&settings).unwrap();
        assert_eq!(first.rows[0].entity_name, "CAMPECHE");

        write_file(
            &input,
            "ensu_2019_3t.csv",
            survey(&[("YUCATAN", "Merida", "2", 5)]).as_bytes(),
        );
        settings.entity = "YUCATAN".to_string();
        let second = run_tally(&settings).unwrap();
        assert_eq!(second.count(FileStatus::Carried), 0);
        assert_eq!(second.count(FileStatus::Processed), 2);
        let keys: Vec<(&str, String)> = second
            .rows
            .iter()
            .map(|r| (r.entity_name.as_str(), r.period.to_string()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("YUCATAN", "2019_Q2".to_string()),
                ("YUCATAN", "2019_Q3".to_string())
            ]
        );
        assert_eq!(second.rows[0].total_safe, 8);
    }

    #[test]
    fn incremental_retabulates_another_grouping() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        write_file(
            &input,
            "ensu_2019_2t.csv",
            b"NOM_ENT,NOM_MUN,NOM_CD,BP1_1\nYUCATAN,MERIDA,MERIDA,1\nYUCATAN,MERIDA,CAUCEL,9\n",
        );
        let mut settings = RunSettings::new(&input);
        let out = dir.path().join("out.csv");
        settings.out = Some(out.clone());
        settings.incremental = true;
        settings.rules.group_by_city = true;
        assert_eq!(run_tally(&settings).unwrap().rows.len(), 2);

        settings.rules.group_by_city = false;
        let second = run_tally(&settings).unwrap();
        assert_eq!(second.count(FileStatus::Carried), 0);
        assert_eq!(second.rows.len(), 1);
        let row = &second.rows[0];
        assert_eq!(row.city_name, None);
        assert_eq!((row.total_records, row.total_safe, row.total_no_answer), (2, 1, 1));
        let written = fs::read_to_string(&out).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(!written.contains("city_name"));

        // Same settings again: the period is now carried.
        let third = run_tally(&settings).unwrap();
        assert_eq!(third.count(FileStatus::Carried), 1);
        assert_eq!(third.rows, second.rows);
    }

    #[test]
    fn summary_holds_the_state_series() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        write_file(
            &input,
            "ensu_2020_3t.csv",
            survey(&[("YUCATAN", "Merida", "1", 5), ("YUCATAN", "Merida", "2", 5)]).as_bytes(),
        );
        write_file(
            &input,
            "ensu_2021_3t.csv",
            survey(&[
                ("YUCATAN", "Merida", "1", 7),
                ("YUCATAN", "Merida", "2", 3),
                ("YUCATAN", "Progreso", "2", 10),
            ])
            .as_bytes(),
        );
        let mut settings = RunSettings::new(&input);
        let summary = dir.path().join("summary.json");
        settings.out = Some(dir.path().join("out.csv"));
        settings.summary = Some(summary.clone());
        run_tally(&settings).unwrap();

        let js: JSValue = serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
        let series = js["stateSeries"].as_array().unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0]["period"], "2020_Q3");
        assert_eq!(series[0]["pctUnsafe"], json!(50.0));
        assert_eq!(series[0]["yearlyChange"], JSValue::Null);
        assert_eq!(series[1]["totalRecords"], json!(20));
        assert_eq!(series[1]["pctUnsafe"], json!(65.0));
        assert_eq!(series[1]["quarterlyChange"], json!(15.0));
        assert_eq!(series[1]["yearlyChange"], json!(15.0));
    }

    #[test]
    fn reference_mismatch_fails() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        write_file(
            &input,
            "ensu_2022_1t.csv",
            survey(&[("YUCATAN", "Merida", "1", 5)]).as_bytes(),
        );
        let reference = dir.path().join("reference.csv");
        let mut settings = RunSettings::new(&input);
        settings.out = Some(dir.path().join("out.csv"));

        fs::write(&reference, "entity_name\nsomething else\n").unwrap();
        settings.reference = Some(reference.clone());
        assert!(run_tally(&settings).is_err());

        let produced = fs::read_to_string(dir.path().join("out.csv")).unwrap();
        fs::write(&reference, produced.replace('\n', "\r\n")).unwrap();
        assert!(run_tally(&settings).is_ok());
    }

    #[test]
    fn empty_target_is_a_run_error() {
        let dir = tempdir().unwrap();
        let mut settings = RunSettings::new(dir.path());
        settings.entity = " ".to_string();
        assert!(matches!(
            run_tally(&settings),
            Err(EnsuError::Tally {
                source: TallyErrors::EmptyTargetEntity
            })
        ));
        settings.input_dir = dir.path().join("missing");
        assert!(run_tally(&settings).is_err());
    }
}
