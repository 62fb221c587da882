// Primitives for reading the survey files.

use std::path::Path;

use csv::StringRecord;
use encoding_rs::WINDOWS_1252;

use perception_tally::schema::{clean_header_name, SchemaMapping};

use crate::ensu::*;

/// The tabulation of one file, and how the file was read.
#[derive(PartialEq, Debug, Clone)]
pub struct FileTally {
    pub tally: PeriodTally,
    pub encoding: &'static str,
    pub delimiter: u8,
    /// Rows the CSV parser could not read.
    pub malformed_rows: u64,
}

/// Decodes the content of a file as UTF-8, or as Latin-1 when it is not valid UTF-8.
///
/// Returns the text without its byte order mark, and the name of the encoding used. Valid
/// UTF-8 content is reused in place.
pub fn decode_contents(bytes: Vec<u8>, path: &str) -> EnsuResult<(String, &'static str)> {
    match String::from_utf8(bytes) {
        Ok(mut s) => {
            if s.starts_with('\u{feff}') {
                s.drain(..'\u{feff}'.len_utf8());
            }
            Ok((s, "utf-8"))
        }
        Err(e) => {
            debug!(
                "decode_contents: {}: not UTF-8 ({}), trying Latin-1",
                path,
                e.utf8_error()
            );
            let bytes = e.into_bytes();
            let (text, had_errors) = WINDOWS_1252.decode_without_bom_handling(&bytes);
            ensure!(!had_errors, DecodingSnafu { path });
            Ok((text.into_owned(), WINDOWS_1252.name()))
        }
    }
}

/// `;` when the first two lines hold more semicolons than commas, `,` otherwise.
pub fn detect_delimiter(contents: &str) -> u8 {
    let (semicolons, commas) = contents
        .lines()
        .take(2)
        .fold((0, 0), |(s, c), line| {
            (s + line.matches(';').count(), c + line.matches(',').count())
        });
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn cell(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).filter(|s| !s.is_empty())
}

/// Streams the records of `contents` into the builder.
///
/// The columns are resolved with the schema of the era of `period`. A file missing a required
/// column is rejected as a whole.
pub fn tally_contents(
    contents: &str,
    path: &str,
    period: PeriodLabel,
    mut builder: TallyBuilder,
) -> BEnsuResult<(PeriodTally, u8, u64)> {
    let delimiter = detect_delimiter(contents);
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());

    let header: Vec<String> = rdr
        .headers()
        .context(CsvHeaderSnafu { path })?
        .iter()
        .map(clean_header_name)
        .collect();
    debug!("tally_contents: {}: header: {:?}", path, header);

    let mapping = SchemaMapping::for_year(period.year);
    let cols = match mapping.resolve(&header) {
        Ok(cols) => cols,
        Err(missing) => {
            return Err(Box::new(EnsuError::MissingColumns {
                path: path.to_string(),
                missing,
            }))
        }
    };

    let mut malformed_rows: u64 = 0;
    for (idx, record_r) in rdr.records().enumerate() {
        // The header is line 1.
        let lineno = idx + 2;
        let record = match record_r {
            Ok(r) => r,
            Err(e) => {
                warn!("{}: line {}: skipping malformed row: {}", path, lineno, e);
                malformed_rows += 1;
                continue;
            }
        };
        builder.add_fields(
            cell(&record, cols.entity),
            cell(&record, cols.municipality),
            cols.city.and_then(|i| cell(&record, i)),
            record.get(cols.response),
        );
    }

    let tally = builder.finish(period);
    let d = &tally.diagnostics;
    info!(
        "{}: {} records, {} matched, {} excluded ({} invalid responses, {} without municipality), {} malformed rows",
        path,
        d.total_records,
        d.matched_records,
        d.excluded_records(),
        d.invalid_response,
        d.missing_municipality,
        malformed_rows
    );
    if !d.invalid_values.is_empty() {
        debug!("{}: rejected response values: {:?}", path, d.invalid_values);
    }
    Ok((tally, delimiter, malformed_rows))
}

/// Reads and tabulates one survey file.
///
/// The file is loaded and decoded once. The records are then streamed into the builder
/// without being collected.
pub fn read_survey_file(
    path: &Path,
    period: PeriodLabel,
    builder: TallyBuilder,
) -> BEnsuResult<FileTally> {
    let p = path.display().to_string();
    info!("Reading survey file {} for period {}", p, period);
    let bytes = fs::read(path).context(OpeningFileSnafu { path: p.clone() })?;
    let (contents, encoding) = decode_contents(bytes, &p)?;
    let (tally, delimiter, malformed_rows) = tally_contents(&contents, &p, period, builder)?;
    Ok(FileTally {
        tally,
        encoding,
        delimiter,
        malformed_rows,
    })
}
