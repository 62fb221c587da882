// Writing and reading back the consolidated table, and the run summary.

use std::io::Write;
use std::path::Path;

use serde::Deserialize;

use crate::ensu::*;

pub const OUTPUT_HEADER: [&str; 11] = [
    "entity_name",
    "municipality_name",
    "total_records",
    "total_safe",
    "total_unsafe",
    "total_no_answer",
    "pct_safe",
    "pct_unsafe",
    "pct_no_answer",
    "year",
    "quarter",
];

pub const CITY_COLUMN: &str = "city_name";

/// A row of the output file, as read back.
#[derive(PartialEq, Debug, Clone, Deserialize)]
struct CsvAggregateRow {
    entity_name: String,
    municipality_name: String,
    total_records: u64,
    total_safe: u64,
    total_unsafe: u64,
    total_no_answer: u64,
    pct_safe: f64,
    pct_unsafe: f64,
    pct_no_answer: f64,
    year: u16,
    quarter: u8,
    #[serde(default)]
    city_name: Option<String>,
}

/// Writes the table. The city column is only present when grouping by city.
pub fn write_aggregate_csv<W: Write>(
    writer: W,
    rows: &[AggregateRow],
    with_city: bool,
) -> EnsuResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header: Vec<&str> = OUTPUT_HEADER.to_vec();
    if with_city {
        header.push(CITY_COLUMN);
    }
    wtr.write_record(&header).context(CsvWriteSnafu {})?;
    for row in rows.iter() {
        let mut record: Vec<String> = vec![
            row.entity_name.clone(),
            row.municipality_name.clone(),
            row.total_records.to_string(),
            row.total_safe.to_string(),
            row.total_unsafe.to_string(),
            row.total_no_answer.to_string(),
            format!("{:.2}", row.pct_safe),
            format!("{:.2}", row.pct_unsafe),
            format!("{:.2}", row.pct_no_answer),
            row.period.year.to_string(),
            row.period.quarter.to_string(),
        ];
        if with_city {
            record.push(row.city_name.clone().unwrap_or_default());
        }
        wtr.write_record(&record).context(CsvWriteSnafu {})?;
    }
    wtr.flush().context(WritingOutputSnafu {
        path: "<csv output>".to_string(),
    })?;
    Ok(())
}

pub fn render_aggregate_csv(rows: &[AggregateRow], with_city: bool) -> EnsuResult<String> {
    let mut buf: Vec<u8> = Vec::new();
    write_aggregate_csv(&mut buf, rows, with_city)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Reads a table written by [`write_aggregate_csv`].
pub fn read_aggregate_csv(path: &Path) -> EnsuResult<Vec<AggregateRow>> {
    let p = path.display().to_string();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .context(CsvHeaderSnafu { path: p.clone() })?;
    let mut res: Vec<AggregateRow> = Vec::new();
    for (idx, row_r) in rdr.deserialize::<CsvAggregateRow>().enumerate() {
        let lineno = idx + 2;
        let row = row_r.context(CsvLineParseSnafu {
            path: p.clone(),
            lineno,
        })?;
        let period = PeriodLabel::new(row.year, row.quarter).context(InvalidPeriodSnafu {
            path: p.clone(),
            lineno,
        })?;
        res.push(AggregateRow {
            entity_name: row.entity_name,
            municipality_name: row.municipality_name,
            city_name: row.city_name.filter(|s| !s.is_empty()),
            total_records: row.total_records,
            total_safe: row.total_safe,
            total_unsafe: row.total_unsafe,
            total_no_answer: row.total_no_answer,
            pct_safe: row.pct_safe,
            pct_unsafe: row.pct_unsafe,
            pct_no_answer: row.pct_no_answer,
            period,
        });
    }
    Ok(res)
}

pub fn write_summary(path: &Path, summary: &JSValue) -> EnsuResult<()> {
    let pretty_js = serde_json::to_string_pretty(summary).context(WritingJsonSnafu {})?;
    fs::write(path, pretty_js).context(WritingOutputSnafu {
        path: path.display().to_string(),
    })?;
    info!("Wrote the run summary to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rows() -> Vec<AggregateRow> {
        let q = |y, n| PeriodLabel::new(y, n).unwrap();
        vec![
            AggregateRow::new("YUCATAN", "KANASIN", Some("KANASIN"), (1, 1, 1), q(2019, 2)),
            AggregateRow::new("YUCATAN", "MERIDA", Some("CAUCEL"), (70, 20, 10), q(2019, 2)),
            AggregateRow::new("YUCATAN", "MERIDA", None, (2, 5, 0), q(2020, 4)),
        ]
    }

    #[test]
    fn written_layout() {
        let s = render_aggregate_csv(&rows()[..1], false).unwrap();
        assert_eq!(
            s,
            "entity_name,municipality_name,total_records,total_safe,total_unsafe,total_no_answer,pct_safe,pct_unsafe,pct_no_answer,year,quarter\n\
             YUCATAN,KANASIN,3,1,1,1,33.33,33.33,33.33,2019,2\n"
        );
    }

    #[test]
    fn read_back() {
        let dir = tempdir().unwrap();
        let with_city = dir.path().join("city.csv");
        fs::write(&with_city, render_aggregate_csv(&rows(), true).unwrap()).unwrap();
        assert_eq!(read_aggregate_csv(&with_city).unwrap(), rows());

        let without_city = dir.path().join("mun.csv");
        fs::write(&without_city, render_aggregate_csv(&rows(), false).unwrap()).unwrap();
        let back = read_aggregate_csv(&without_city).unwrap();
        assert!(back.iter().all(|r| r.city_name.is_none()));
        assert_eq!(back[1].pct_safe, 70.0);
        assert_eq!(back[2].pct_unsafe, 71.43);
    }

    #[test]
    fn bad_quarter_is_rejected() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("bad.csv");
        fs::write(
            &p,
            "entity_name,municipality_name,total_records,total_safe,total_unsafe,total_no_answer,pct_safe,pct_unsafe,pct_no_answer,year,quarter\n\
             YUCATAN,MERIDA,1,1,0,0,100.00,0.00,0.00,2019,5\n",
        )
        .unwrap();
        assert!(matches!(
            read_aggregate_csv(&p),
            Err(EnsuError::InvalidPeriod { lineno: 2, .. })
        ));
    }
}
