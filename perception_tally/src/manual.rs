/*!

This is the long-form manual for `perception_tally` and `ensutally`.

## Input files

The releases of the ENSU survey are distributed by INEGI as archives containing one CSV
file with the data (`conjunto_de_datos_...csv`) along with dictionaries, catalogues and
metadata. `ensutally` walks the input directory recursively and considers every `.csv` file
whose path (below the input directory) contains one of the data markers and none of the
exclusion markers:

- data markers: `conjunto_de_datos`, `ensu`, `_cb_`
- exclusion markers: `diccionario`, `catalogo`, `metadatos`, `__macosx`

Files are read as UTF-8 first, and as Latin-1 (Windows-1252) if they are not valid UTF-8.
The separator is `,` or `;`, whichever is more frequent in the first two lines.

### Columns

The required columns changed over the years. The column names are upper-cased and stripped
of quotes and byte order marks before being looked up.

| Release years | Entity                            | Municipality                          | Response                 | City (optional)   |
|---------------|-----------------------------------|---------------------------------------|--------------------------|-------------------|
| up to 2015    | NOM_ENT, ENT, CVE_ENT, ID_ENTIDAD | NOM_MUN, MUN, CVE_MUN, ID_MUNICIPIO   | BP1_1, BP11, BP1_1_A     | NOM_CD, CD, CIUDAD |
| 2016, 2017    | NOM_ENT, ENT, CVE_ENT             | NOM_MUN, MUN, CVE_MUN                 | BP1_1, BP11              | NOM_CD, CD        |
| 2018 onward   | NOM_ENT, ENT                      | NOM_MUN, MUN                          | BP1_1                    | NOM_CD, CD        |

A file missing one of the required columns is skipped entirely.

Numeric entity codes (`31`, `031`) are translated with the INEGI catalogue of federal entities.
Numeric municipality codes are only translated if a catalogue is provided in the
configuration (`municipalityCodes`), otherwise they are kept without their leading zeros
(`050` and `50` are both `50`).

## Periods

The period of a file is read from its name. The following conventions are recognized, in
this order (see [`crate::period::PERIOD_RULES`]):

| Example                                  | Meaning                        |
|------------------------------------------|--------------------------------|
| `ensu_2019_2t.csv`                       | 2019, second quarter           |
| `ensu_2022_q3.csv`, `ensu_2022_t3.csv`   | 2022, third quarter            |
| `datos_t1_2020.csv`, `q1_2020.csv`       | 2020, first quarter            |
| `conjunto_de_datos_CB_ENSU_12_2021.csv`  | December 2021: fourth quarter  |
| `conjunto_de_datos_ensu_cb_0625.csv`     | June 2025: second quarter      |
| `ensu0322.csv`                           | March 2022: first quarter      |
| `2023_05_ensu.csv`                       | May 2023: second quarter       |

As a last resort, a year between 2015 and 2029 is accepted along with a quarter token
next to it (`2t`, `q2`, or a single digit).

If the name of the file has no period, the names of up to three parent directories are
tried, closest first. Files without a period are skipped: they are never assigned a
guessed period.

## Tabulation

For every file, the records of the target entity are kept, with names compared after
normalization (upper case, no accents, single spaces). The response to BP1_1 is coerced to
an integer: `1` (safe), `2` (unsafe) and `9` (no answer) are counted, every other value is
excluded and reported. Records without a municipality are excluded too.

Percentages are rounded to 2 decimals. They are not adjusted to sum exactly to 100.

Groups with fewer than 5 records are reported in the logs.

If several files map to the same period, only one is kept: the one with the most records
for the target entity, then the most recently modified one, then the one whose path sorts
last. The other files are reported as discarded.

## Output

```text
entity_name,municipality_name,total_records,total_safe,total_unsafe,total_no_answer,pct_safe,pct_unsafe,pct_no_answer,year,quarter
YUCATAN,MERIDA,100,70,20,10,70.00,20.00,10.00,2021,3
```

The rows are sorted by year, quarter and municipality. With `--group-by-city`, a
`city_name` column is added at the end.

The summary (`--summary`) is a JSON file listing every file considered, with its status:

- `processed`: tabulated and kept
- `empty`: no record for the target entity
- `discarded`: another file was kept for the same period
- `skipped`: no period found
- `failed`: unreadable, or missing required columns
- `carried`: incremental mode, the period was already in the output

In incremental mode, a period of the existing output is only carried if it was tabulated
for the same entity and with the same grouping by city. Otherwise it is tabulated again.

The summary also holds `stateSeries`, the entity as a whole for every period (see
[`crate::state_series`]): the counts of all the municipalities are summed before computing
the percentages, along with the change of the unsafe share since the previous period and
since the same quarter of the previous year.

## Configuration

`ensutally` accepts a configuration file in JSON. All the keys are optional, and the command
line takes precedence over them. Relative paths are relative to the configuration file.

```json
{
  "inputDirectory": "raw",
  "outputFile": "ensu_yucatan.csv",
  "summaryFile": "ensu_yucatan_summary.json",
  "referenceFile": "reference.csv",
  "entity": "Yucatán",
  "groupByCity": false,
  "incremental": true,
  "smallGroupThreshold": 5,
  "duplicatePolicy": "largestMatchedCount",
  "dataMarkers": ["conjunto_de_datos", "ensu", "_cb_"],
  "excludeMarkers": ["diccionario", "catalogo", "metadatos", "__macosx"],
  "municipalityCodes": {"050": "Mérida", "041": "Kanasín"}
}
```

`duplicatePolicy` is either `largestMatchedCount` (the default) or `mostRecent`.

 */
