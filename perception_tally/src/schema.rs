//! Column layouts of the successive survey vintages.
//!
//! The column names changed over the years (numeric codes in `ENT`/`MUN` in the early
//! releases, `NOM_ENT`/`NOM_MUN` names later). Each era lists, for every field, the accepted
//! column names by order of preference.

use log::debug;

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum SchemaEra {
    /// Releases up to 2015.
    Legacy,
    /// 2016 and 2017.
    Transitional,
    /// 2018 onward.
    Modern,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SchemaMapping {
    pub era: SchemaEra,
    pub entity: &'static [&'static str],
    pub municipality: &'static [&'static str],
    pub city: &'static [&'static str],
    pub response: &'static [&'static str],
}

pub const SCHEMA_TABLE: [SchemaMapping; 3] = [
    SchemaMapping {
        era: SchemaEra::Legacy,
        entity: &["NOM_ENT", "ENT", "CVE_ENT", "ID_ENTIDAD"],
        municipality: &["NOM_MUN", "MUN", "CVE_MUN", "ID_MUNICIPIO"],
        city: &["NOM_CD", "CD", "CIUDAD"],
        response: &["BP1_1", "BP11", "BP1_1_A"],
    },
    SchemaMapping {
        era: SchemaEra::Transitional,
        entity: &["NOM_ENT", "ENT", "CVE_ENT"],
        municipality: &["NOM_MUN", "MUN", "CVE_MUN"],
        city: &["NOM_CD", "CD"],
        response: &["BP1_1", "BP11"],
    },
    SchemaMapping {
        era: SchemaEra::Modern,
        entity: &["NOM_ENT", "ENT"],
        municipality: &["NOM_MUN", "MUN"],
        city: &["NOM_CD", "CD"],
        response: &["BP1_1"],
    },
];

/// The canonical names, used when reporting missing columns.
pub const ENTITY_COLUMN: &str = "NOM_ENT";
pub const MUNICIPALITY_COLUMN: &str = "NOM_MUN";
pub const RESPONSE_COLUMN: &str = "BP1_1";

/// The positions of the fields of interest in a header.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ResolvedColumns {
    pub era: SchemaEra,
    pub entity: usize,
    pub municipality: usize,
    pub city: Option<usize>,
    pub response: usize,
}

impl SchemaEra {
    pub fn for_year(year: u16) -> SchemaEra {
        match year {
            0..=2015 => SchemaEra::Legacy,
            2016..=2017 => SchemaEra::Transitional,
            _ => SchemaEra::Modern,
        }
    }
}

impl SchemaMapping {
    pub fn for_era(era: SchemaEra) -> &'static SchemaMapping {
        match era {
            SchemaEra::Legacy => &SCHEMA_TABLE[0],
            SchemaEra::Transitional => &SCHEMA_TABLE[1],
            SchemaEra::Modern => &SCHEMA_TABLE[2],
        }
    }

    pub fn for_year(year: u16) -> &'static SchemaMapping {
        SchemaMapping::for_era(SchemaEra::for_year(year))
    }

    /// Finds the required columns in a header.
    ///
    /// The header is expected to be cleaned with [`clean_header_name`]. On failure, returns the
    /// canonical names of all the missing required columns. The city column is optional.
    pub fn resolve(&self, header: &[String]) -> Result<ResolvedColumns, Vec<&'static str>> {
        let find = |names: &[&str]| -> Option<usize> {
            names
                .iter()
                .find_map(|name| header.iter().position(|h| h == name))
        };
        let entity = find(self.entity);
        let municipality = find(self.municipality);
        let response = find(self.response);
        let city = find(self.city);
        debug!(
            "resolve: era {:?}: entity {:?} municipality {:?} city {:?} response {:?}",
            self.era, entity, municipality, city, response
        );
        match (entity, municipality, response) {
            (Some(entity), Some(municipality), Some(response)) => Ok(ResolvedColumns {
                era: self.era,
                entity,
                municipality,
                city,
                response,
            }),
            _ => {
                let mut missing = Vec::new();
                if entity.is_none() {
                    missing.push(ENTITY_COLUMN);
                }
                if municipality.is_none() {
                    missing.push(MUNICIPALITY_COLUMN);
                }
                if response.is_none() {
                    missing.push(RESPONSE_COLUMN);
                }
                Err(missing)
            }
        }
    }
}

/// Removes the byte order mark (also in its mis-decoded form), quotes and whitespace of a
/// column name, and upper-cases it.
pub fn clean_header_name(name: &str) -> String {
    name.trim_start_matches('\u{feff}')
        .trim_start_matches("ï»¿")
        .replace('"', "")
        .trim()
        .to_uppercase()
}
