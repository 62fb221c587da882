//! Canonical forms of the free-text fields (entity, municipality, city).

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Upper-cases, strips the accents and collapses the whitespace of a name.
///
/// The output only contains ASCII characters. The transform is idempotent.
///
/// ```
/// use perception_tally::normalize::normalize_text;
///
/// assert_eq!(normalize_text("  Mérida  "), "MERIDA");
/// assert_eq!(normalize_text("Kanasín"), "KANASIN");
/// ```
pub fn normalize_text(input: &str) -> String {
    let upper = input.to_uppercase().replace('Ñ', "N");
    let stripped: String = upper
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| c.is_ascii())
        .collect();
    stripped.split_ascii_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Missing values normalize to the empty string.
pub fn normalize_optional(input: Option<&str>) -> String {
    input.map(normalize_text).unwrap_or_default()
}

// The INEGI catalogue of federal entities (AGEE).
const STATE_CODES: [&str; 32] = [
    "AGUASCALIENTES",
    "BAJA CALIFORNIA",
    "BAJA CALIFORNIA SUR",
    "CAMPECHE",
    "COAHUILA DE ZARAGOZA",
    "COLIMA",
    "CHIAPAS",
    "CHIHUAHUA",
    "CIUDAD DE MEXICO",
    "DURANGO",
    "GUANAJUATO",
    "GUERRERO",
    "HIDALGO",
    "JALISCO",
    "MEXICO",
    "MICHOACAN DE OCAMPO",
    "MORELOS",
    "NAYARIT",
    "NUEVO LEON",
    "OAXACA",
    "PUEBLA",
    "QUERETARO",
    "QUINTANA ROO",
    "SAN LUIS POTOSI",
    "SINALOA",
    "SONORA",
    "TABASCO",
    "TAMAULIPAS",
    "TLAXCALA",
    "VERACRUZ DE IGNACIO DE LA LLAVE",
    "YUCATAN",
    "ZACATECAS",
];

/// The name of the entity for a numeric INEGI code (`"31"`, `"031"`, `"31.0"`).
pub fn state_name_for_code(code: &str) -> Option<&'static str> {
    let s = code.trim();
    let s = s.strip_suffix(".0").unwrap_or(s);
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let idx: usize = s.parse().ok()?;
    if idx == 0 {
        return None;
    }
    STATE_CODES.get(idx - 1).copied()
}

/// Normalizes an entity value, translating the numeric codes of older vintages first.
pub fn normalize_entity(input: Option<&str>) -> String {
    match input {
        Some(s) => match state_name_for_code(s) {
            Some(name) => name.to_string(),
            None => normalize_text(s),
        },
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_case() {
        assert_eq!(normalize_text("Kanasín"), "KANASIN");
        assert_eq!(normalize_text("  Mérida  "), "MERIDA");
        assert_eq!(normalize_text("Yucatán\r"), "YUCATAN");
        assert_eq!(normalize_text("peñón"), "PENON");
        assert_eq!(normalize_text("Ciudad  de\tMéxico"), "CIUDAD DE MEXICO");
    }

    #[test]
    fn idempotent() {
        for s in [
            "Mérida",
            "  Tizimín ",
            "VALLADOLID",
            "Ñuñoa  x",
            "Ümán € test",
            "",
            "   ",
        ] {
            let once = normalize_text(s);
            assert_eq!(normalize_text(&once), once);
            assert!(once.is_ascii());
        }
    }

    #[test]
    fn missing_is_empty() {
        assert_eq!(normalize_optional(None), "");
        assert_eq!(normalize_optional(Some(" progreso")), "PROGRESO");
    }

    #[test]
    fn entity_codes() {
        assert_eq!(state_name_for_code("31"), Some("YUCATAN"));
        assert_eq!(state_name_for_code("031"), Some("YUCATAN"));
        assert_eq!(state_name_for_code("4"), Some("CAMPECHE"));
        assert_eq!(state_name_for_code("31.0"), Some("YUCATAN"));
        assert_eq!(state_name_for_code("33"), None);
        assert_eq!(state_name_for_code("0"), None);
        assert_eq!(state_name_for_code("Yucatán"), None);
        assert_eq!(normalize_entity(Some("31")), "YUCATAN");
        assert_eq!(normalize_entity(Some("yucatán")), "YUCATAN");
        assert_eq!(normalize_entity(None), "");
    }
}
