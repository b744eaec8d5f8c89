use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

fn non_alnum() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex"))
}

/// Turn a raw header into a valid table identifier: accents stripped,
/// lower-cased, runs of other characters collapsed to `_`, and a leading
/// digit prefixed with `_`.
pub fn normalize_column_name(col: &str) -> String {
    let ascii: String = col.nfkd().filter(char::is_ascii).collect();
    let lowered = ascii.to_lowercase();
    let mut name = non_alnum().replace_all(lowered.trim(), "_").into_owned();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_punctuation() {
        assert_eq!(normalize_column_name("Date de début"), "date_de_debut");
        assert_eq!(normalize_column_name("Type d'implantation"), "type_d_implantation");
        assert_eq!(normalize_column_name("Unité de mesure"), "unite_de_mesure");
        assert_eq!(normalize_column_name("  Valeur brute "), "valeur_brute");
    }

    #[test]
    fn prefixes_leading_digit() {
        assert_eq!(normalize_column_name("24h moyenne"), "_24h_moyenne");
    }

    #[test]
    fn keeps_trailing_separator_and_drops_non_latin() {
        assert_eq!(normalize_column_name("PM2.5 (µg-m3)"), "pm2_5_g_m3_");
        assert_eq!(normalize_column_name("NO2"), "no2");
        assert_eq!(normalize_column_name(""), "");
    }
}
