// Subtitle languages offered to users
//
// Codes are the 3-letter ISO 639-2 bibliographic codes Stremio sends, plus
// `pob` for Brazilian Portuguese as used by OpenSubtitles.

/// (code, English name, ISO 639-1 code)
const LANGUAGES: &[(&str, &str, &str)] = &[
    ("eng", "English", "en"),
    ("pol", "Polish", "pl"),
    ("spa", "Spanish", "es"),
    ("fre", "French", "fr"),
    ("ger", "German", "de"),
    ("ita", "Italian", "it"),
    ("por", "Portuguese", "pt"),
    ("pob", "Portuguese (Brazil)", "pt-br"),
    ("rus", "Russian", "ru"),
    ("jpn", "Japanese", "ja"),
    ("chi", "Chinese", "zh"),
    ("kor", "Korean", "ko"),
    ("ara", "Arabic", "ar"),
    ("hin", "Hindi", "hi"),
    ("tur", "Turkish", "tr"),
    ("dut", "Dutch", "nl"),
    ("swe", "Swedish", "sv"),
    ("nor", "Norwegian", "no"),
    ("dan", "Danish", "da"),
    ("fin", "Finnish", "fi"),
    ("cze", "Czech", "cs"),
    ("slo", "Slovak", "sk"),
    ("hun", "Hungarian", "hu"),
    ("rum", "Romanian", "ro"),
    ("bul", "Bulgarian", "bg"),
    ("gre", "Greek", "el"),
    ("heb", "Hebrew", "he"),
    ("tha", "Thai", "th"),
    ("vie", "Vietnamese", "vi"),
    ("ind", "Indonesian", "id"),
    ("may", "Malay", "ms"),
    ("ukr", "Ukrainian", "uk"),
    ("srp", "Serbian", "sr"),
    ("hrv", "Croatian", "hr"),
    ("slv", "Slovenian", "sl"),
    ("est", "Estonian", "et"),
    ("lav", "Latvian", "lv"),
    ("lit", "Lithuanian", "lt"),
    ("per", "Persian", "fa"),
    ("urd", "Urdu", "ur"),
    ("ben", "Bengali", "bn"),
];

/// ISO 639-2 terminology codes mapped to the bibliographic form used here
const TERMINOLOGY_ALIASES: &[(&str, &str)] = &[
    ("fra", "fre"),
    ("deu", "ger"),
    ("zho", "chi"),
    ("nld", "dut"),
    ("ces", "cze"),
    ("slk", "slo"),
    ("ron", "rum"),
    ("ell", "gre"),
    ("fas", "per"),
    ("msa", "may"),
];

#[derive(Debug, Clone, serde::Serialize)]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
}

pub fn all() -> Vec<Language> {
    LANGUAGES
        .iter()
        .map(|(code, name, _)| Language { code, name })
        .collect()
}

/// Canonical 3-letter code for any accepted spelling
pub fn normalize(code: &str) -> String {
    let lower = code.trim().to_lowercase();
    if let Some((_, canonical)) = TERMINOLOGY_ALIASES.iter().find(|(t, _)| *t == lower) {
        return canonical.to_string();
    }
    if lower.len() == 2 || lower.contains('-') {
        if let Some(code) = from_alpha2(&lower) {
            return code.to_string();
        }
    }
    lower
}

pub fn is_supported(code: &str) -> bool {
    let code = normalize(code);
    LANGUAGES.iter().any(|(c, _, _)| *c == code)
}

/// Display name, falling back to the code itself
pub fn language_name(code: &str) -> String {
    let normalized = normalize(code);
    LANGUAGES
        .iter()
        .find(|(c, _, _)| *c == normalized)
        .map(|(_, name, _)| name.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// ISO 639-1 code (`pob` -> `pt-br`, `por` -> `pt-pt` for OpenSubtitles)
pub fn to_alpha2(code: &str) -> Option<&'static str> {
    match normalize(code).as_str() {
        "pob" => Some("pt-br"),
        "por" => Some("pt-pt"),
        other => LANGUAGES
            .iter()
            .find(|(c, _, _)| *c == other)
            .map(|(_, _, a2)| *a2),
    }
}

pub fn from_alpha2(code: &str) -> Option<&'static str> {
    match code.trim().to_lowercase().replace('_', "-").as_str() {
        "pt-br" | "br-pt" | "pb" => Some("pob"),
        "pt-pt" | "pt" => Some("por"),
        other => LANGUAGES
            .iter()
            .find(|(_, _, a2)| *a2 == other)
            .map(|(c, _, _)| *c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_name() {
        assert_eq!(language_name("eng"), "English");
        assert_eq!(language_name("pob"), "Portuguese (Brazil)");
        assert_eq!(language_name("fra"), "French");
        assert_eq!(language_name("xyz"), "xyz");
    }

    #[test]
    fn test_alpha2_mapping() {
        assert_eq!(to_alpha2("eng"), Some("en"));
        assert_eq!(to_alpha2("pob"), Some("pt-br"));
        assert_eq!(to_alpha2("por"), Some("pt-pt"));
        assert_eq!(to_alpha2("deu"), Some("de"));
        assert_eq!(to_alpha2("xyz"), None);

        assert_eq!(from_alpha2("pt-BR"), Some("pob"));
        assert_eq!(from_alpha2("BR_PT"), Some("pob"));
        assert_eq!(from_alpha2("pt"), Some("por"));
        assert_eq!(from_alpha2("EN"), Some("eng"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("ENG"), "eng");
        assert_eq!(normalize("nld"), "dut");
        assert_eq!(normalize("en"), "eng");
        assert!(is_supported("ces"));
        assert!(!is_supported("klingon"));
    }
}
