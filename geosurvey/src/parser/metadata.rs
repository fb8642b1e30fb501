//! Extraction de métadonnées depuis le texte libre des descriptions
//!
//! Listes ordonnées de motifs: le premier qui correspond l'emporte.

use std::sync::OnceLock;

use regex::Regex;

const PARCEL_PATTERNS: &[&str] = &[
    r"(?i)kitta\s*number\s*:?\s*([^\s]+)",
    r"(?i)kitta\s*no\.?\s*:?\s*([^\s]+)",
    r"(?i)kitta\s*:?\s*([^\s]+)",
    r"(?i)(kml_\d+_\d+_\d+)",
    r"(?i)(kml-\d+-\d+-\d+)",
];

const OWNER_PATTERNS: &[&str] = &[
    r"(?i)owner\s*name\s*:?\s*([^\r\n]+)",
    r"(?i)owner\s*:?\s*([^\r\n]+)",
    r"(?i)\bname\s*:?\s*([^\r\n]+)",
];

const PHONE_PATTERN: &str = r"(?i)phone[:\s]*([+\d\s\-()]+)";
const WEBSITE_PATTERN: &str = r"(?i)website[:\s]*(https?://[^\s]+)";

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

fn parcel_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| compile(PARCEL_PATTERNS))
}

fn owner_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| compile(OWNER_PATTERNS))
}

fn contact_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| compile(&[PHONE_PATTERN, WEBSITE_PATTERN]))
}

fn markup() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"<[^>]+>").ok()).as_ref()
}

fn line_breaks() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"(?i)<br\s*/?>|</(p|div|tr|li|h\d)>").ok())
        .as_ref()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn strip_tags(text: &str) -> String {
    match markup() {
        Some(re) => re.replace_all(text, " ").into_owned(),
        None => text.to_string(),
    }
}

/// Supprime le balisage et normalise les espaces (une seule ligne)
pub fn clean_markup(text: &str) -> String {
    let stripped = strip_tags(text);
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Texte sans balisage mais avec les retours à la ligne conservés
///
/// Les motifs de type `owner: ...` s'arrêtent ainsi en fin de ligne.
pub fn extraction_text(text: &str) -> String {
    let with_breaks = match line_breaks() {
        Some(re) => re.replace_all(text, "\n").into_owned(),
        None => text.to_string(),
    };
    decode_entities(&strip_tags(&with_breaks))
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    let caps = re.captures(text)?;
    let value = caps.get(1).or_else(|| caps.get(0))?.as_str();
    let value = value.trim().trim_end_matches([',', ';', '.']);
    (!value.is_empty()).then(|| value.to_string())
}

/// Numéro de parcelle (kitta) trouvé dans le texte
pub fn extract_parcel_id(text: &str) -> Option<String> {
    parcel_patterns().iter().find_map(|re| first_capture(re, text))
}

/// Nom du propriétaire trouvé dans le texte
///
/// Un candidat égal au numéro de parcelle ou au nom du placemark est ignoré
/// et le motif suivant est essayé.
pub fn extract_owner(text: &str, parcel_id: Option<&str>, name: Option<&str>) -> Option<String> {
    owner_patterns().iter().find_map(|re| {
        let candidate = first_capture(re, text)?;
        let rejected = parcel_id.is_some_and(|p| p.eq_ignore_ascii_case(&candidate))
            || name.is_some_and(|n| n.eq_ignore_ascii_case(&candidate));
        (!rejected).then_some(candidate)
    })
}

/// Numéro de téléphone trouvé dans le texte
pub fn extract_phone(text: &str) -> Option<String> {
    let re = contact_patterns().first()?;
    first_capture(re, text).filter(|p| p.chars().any(|c| c.is_ascii_digit()))
}

/// Site web trouvé dans le texte
pub fn extract_website(text: &str) -> Option<String> {
    let re = contact_patterns().get(1)?;
    first_capture(re, text)
}
