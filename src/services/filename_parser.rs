use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{FileEntry, TagCategory};

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^)]*)\)|\[([^\]]*)\]").expect("tag regex"));

static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:version|revision|ver|rev|v)\s*\.?\s*(\d+)(?:\.(\d+))?(?:\.(\d+))?")
        .expect("version regex")
});

static BETA_N_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[(\[]\s*beta\s+(\d+)\s*[)\]]").expect("beta-n regex"));
static BETA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[(\[]\s*beta\s*[)\]]").expect("beta regex"));
static ALPHA_N_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[(\[]\s*alpha\s+(\d+)\s*[)\]]").expect("alpha-n regex"));
static ALPHA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[(\[]\s*alpha\s*[)\]]").expect("alpha regex"));
static PROTO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[(\[]\s*proto\s*[)\]]").expect("proto regex"));
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("date regex"));

/// Region keywords used for tag categorization, lower-cased. A tag whose
/// comma/plus-separated parts are at least half region keywords counts as a
/// region tag.
const REGION_KEYWORDS: &[&str] = &[
    "usa",
    "europe",
    "japan",
    "world",
    "asia",
    "australia",
    "austria",
    "belgium",
    "brazil",
    "canada",
    "china",
    "croatia",
    "czech",
    "denmark",
    "finland",
    "france",
    "germany",
    "greece",
    "hong kong",
    "hungary",
    "india",
    "ireland",
    "israel",
    "italy",
    "korea",
    "latin america",
    "mexico",
    "netherlands",
    "new zealand",
    "norway",
    "poland",
    "portugal",
    "russia",
    "scandinavia",
    "singapore",
    "slovakia",
    "south africa",
    "spain",
    "sweden",
    "switzerland",
    "taiwan",
    "thailand",
    "turkey",
    "uk",
    "united kingdom",
    "unknown",
];

/// Two-to-four letter language codes as they appear in archive filenames,
/// lower-cased.
const LANGUAGE_CODES: &[&str] = &[
    "en", "ja", "fr", "de", "es", "it", "nl", "pt", "sv", "no", "da", "fi", "zh", "ko", "pl", "ru",
    "cs", "hu", "el", "tr", "ar", "he", "ca", "eu", "gl", "hr", "sl", "sk", "ro", "bg", "sr", "th",
    "vi", "id", "ms", "hi",
];

/// Parses one archive filename into its base name, bracketed tags and a
/// signed revision rank. The original name is never modified; callers keep it
/// for display and disk path construction.
pub fn parse(filename: &str) -> FileEntry {
    let base_name = base_name_of(filename);
    let mut tags: BTreeSet<String> = BTreeSet::new();
    let mut categorized_tags: BTreeMap<TagCategory, Vec<String>> = BTreeMap::new();

    for capture in TAG_RE.captures_iter(filename) {
        let raw = capture
            .get(1)
            .or_else(|| capture.get(2))
            .map(|group| group.as_str().trim())
            .unwrap_or("");
        if raw.is_empty() {
            continue;
        }
        if !tags.insert(raw.to_string()) {
            continue;
        }
        let category = categorize_tag(raw);
        categorized_tags
            .entry(category)
            .or_default()
            .push(raw.to_string());
    }

    FileEntry {
        name_raw: filename.to_string(),
        base_name,
        tags,
        categorized_tags,
        revision: revision_rank(filename),
        href: String::new(),
        size: None,
    }
}

fn base_name_of(filename: &str) -> String {
    let cut = filename.find(['(', '[']).unwrap_or(filename.len());
    let base = filename[..cut].trim();
    if base.is_empty() {
        filename.trim().to_string()
    } else {
        base.to_string()
    }
}

/// Revision ranking, evaluated in strict priority order; first match wins.
/// Versioned releases rank above everything, an unmarked name ranks 0, and
/// beta/alpha/proto markers rank below 0 in that order.
pub fn revision_rank(filename: &str) -> f64 {
    if let Some(capture) = VERSION_RE.captures(filename) {
        let major: f64 = capture[1].parse().unwrap_or(0.0);
        let minor: f64 = capture
            .get(2)
            .and_then(|group| group.as_str().parse().ok())
            .unwrap_or(0.0);
        let patch: f64 = capture
            .get(3)
            .and_then(|group| group.as_str().parse().ok())
            .unwrap_or(0.0);
        return major + minor / 1_000.0 + patch / 1_000_000.0;
    }
    if let Some(capture) = BETA_N_RE.captures(filename) {
        let n: f64 = capture[1].parse().unwrap_or(0.0);
        return -1.0 + n / 100.0;
    }
    if BETA_RE.is_match(filename) {
        return -2.0;
    }
    if let Some(capture) = ALPHA_N_RE.captures(filename) {
        let n: f64 = capture[1].parse().unwrap_or(0.0);
        return -3.0 + n / 100.0;
    }
    if ALPHA_RE.is_match(filename) {
        return -4.0;
    }
    if PROTO_RE.is_match(filename) {
        if let Some(stamp) = embedded_date_stamp(filename) {
            return -5.0 + stamp / 100_000_000.0;
        }
        return -6.0;
    }
    0.0
}

/// Looks for a plausible `YYYY-MM-DD` anywhere in the name and flattens it to
/// a sortable `YYYYMMDD` number.
fn embedded_date_stamp(filename: &str) -> Option<f64> {
    for capture in DATE_RE.captures_iter(filename) {
        let year: i32 = capture[1].parse().ok()?;
        let month: u32 = capture[2].parse().ok()?;
        let day: u32 = capture[3].parse().ok()?;
        if NaiveDate::from_ymd_opt(year, month, day).is_some() {
            return Some((year as f64) * 10_000.0 + (month as f64) * 100.0 + day as f64);
        }
    }
    None
}

/// True when a tag carries only revision information: a version marker, a
/// beta/alpha/proto marker, or a date stamp. Such tags do not distinguish one
/// release from another, they distinguish revisions of the same release.
pub fn is_revision_marker(tag: &str) -> bool {
    let wrapped = format!("({})", tag);
    VERSION_RE.is_match(&wrapped)
        || BETA_N_RE.is_match(&wrapped)
        || BETA_RE.is_match(&wrapped)
        || ALPHA_N_RE.is_match(&wrapped)
        || ALPHA_RE.is_match(&wrapped)
        || PROTO_RE.is_match(&wrapped)
        || embedded_date_stamp(tag).is_some()
}

/// Categorizes one tag by majority vote over its comma/plus-separated parts.
/// The threshold is evaluated per tag, never across the whole filename.
pub fn categorize_tag(tag: &str) -> TagCategory {
    let parts: Vec<String> = tag
        .split([',', '+'])
        .map(|part| part.trim().to_ascii_lowercase())
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        return TagCategory::Other;
    }

    let region_hits = parts
        .iter()
        .filter(|part| REGION_KEYWORDS.contains(&part.as_str()))
        .count();
    if region_hits * 2 >= parts.len() {
        return TagCategory::Region;
    }

    let language_hits = parts
        .iter()
        .filter(|part| LANGUAGE_CODES.contains(&part.as_str()))
        .count();
    if language_hits * 2 >= parts.len() {
        return TagCategory::Language;
    }

    TagCategory::Other
}
