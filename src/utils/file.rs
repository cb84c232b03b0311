use std::fs;
use std::path::{Component, Path};

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Parses the human-readable size strings archive servers print in their
/// listings ("4.0 KiB", "12.3 MB", "734 B"). Decimal units are treated as
/// their binary counterparts, which matches how the listings are generated.
pub fn parse_size_str(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return None;
    }
    let split_at = trimmed
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.' || ch == ','))
        .unwrap_or(trimmed.len());
    let (number_part, unit_part) = trimmed.split_at(split_at);
    let number: f64 = number_part.replace(',', "").parse().ok()?;
    let multiplier: f64 = match unit_part.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "k" | "kb" | "kib" => 1024.0,
        "m" | "mb" | "mib" => 1024.0 * 1024.0,
        "g" | "gb" | "gib" => 1024.0 * 1024.0 * 1024.0,
        "t" | "tb" | "tib" => 1024.0_f64.powi(4),
        _ => return None,
    };
    Some((number * multiplier) as u64)
}

pub fn is_safe_relative_path(path: &Path) -> bool {
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => return false,
            _ => {}
        }
    }
    true
}

/// True when `dir` holds anything besides the archive itself and its `.part`
/// leftovers, i.e. the archive has already been extracted there.
pub fn dir_has_extracted_content(dir: &Path, archive_name: &str) -> bool {
    let part_name = format!("{}.part", archive_name);
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name != archive_name && name != part_name.as_str() {
            return true;
        }
    }
    false
}

/// Joins a relative href onto a base listing URL. Hrefs arrive already
/// percent-encoded from the server, so no re-encoding happens here.
pub fn join_url(base: &str, href: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        href.trim_start_matches('/')
    )
}

/// Decodes a percent-encoded href into a display/disk name.
pub fn decode_href(href: &str) -> String {
    urlencoding::decode(href)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| href.to_string())
}
