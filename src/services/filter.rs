use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{CatalogEntry, DedupeMode, FilterSpec, RevisionMode};
use crate::services::filename_parser;

/// Multi-part releases carry one of these tags per part; deduplication must
/// keep every part of the winning release.
static MULTI_PART_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(Disc|Cart|Side) ").expect("multi-part regex"));

/// Applies the four filter stages in order: tag filter, substring filter,
/// revision selection, deduplication. Pure; input order is preserved in the
/// output and a pass-through spec returns the input unchanged.
pub fn apply(catalog: &[CatalogEntry], spec: &FilterSpec) -> Vec<CatalogEntry> {
    let mut entries: Vec<CatalogEntry> = catalog.to_vec();
    entries = filter_by_tags(entries, spec);
    entries = filter_by_strings(entries, spec);
    entries = filter_by_revision(entries, spec.revision_mode);
    entries = dedupe(entries, spec);
    tracing::debug!(
        "filter applied input={} output={}",
        catalog.len(),
        entries.len()
    );
    entries
}

fn entry_has_tag(entry: &CatalogEntry, tag: &str) -> bool {
    entry
        .as_file()
        .map(|file| file.tags.contains(tag))
        .unwrap_or(false)
}

fn filter_by_tags(entries: Vec<CatalogEntry>, spec: &FilterSpec) -> Vec<CatalogEntry> {
    if spec.include_tags.is_empty() && spec.exclude_tags.is_empty() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|entry| {
            let included = spec.include_tags.is_empty()
                || spec.include_tags.iter().any(|tag| entry_has_tag(entry, tag));
            let excluded = spec.exclude_tags.iter().any(|tag| entry_has_tag(entry, tag));
            included && !excluded
        })
        .collect()
}

fn filter_by_strings(entries: Vec<CatalogEntry>, spec: &FilterSpec) -> Vec<CatalogEntry> {
    if spec.include_strings.is_empty() && spec.exclude_strings.is_empty() {
        return entries;
    }
    let includes: Vec<String> = spec
        .include_strings
        .iter()
        .map(|needle| needle.to_lowercase())
        .collect();
    let excludes: Vec<String> = spec
        .exclude_strings
        .iter()
        .map(|needle| needle.to_lowercase())
        .collect();
    entries
        .into_iter()
        .filter(|entry| {
            let name = entry.name_raw().to_lowercase();
            let included =
                includes.is_empty() || includes.iter().any(|needle| name.contains(needle));
            let excluded = excludes.iter().any(|needle| name.contains(needle));
            included && !excluded
        })
        .collect()
}

/// Grouping key for revision selection: the base name plus every tag that is
/// not itself a revision marker. Two files that differ only in their revision
/// markers compete; files of distinct releases (different regions, languages,
/// disc numbers) never eliminate each other.
fn release_key(entry: &CatalogEntry) -> String {
    let Some(file) = entry.as_file() else {
        return entry.name_raw().to_string();
    };
    let mut key = file.base_name.clone();
    for tag in &file.tags {
        if !filename_parser::is_revision_marker(tag) {
            key.push('|');
            key.push_str(tag);
        }
    }
    key
}

fn filter_by_revision(entries: Vec<CatalogEntry>, mode: RevisionMode) -> Vec<CatalogEntry> {
    if mode == RevisionMode::All {
        return entries;
    }
    let mut group_max: HashMap<String, f64> = HashMap::new();
    for entry in &entries {
        let key = release_key(entry);
        let max = group_max.entry(key).or_insert(f64::NEG_INFINITY);
        if entry.revision() > *max {
            *max = entry.revision();
        }
    }
    entries
        .into_iter()
        .filter(|entry| {
            group_max
                .get(&release_key(entry))
                .map(|max| entry.revision() >= *max)
                .unwrap_or(true)
        })
        .collect()
}

fn priority_score(entry: &CatalogEntry, priority_list: &[String]) -> usize {
    let Some(file) = entry.as_file() else {
        return 0;
    };
    priority_list
        .iter()
        .enumerate()
        .filter(|(_, tag)| file.tags.contains(*tag))
        .map(|(index, _)| priority_list.len() - index)
        .sum()
}

fn has_multi_part_tag(entry: &CatalogEntry) -> bool {
    entry
        .as_file()
        .map(|file| file.tags.iter().any(|tag| MULTI_PART_RE.is_match(tag)))
        .unwrap_or(false)
}

/// Priority deduplication: per base-name group, score every entry against the
/// priority list and keep all entries tying the maximum score. When a tied
/// winner carries a Disc/Cart/Side tag, only the tagged winners survive so a
/// multi-part release keeps all of its parts while single-part groups still
/// collapse to one winner. Groups where nothing scored keep their first entry.
fn dedupe(entries: Vec<CatalogEntry>, spec: &FilterSpec) -> Vec<CatalogEntry> {
    if spec.dedupe_mode == DedupeMode::All {
        return entries;
    }

    let mut group_order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        let key = entry.base_name().to_string();
        let members = groups.entry(key.clone()).or_insert_with(|| {
            group_order.push(key);
            Vec::new()
        });
        members.push(index);
    }

    let mut keep = vec![false; entries.len()];
    for key in &group_order {
        let members = &groups[key];
        let scores: Vec<usize> = members
            .iter()
            .map(|&index| priority_score(&entries[index], &spec.priority_list))
            .collect();
        let max_score = scores.iter().copied().max().unwrap_or(0);

        if max_score == 0 {
            keep[members[0]] = true;
            continue;
        }

        let winners: Vec<usize> = members
            .iter()
            .zip(&scores)
            .filter(|(_, &score)| score == max_score)
            .map(|(&index, _)| index)
            .collect();
        let any_multi_part = winners
            .iter()
            .any(|&index| has_multi_part_tag(&entries[index]));
        for index in winners {
            if !any_multi_part || has_multi_part_tag(&entries[index]) {
                keep[index] = true;
            }
        }
    }

    entries
        .into_iter()
        .enumerate()
        .filter(|(index, _)| keep[*index])
        .map(|(_, entry)| entry)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawEntry;
    use crate::services::catalog;

    fn catalog_of(names: &[&str]) -> Vec<CatalogEntry> {
        catalog::build(
            names
                .iter()
                .map(|name| RawEntry {
                    name: name.to_string(),
                    href: name.replace(' ', "%20"),
                    is_dir: false,
                    size: Some("1.0 MiB".to_string()),
                })
                .collect(),
        )
        .entries
    }

    fn names(entries: &[CatalogEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|entry| entry.name_raw().to_string())
            .collect()
    }

    #[test]
    fn pass_through_spec_returns_input_unchanged() {
        let entries = catalog_of(&[
            "B (USA) (Rev 2).zip",
            "A (Europe).zip",
            "C (Japan) (Beta).zip",
        ]);
        let out = apply(&entries, &FilterSpec::default());
        assert_eq!(names(&out), names(&entries));
    }

    #[test]
    fn include_and_exclude_tags() {
        let entries = catalog_of(&["A (USA).zip", "A (Europe).zip", "A (Japan).zip"]);
        let spec = FilterSpec {
            include_tags: vec!["USA".to_string(), "Europe".to_string()],
            exclude_tags: vec!["Europe".to_string()],
            ..FilterSpec::default()
        };
        assert_eq!(names(&apply(&entries, &spec)), vec!["A (USA).zip"]);
    }

    #[test]
    fn substring_filters_are_case_insensitive() {
        let entries = catalog_of(&["Alpha Squad (USA).zip", "Beta Blast (USA).zip"]);
        let spec = FilterSpec {
            include_strings: vec!["alpha".to_string()],
            ..FilterSpec::default()
        };
        assert_eq!(names(&apply(&entries, &spec)), vec!["Alpha Squad (USA).zip"]);

        let spec = FilterSpec {
            exclude_strings: vec!["BLAST".to_string()],
            ..FilterSpec::default()
        };
        assert_eq!(names(&apply(&entries, &spec)), vec!["Alpha Squad (USA).zip"]);
    }

    #[test]
    fn highest_revision_keeps_per_release_maximum() {
        let entries = catalog_of(&[
            "A (USA) (Rev 1).zip",
            "A (USA) (Rev 2).zip",
            "A (Europe).zip",
        ]);
        let spec = FilterSpec {
            revision_mode: RevisionMode::Highest,
            ..FilterSpec::default()
        };
        assert_eq!(
            names(&apply(&entries, &spec)),
            vec!["A (USA) (Rev 2).zip", "A (Europe).zip"]
        );
    }

    #[test]
    fn highest_revision_prefers_plain_over_beta_and_version_over_plain() {
        let entries = catalog_of(&["A (USA) (Beta).zip", "A (USA).zip"]);
        let spec = FilterSpec {
            revision_mode: RevisionMode::Highest,
            ..FilterSpec::default()
        };
        assert_eq!(names(&apply(&entries, &spec)), vec!["A (USA).zip"]);

        let entries = catalog_of(&["A (USA).zip", "A (USA) (v1.1).zip"]);
        assert_eq!(names(&apply(&entries, &spec)), vec!["A (USA) (v1.1).zip"]);
    }

    #[test]
    fn revision_ties_keep_all() {
        let entries = catalog_of(&["A (USA).zip", "A (USA) [b].zip"]);
        let spec = FilterSpec {
            revision_mode: RevisionMode::Highest,
            ..FilterSpec::default()
        };
        // Different non-revision tags mean different releases; both survive.
        assert_eq!(names(&apply(&entries, &spec)).len(), 2);
    }

    #[test]
    fn priority_dedupe_keeps_best_scoring_entry() {
        let entries = catalog_of(&["A (USA).zip", "A (Europe).zip", "A (Japan).zip"]);
        let spec = FilterSpec {
            dedupe_mode: DedupeMode::Priority,
            priority_list: vec!["USA".to_string(), "Europe".to_string()],
            ..FilterSpec::default()
        };
        assert_eq!(names(&apply(&entries, &spec)), vec!["A (USA).zip"]);
    }

    #[test]
    fn priority_dedupe_keeps_every_disc_of_tied_winners() {
        let entries = catalog_of(&[
            "A (USA) (Disc 1).zip",
            "A (USA) (Disc 2).zip",
            "A (Europe).zip",
        ]);
        let spec = FilterSpec {
            dedupe_mode: DedupeMode::Priority,
            priority_list: vec!["USA".to_string(), "Europe".to_string()],
            ..FilterSpec::default()
        };
        assert_eq!(
            names(&apply(&entries, &spec)),
            vec!["A (USA) (Disc 1).zip", "A (USA) (Disc 2).zip"]
        );
    }

    #[test]
    fn disc_tagged_winner_beats_untagged_tie() {
        let entries = catalog_of(&["A (USA) (Disc 1).zip", "A (USA).zip"]);
        let spec = FilterSpec {
            dedupe_mode: DedupeMode::Priority,
            priority_list: vec!["USA".to_string()],
            ..FilterSpec::default()
        };
        assert_eq!(names(&apply(&entries, &spec)), vec!["A (USA) (Disc 1).zip"]);
    }

    #[test]
    fn zero_score_group_falls_back_to_first_entry() {
        let entries = catalog_of(&["A (Japan).zip", "A (China).zip", "B (Japan).zip"]);
        let spec = FilterSpec {
            dedupe_mode: DedupeMode::Priority,
            priority_list: vec!["USA".to_string()],
            ..FilterSpec::default()
        };
        assert_eq!(
            names(&apply(&entries, &spec)),
            vec!["A (Japan).zip", "B (Japan).zip"]
        );
    }
}
