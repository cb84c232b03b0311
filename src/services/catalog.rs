use serde::Serialize;

use crate::models::{CatalogEntry, DirectoryEntry, RawEntry, TagIndex};
use crate::services::filename_parser;

/// The parsed listing for one remote directory level, plus the aggregated
/// tag index the filter UI feeds from. Rebuilt wholesale on every navigation.
#[derive(Serialize, Clone, Debug, Default)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
    pub tag_index: TagIndex,
}

/// Applies the filename parser across one scraped listing. Directories pass
/// through untouched; input order is preserved.
pub fn build(raw_entries: Vec<RawEntry>) -> Catalog {
    let mut entries = Vec::with_capacity(raw_entries.len());
    let mut tag_index = TagIndex::default();

    for raw in raw_entries {
        if raw.is_dir {
            entries.push(CatalogEntry::Directory(DirectoryEntry {
                name_raw: raw.name,
                href: raw.href,
            }));
            continue;
        }

        let mut file = filename_parser::parse(&raw.name);
        file.href = raw.href;
        file.size = raw.size;
        tag_index.absorb(&file);
        entries.push(CatalogEntry::File(file));
    }

    tracing::debug!("catalog built entries={}", entries.len());
    Catalog { entries, tag_index }
}
