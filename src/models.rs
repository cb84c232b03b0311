use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One link scraped from a remote directory listing, as handed over by the
/// host's HTML parsing layer. `href` is relative to the containing listing.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RawEntry {
    pub name: String,
    pub href: String,
    pub is_dir: bool,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TagCategory {
    Region,
    Language,
    Other,
}

/// A file in the remote catalog, with metadata parsed out of its filename.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FileEntry {
    pub name_raw: String,
    pub base_name: String,
    pub tags: BTreeSet<String>,
    pub categorized_tags: BTreeMap<TagCategory, Vec<String>>,
    pub revision: f64,
    pub href: String,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DirectoryEntry {
    pub name_raw: String,
    pub href: String,
}

/// One entry of the browsed catalog. Directories carry no tags and always
/// rank at revision 0.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CatalogEntry {
    File(FileEntry),
    Directory(DirectoryEntry),
}

impl CatalogEntry {
    pub fn name_raw(&self) -> &str {
        match self {
            CatalogEntry::File(file) => &file.name_raw,
            CatalogEntry::Directory(dir) => &dir.name_raw,
        }
    }

    pub fn href(&self) -> &str {
        match self {
            CatalogEntry::File(file) => &file.href,
            CatalogEntry::Directory(dir) => &dir.href,
        }
    }

    pub fn base_name(&self) -> &str {
        match self {
            CatalogEntry::File(file) => &file.base_name,
            CatalogEntry::Directory(dir) => &dir.name_raw,
        }
    }

    pub fn revision(&self) -> f64 {
        match self {
            CatalogEntry::File(file) => file.revision,
            CatalogEntry::Directory(_) => 0.0,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, CatalogEntry::Directory(_))
    }

    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            CatalogEntry::File(file) => Some(file),
            CatalogEntry::Directory(_) => None,
        }
    }
}

/// Unique tags observed across one directory scan, grouped by category.
/// Backing sets keep display order sorted for free.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TagIndex {
    categories: BTreeMap<TagCategory, BTreeSet<String>>,
}

impl TagIndex {
    pub fn insert(&mut self, category: TagCategory, tag: &str) {
        self.categories
            .entry(category)
            .or_default()
            .insert(tag.to_string());
    }

    pub fn absorb(&mut self, entry: &FileEntry) {
        for (category, tags) in &entry.categorized_tags {
            for tag in tags {
                self.insert(*category, tag);
            }
        }
    }

    pub fn contains(&self, category: TagCategory, tag: &str) -> bool {
        self.categories
            .get(&category)
            .map(|set| set.contains(tag))
            .unwrap_or(false)
    }

    pub fn sorted(&self, category: TagCategory) -> Vec<String> {
        self.categories
            .get(&category)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RevisionMode {
    All,
    Highest,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DedupeMode {
    All,
    Priority,
}

/// One filter run over a catalog. Constructed fresh for every apply.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FilterSpec {
    #[serde(default)]
    pub include_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub include_strings: Vec<String>,
    #[serde(default)]
    pub exclude_strings: Vec<String>,
    pub revision_mode: RevisionMode,
    pub dedupe_mode: DedupeMode,
    /// Highest-priority tag first; only consulted when `dedupe_mode` is
    /// `Priority`.
    #[serde(default)]
    pub priority_list: Vec<String>,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            include_strings: Vec::new(),
            exclude_strings: Vec::new(),
            revision_mode: RevisionMode::All,
            dedupe_mode: DedupeMode::All,
            priority_list: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleUnit {
    #[serde(rename = "KB/s")]
    KBps,
    #[serde(rename = "MB/s")]
    MBps,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct ThrottleConfig {
    pub speed: f64,
    pub unit: ThrottleUnit,
}

impl ThrottleConfig {
    pub fn bytes_per_second(&self) -> u64 {
        let multiplier = match self.unit {
            ThrottleUnit::KBps => 1024.0,
            ThrottleUnit::MBps => 1024.0 * 1024.0,
        };
        (self.speed * multiplier).max(0.0) as u64
    }
}

/// Configuration for one orchestration run, handed in by the host.
/// `create_subfolder` and `maintain_folder_structure` are mutually exclusive
/// in the host UI; the path computation supports either or neither and does
/// not enforce the exclusion here.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransferOptions {
    #[serde(alias = "targetDir")]
    pub target_dir: PathBuf,
    #[serde(alias = "createSubfolder", default)]
    pub create_subfolder: bool,
    #[serde(alias = "maintainFolderStructure", default)]
    pub maintain_folder_structure: bool,
    #[serde(alias = "extractAndDelete", default)]
    pub extract_and_delete: bool,
    #[serde(alias = "extractPreviouslyDownloaded", default)]
    pub extract_previously_downloaded: bool,
    #[serde(default)]
    pub throttle: Option<ThrottleConfig>,
}

impl TransferOptions {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            create_subfolder: false,
            maintain_folder_structure: false,
            extract_and_delete: false,
            extract_previously_downloaded: false,
            throttle: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SkipReason {
    None,
    AlreadyExtracted,
    AlreadyDownloaded,
    /// HEAD probe failed; carries a descriptive marker for the summary.
    ScanFailed(String),
}

/// One file to move over the wire. Created by the scanner, mutated by the
/// transfer engine as bytes arrive, finalized on stream completion and read
/// into the run summary afterwards.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransferTask {
    pub name_raw: String,
    pub base_name: String,
    pub url: String,
    /// Path of the containing remote directory relative to the selection
    /// root; empty for top-level files.
    pub relative_path: String,
    pub remote_size: u64,
    pub downloaded_bytes: u64,
    pub skip: bool,
    pub skip_reason: SkipReason,
    pub local_target_path: PathBuf,
    /// Final on-disk location, set once the temp file has been renamed.
    pub path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ScanResult {
    pub tasks_to_transfer: Vec<TransferTask>,
    pub skipped_tasks: Vec<TransferTask>,
    /// Sum of all remote sizes, transfers and skips alike.
    pub total_size: u64,
    /// Bytes not needing transfer: full skips plus bytes already on disk for
    /// resumable files.
    pub skipped_size: u64,
    pub skipped_because_extracted: usize,
    pub skipped_because_downloaded: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TransferOutcome {
    pub skipped_files: Vec<String>,
    pub downloaded_files: Vec<TransferTask>,
}

/// The single completion payload emitted once per orchestration run.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TransferSummary {
    pub skipped_files: Vec<String>,
    pub was_cancelled: bool,
    /// Name of a partial file left behind by a mid-file cancellation, for
    /// advisory cleanup messaging in the host.
    pub partial_file: Option<String>,
    /// Generic failure description when the run died for a reason other than
    /// cancellation.
    pub failure: Option<String>,
}

/// Progress side channel published by the orchestrator; the host subscribes
/// through an unbounded receiver.
#[derive(Serialize, Clone, Debug)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    ScanProgress {
        current: usize,
        total: usize,
    },
    FileProgress {
        name: String,
        current: u64,
        total: u64,
        file_index: usize,
        total_files: usize,
    },
    AggregateProgress {
        current: u64,
        total: u64,
        skipped: u64,
        is_final: bool,
    },
    ExtractionStarted,
    ExtractionEntryProgress {
        name: String,
        current: u64,
        total: u64,
        entry_index: usize,
        total_entries: usize,
    },
    ExtractionProgress {
        current: u64,
        total: u64,
        entries_done: usize,
        total_entries: usize,
    },
    ExtractionEnded,
    Summary(TransferSummary),
}
