use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedSender;

use crate::cancel::CancelFlag;
use crate::errors::{Result, RomfetchError};
use crate::models::{
    CatalogEntry, FileEntry, ScanResult, SkipReason, TransferEvent, TransferOptions, TransferTask,
};
use crate::services::catalog;
use crate::services::remote::{DirectoryLister, SizeProber};
use crate::utils::file::{decode_href, dir_has_extracted_content, join_url};

struct PendingFile {
    file: FileEntry,
    url: String,
    relative_path: String,
    /// Decoded href leaf, used for every on-disk path.
    disk_name: String,
}

/// Archive servers present percent-encoded hrefs; the decoded form is the
/// filename written to disk.
fn decoded_segment(href: &str, fallback: &str) -> String {
    let decoded = decode_href(href.trim_end_matches('/'));
    if decoded.is_empty() {
        fallback.trim_end_matches('/').to_string()
    } else {
        decoded
    }
}

/// Walks the selection, expands directories through the lister and probes
/// every file's remote size, classifying each one as skip, resume or fresh
/// download. The returned `ScanResult` is immutable input to the transfer
/// engine.
pub async fn scan(
    items: &[CatalogEntry],
    base_url: &str,
    options: &TransferOptions,
    lister: &dyn DirectoryLister,
    prober: &dyn SizeProber,
    cancel: &CancelFlag,
    events: &UnboundedSender<TransferEvent>,
) -> Result<ScanResult> {
    let files = expand(items, base_url, lister, cancel).await?;
    let total = files.len();
    tracing::info!("scan expanded files={} base_url={}", total, base_url);

    let mut result = ScanResult::default();
    for (index, pending) in files.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(RomfetchError::ScanCancelled);
        }
        let task = classify(pending, options, prober, &mut result).await;
        if task.skip {
            result.skipped_tasks.push(task);
        } else {
            result.tasks_to_transfer.push(task);
        }
        let _ = events.send(TransferEvent::ScanProgress {
            current: index + 1,
            total,
        });
    }

    tracing::info!(
        "scan complete transfers={} skips={} total_size={} skipped_size={}",
        result.tasks_to_transfer.len(),
        result.skipped_tasks.len(),
        result.total_size,
        result.skipped_size
    );
    Ok(result)
}

/// Depth-first directory expansion. Children of a directory are visited
/// before later siblings, so output order matches a recursive walk of the
/// listing.
async fn expand(
    items: &[CatalogEntry],
    base_url: &str,
    lister: &dyn DirectoryLister,
    cancel: &CancelFlag,
) -> Result<Vec<PendingFile>> {
    let mut files = Vec::new();
    let mut stack: Vec<(CatalogEntry, String, String)> = items
        .iter()
        .rev()
        .map(|entry| (entry.clone(), base_url.to_string(), String::new()))
        .collect();

    while let Some((entry, level_url, relative_path)) = stack.pop() {
        if cancel.is_cancelled() {
            return Err(RomfetchError::ScanCancelled);
        }
        match entry {
            CatalogEntry::File(file) => {
                let url = join_url(&level_url, &file.href);
                let disk_name = decoded_segment(&file.href, &file.name_raw);
                files.push(PendingFile {
                    file,
                    url,
                    relative_path,
                    disk_name,
                });
            }
            CatalogEntry::Directory(dir) => {
                let dir_name = decoded_segment(&dir.href, &dir.name_raw);
                let child_url = join_url(&level_url, &dir.href);
                let child_rel = if relative_path.is_empty() {
                    dir_name
                } else {
                    format!("{}/{}", relative_path, dir_name)
                };
                let listing = lister.list(&child_url).await?;
                let child_catalog = catalog::build(listing);
                tracing::debug!(
                    "scan listed directory url={} entries={}",
                    child_url,
                    child_catalog.entries.len()
                );
                for child in child_catalog.entries.into_iter().rev() {
                    stack.push((child, child_url.clone(), child_rel.clone()));
                }
            }
        }
    }
    Ok(files)
}

fn target_dir_for(options: &TransferOptions, file: &FileEntry, relative_path: &str) -> PathBuf {
    if options.create_subfolder {
        options.target_dir.join(&file.base_name)
    } else if options.maintain_folder_structure && !relative_path.is_empty() {
        options.target_dir.join(relative_path)
    } else {
        options.target_dir.clone()
    }
}

async fn classify(
    pending: PendingFile,
    options: &TransferOptions,
    prober: &dyn SizeProber,
    result: &mut ScanResult,
) -> TransferTask {
    let PendingFile {
        file,
        url,
        relative_path,
        disk_name,
    } = pending;
    let local_dir = target_dir_for(options, &file, &relative_path);
    let local_target_path = local_dir.join(&disk_name);
    let mut task = TransferTask {
        name_raw: file.name_raw.clone(),
        base_name: file.base_name,
        url,
        relative_path,
        remote_size: 0,
        downloaded_bytes: 0,
        skip: false,
        skip_reason: SkipReason::None,
        local_target_path,
        path: None,
    };

    let remote_size = match prober.remote_size(&task.url).await {
        Ok(size) => size,
        Err(error) => {
            tracing::warn!("scan probe failed name={} error={}", task.name_raw, error);
            task.skip = true;
            task.skip_reason = SkipReason::ScanFailed(error.to_string());
            return task;
        }
    };
    task.remote_size = remote_size;
    result.total_size += remote_size;

    let local_len = tokio::fs::metadata(&task.local_target_path)
        .await
        .ok()
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len());

    // An archive extracted into its own subfolder and then deleted leaves
    // only the extracted content behind; do not fetch it again.
    if options.extract_and_delete
        && options.create_subfolder
        && disk_name.to_ascii_lowercase().ends_with(".zip")
        && local_len.is_none()
        && dir_has_extracted_content(&local_dir, &disk_name)
    {
        task.skip = true;
        task.skip_reason = SkipReason::AlreadyExtracted;
        result.skipped_size += remote_size;
        result.skipped_because_extracted += 1;
        return task;
    }

    if local_len == Some(remote_size) {
        task.skip = true;
        task.skip_reason = SkipReason::AlreadyDownloaded;
        result.skipped_size += remote_size;
        result.skipped_because_downloaded += 1;
        return task;
    }

    let part_path = part_path_for(&task.local_target_path);
    if let Ok(metadata) = tokio::fs::metadata(&part_path).await {
        if metadata.is_file() && metadata.len() < remote_size {
            task.downloaded_bytes = metadata.len();
            result.skipped_size += metadata.len();
        }
    }
    task
}

pub(crate) fn part_path_for(final_path: &std::path::Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".part");
    final_path.with_file_name(name)
}
