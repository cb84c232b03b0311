use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use zip::ZipArchive;

use crate::cancel::CancelFlag;
use crate::errors::{Result, RomfetchError};
use crate::models::{TransferEvent, TransferOptions};
use crate::utils::file::is_safe_relative_path;

const READ_BUFFER: usize = 64 * 1024;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// One archive to unpack, extracted into the directory it sits in.
#[derive(Clone, Debug)]
pub struct ArchiveJob {
    pub path: PathBuf,
    pub base_name: String,
}

/// Unpacks every `.zip` job sequentially on the blocking pool, emitting entry
/// and aggregate progress. Successfully extracted archives are deleted;
/// broken archives are logged and skipped. Cancellation mid-entry removes the
/// files written for the archive being unpacked and stops the run.
pub async fn extract(
    jobs: Vec<ArchiveJob>,
    options: &TransferOptions,
    cancel: &CancelFlag,
    events: &UnboundedSender<TransferEvent>,
) -> Result<()> {
    let create_subfolder = options.create_subfolder;
    let cancel = cancel.clone();
    let events = events.clone();
    tokio::task::spawn_blocking(move || extract_blocking(jobs, create_subfolder, &cancel, &events))
        .await
        .map_err(|err| RomfetchError::Archive(err.to_string()))?
}

fn extract_blocking(
    jobs: Vec<ArchiveJob>,
    create_subfolder: bool,
    cancel: &CancelFlag,
    events: &UnboundedSender<TransferEvent>,
) -> Result<()> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let jobs: Vec<ArchiveJob> = jobs
        .into_iter()
        .filter(|job| {
            job.path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("zip"))
                .unwrap_or(false)
                && job.path.is_file()
                && seen.insert(job.path.clone())
        })
        .collect();

    // Two sizing passes before any bytes move, so the first progress event
    // already carries the final denominators.
    let mut counted: Vec<(ArchiveJob, usize)> = Vec::new();
    for job in jobs {
        match open_archive(&job.path) {
            Ok(archive) => counted.push((job, archive.len())),
            Err(error) => {
                tracing::warn!(
                    "archive unreadable path={} error={}",
                    job.path.display(),
                    error
                );
            }
        }
    }
    let mut total_bytes = 0u64;
    counted.retain(|(job, _)| match uncompressed_size(&job.path) {
        Ok(size) => {
            total_bytes += size;
            true
        }
        Err(error) => {
            tracing::warn!(
                "archive unreadable path={} error={}",
                job.path.display(),
                error
            );
            false
        }
    });
    // Both denominators cover the same surviving archives.
    let total_entries: usize = counted.iter().map(|(_, entries)| *entries).sum();

    let _ = events.send(TransferEvent::ExtractionStarted);
    tracing::info!(
        "extraction started archives={} entries={} bytes={}",
        counted.len(),
        total_entries,
        total_bytes
    );

    let mut state = ExtractState {
        cancel,
        events,
        create_subfolder,
        total_entries,
        total_bytes,
        entries_done: 0,
        bytes_done: 0,
        entry_index: 0,
        created: Vec::new(),
        last_sent: Instant::now() - Duration::from_secs(5),
    };

    for (job, _) in counted {
        state.created.clear();
        match extract_one(&job, &mut state) {
            Ok(()) => {
                let _ = std::fs::remove_file(&job.path);
                tracing::info!("archive extracted path={}", job.path.display());
            }
            Err(error) if error.is_cancellation() => {
                for path in &state.created {
                    let _ = std::fs::remove_file(path);
                }
                let _ = events.send(TransferEvent::ExtractionEnded);
                return Err(error);
            }
            Err(error) => {
                tracing::warn!(
                    "extraction failed path={} error={}",
                    job.path.display(),
                    error
                );
            }
        }
    }

    let _ = events.send(TransferEvent::ExtractionEnded);
    Ok(())
}

struct ExtractState<'a> {
    cancel: &'a CancelFlag,
    events: &'a UnboundedSender<TransferEvent>,
    create_subfolder: bool,
    total_entries: usize,
    total_bytes: u64,
    entries_done: usize,
    bytes_done: u64,
    entry_index: usize,
    created: Vec<PathBuf>,
    last_sent: Instant,
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|err| RomfetchError::Archive(err.to_string()))
}

fn uncompressed_size(path: &Path) -> Result<u64> {
    let mut archive = open_archive(path)?;
    let mut total = 0u64;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|err| RomfetchError::Archive(err.to_string()))?;
        total += entry.size();
    }
    Ok(total)
}

fn extract_one(job: &ArchiveJob, state: &mut ExtractState<'_>) -> Result<()> {
    let dest_dir = job
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut archive = open_archive(&job.path)?;

    for index in 0..archive.len() {
        if state.cancel.is_cancelled() {
            return Err(RomfetchError::ExtractionCancelled);
        }
        let mut entry = archive
            .by_index(index)
            .map_err(|err| RomfetchError::Archive(err.to_string()))?;
        state.entry_index += 1;
        let name = entry.name().replace('\\', "/");
        if name.is_empty() {
            state.entries_done += 1;
            continue;
        }
        let relative = if state.create_subfolder {
            strip_archive_prefix(&name, job)
        } else {
            name.clone()
        };
        let entry_path = Path::new(&relative);
        if !is_safe_relative_path(entry_path) {
            tracing::warn!("unsafe archive entry skipped name={}", name);
            state.entries_done += 1;
            continue;
        }
        let out_path = dest_dir.join(entry_path);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            state.entries_done += 1;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entry_size = entry.size();
        let mut out = File::create(&out_path)?;
        state.created.push(out_path);
        let mut buffer = [0u8; READ_BUFFER];
        let mut entry_done = 0u64;
        loop {
            if state.cancel.is_cancelled() {
                return Err(RomfetchError::ExtractionCancelled);
            }
            let read = entry.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read])?;
            entry_done += read as u64;
            state.bytes_done += read as u64;
            report(state, &relative, entry_done, entry_size, false);
        }
        state.entries_done += 1;
        report(state, &relative, entry_done, entry_size, true);
    }
    Ok(())
}

fn report(state: &mut ExtractState<'_>, name: &str, current: u64, total: u64, force: bool) {
    let now = Instant::now();
    if !force && now.duration_since(state.last_sent) < PROGRESS_INTERVAL {
        return;
    }
    state.last_sent = now;
    let _ = state.events.send(TransferEvent::ExtractionEntryProgress {
        name: name.to_string(),
        current,
        total,
        entry_index: state.entry_index,
        total_entries: state.total_entries,
    });
    let _ = state.events.send(TransferEvent::ExtractionProgress {
        current: state.bytes_done,
        total: state.total_bytes,
        entries_done: state.entries_done,
        total_entries: state.total_entries,
    });
}

/// Archives built per release nest their content under `<base name>/`; inside
/// the archive's own subfolder that prefix would double up, so it is dropped.
/// The raw file stem is accepted as an alternative prefix spelling.
fn strip_archive_prefix(name: &str, job: &ArchiveJob) -> String {
    let base_prefix = format!("{}/", job.base_name);
    if let Some(rest) = name.strip_prefix(&base_prefix) {
        return rest.to_string();
    }
    if let Some(stem) = job.path.file_stem().map(|stem| stem.to_string_lossy()) {
        let stem_prefix = format!("{}/", stem);
        if let Some(rest) = name.strip_prefix(&stem_prefix) {
            return rest.to_string();
        }
    }
    name.to_string()
}
