use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

use crate::cancel::CancelFlag;
use crate::errors::{Result, RomfetchError};
use crate::models::{
    CatalogEntry, SkipReason, TransferEvent, TransferOptions, TransferSummary,
};
use crate::services::extraction::{self, ArchiveJob};
use crate::services::remote::{self, DirectoryLister, HttpProber, SizeProber};
use crate::services::{scanner, transfer};

/// Drives one selection through scan, transfer and extraction. At most one
/// run is active at a time; each run gets a fresh cancellation flag and emits
/// exactly one `Summary` event, whatever the outcome.
#[derive(Clone, Default)]
pub struct TransferOrchestrator {
    active: Arc<Mutex<Option<CancelFlag>>>,
}

impl TransferOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the active run. Returns false when no run is
    /// in flight.
    pub fn request_cancel(&self) -> bool {
        self.active
            .lock()
            .ok()
            .and_then(|guard| {
                guard.as_ref().map(|flag| {
                    flag.request();
                    true
                })
            })
            .unwrap_or(false)
    }

    pub async fn run(
        &self,
        items: &[CatalogEntry],
        base_url: &str,
        options: TransferOptions,
        lister: &dyn DirectoryLister,
        events: &UnboundedSender<TransferEvent>,
    ) -> Result<TransferSummary> {
        let run_id = uuid::Uuid::new_v4();
        let cancel = CancelFlag::new();
        {
            let mut guard = self
                .active
                .lock()
                .map_err(|_| RomfetchError::Config("orchestrator lock poisoned".to_string()))?;
            if guard.is_some() {
                return Err(RomfetchError::Config(
                    "a transfer is already running".to_string(),
                ));
            }
            *guard = Some(cancel.clone());
        }
        tracing::info!(
            "run started id={} items={} base_url={}",
            run_id,
            items.len(),
            base_url
        );

        let summary = self
            .execute(items, base_url, &options, lister, &HttpProber, &cancel, events)
            .await;
        let _ = events.send(TransferEvent::Summary(summary.clone()));
        if let Ok(mut guard) = self.active.lock() {
            *guard = None;
        }
        tracing::info!(
            "run finished id={} cancelled={} skipped={} failure={:?}",
            run_id,
            summary.was_cancelled,
            summary.skipped_files.len(),
            summary.failure
        );
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        items: &[CatalogEntry],
        base_url: &str,
        options: &TransferOptions,
        lister: &dyn DirectoryLister,
        prober: &dyn SizeProber,
        cancel: &CancelFlag,
        events: &UnboundedSender<TransferEvent>,
    ) -> TransferSummary {
        let mut summary = TransferSummary::default();

        let scan_result = match scanner::scan(
            items,
            base_url,
            options,
            lister,
            prober,
            cancel,
            events,
        )
        .await
        {
            Ok(result) => result,
            Err(error) if error.is_cancellation() => {
                summary.was_cancelled = true;
                return summary;
            }
            Err(error) => {
                tracing::error!("scan failed error={}", error);
                summary.failure = Some(error.to_string());
                return summary;
            }
        };
        summary.skipped_files = scan_result
            .skipped_tasks
            .iter()
            .map(|task| task.name_raw.clone())
            .collect();

        let outcome = match transfer::transfer(
            scan_result.tasks_to_transfer,
            scan_result.total_size,
            scan_result.skipped_size,
            options,
            remote::http_client(),
            cancel,
            events,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(error) if error.is_cancellation() => {
                summary.was_cancelled = true;
                if let RomfetchError::CancelledMidFile { file } = error {
                    summary.partial_file = Some(file);
                }
                return summary;
            }
            Err(error) => {
                tracing::error!("transfer failed error={}", error);
                summary.failure = Some(error.to_string());
                return summary;
            }
        };
        summary.skipped_files.extend(outcome.skipped_files);

        if options.extract_and_delete {
            let mut jobs: Vec<ArchiveJob> = outcome
                .downloaded_files
                .iter()
                .filter_map(|task| {
                    task.path.clone().map(|path| ArchiveJob {
                        path,
                        base_name: task.base_name.clone(),
                    })
                })
                .collect();
            if options.extract_previously_downloaded {
                for task in &scan_result.skipped_tasks {
                    if task.skip_reason == SkipReason::AlreadyDownloaded {
                        jobs.push(ArchiveJob {
                            path: task.local_target_path.clone(),
                            base_name: task.base_name.clone(),
                        });
                    }
                }
            }
            if !jobs.is_empty() {
                match extraction::extract(jobs, options, cancel, events).await {
                    Ok(()) => {}
                    Err(error) if error.is_cancellation() => {
                        summary.was_cancelled = true;
                    }
                    Err(error) => {
                        tracing::error!("extraction failed error={}", error);
                        summary.failure = Some(error.to_string());
                    }
                }
            }
        }

        summary
    }
}
