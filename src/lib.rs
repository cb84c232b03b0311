pub mod cancel;
pub mod errors;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

pub use cancel::CancelFlag;
pub use errors::{Result, RomfetchError};
pub use models::{
    CatalogEntry, DedupeMode, FilterSpec, RawEntry, RevisionMode, ScanResult, SkipReason,
    TagCategory, TagIndex, ThrottleConfig, ThrottleUnit, TransferEvent, TransferOptions,
    TransferSummary, TransferTask,
};
pub use services::{Catalog, DirectoryLister, TransferOrchestrator};
