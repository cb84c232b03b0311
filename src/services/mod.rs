pub mod catalog;
pub mod extraction;
pub mod filename_parser;
pub mod filter;
pub mod orchestrator;
pub mod remote;
pub mod scanner;
pub mod transfer;

pub use catalog::Catalog;
pub use extraction::ArchiveJob;
pub use orchestrator::TransferOrchestrator;
pub use remote::{DirectoryLister, HttpProber, SizeProber};
pub use transfer::BandwidthThrottler;
