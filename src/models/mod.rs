pub mod job;
pub mod record;

pub use job::{DownloadArtifact, JobReceipt, JobStatus};
pub use record::{DescriptionStatus, ImageMeta, ImageRecord, RunSummary, COLUMNS};
