pub mod description_service;
pub mod image_service;
pub mod llm_service;

pub use description_service::{DescribeSettings, DescriptionOutcome, DescriptionService};
pub use llm_service::{LlmService, VisionBackend, VisionRequest};
