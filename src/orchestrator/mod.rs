//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `job_processor` - 作业处理器
//! - 创建作业目录、分派压缩包/图片输入
//! - 回答作业状态和下载请求
//!
//! ### `batch_processor` - 批量描述处理器
//! - 凭据检查、续跑、逐张持久化
//! - 遍历图片列表，委托 `ImageFlow` 处理单张图片
//!
//! ## 层次关系
//!
//! ```text
//! job_processor (处理一个作业)
//!     ↓
//! batch_processor (处理 Vec<图片路径>)
//!     ↓
//! workflow::ImageFlow (处理单张图片)
//!     ↓
//! services (能力层：image / description / llm)
//!     ↓
//! infrastructure (基础设施：archive / result_store)
//! ```

pub mod batch_processor;
pub mod job_processor;

pub use batch_processor::BatchProcessor;
pub use job_processor::{App, JobDirs, JobLayout, PROCESSING_MARKER};
