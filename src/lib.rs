//! # Image Describer
//!
//! 批量为图片生成无障碍文字描述，并把结果保存为 Excel 表格
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 只和文件系统打交道，只暴露能力
//! - `archive` - 解开 zip 并列出其中的图片
//! - `ResultStore` - 结果表的读取与原子写入
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单张图片
//! - `image_service` - 探测尺寸、缩小超大图片、编码
//! - `LlmService` - 调用 Vision API（`VisionBackend` 的默认实现）
//! - `DescriptionService` - 重试、退避和超时
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一张图片"的完整处理流程
//! - `ImageCtx` - 上下文封装（序号 + 文件名）
//! - `ImageFlow` - 流程编排（探测 → 描述 → 记录）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量处理、续跑、逐张持久化
//! - `orchestrator/job_processor` - 作业目录、输入分派、状态查询
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{unpack, ResultStore};
pub use models::{DescriptionStatus, ImageRecord, JobReceipt, JobStatus, RunSummary};
pub use orchestrator::{App, BatchProcessor, JobLayout};
pub use services::{LlmService, VisionBackend, VisionRequest};
pub use workflow::{ImageCtx, ImageFlow};
