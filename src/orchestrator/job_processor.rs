//! 作业处理器 - 编排层
//!
//! ## 职责
//!
//! 1. **创建作业**：分配作业 ID，建立上传目录和输出目录
//! 2. **分派输入**：单个 zip 文件先解包，其余只保留支持的图片
//! 3. **运行批处理**：委托 `BatchProcessor` 生成描述
//! 4. **状态/下载**：根据输出目录回答 not_found / processing / completed

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult, JobError};
use crate::infrastructure::{archive, ResultStore, STORE_FILE_NAME};
use crate::models::job::{DownloadArtifact, JobReceipt, JobStatus, DOWNLOAD_NAME, SPREADSHEET_MIME};
use crate::orchestrator::batch_processor::BatchProcessor;
use crate::services::{LlmService, VisionBackend};

/// 作业运行期间存在于输出目录中的标记文件
pub const PROCESSING_MARKER: &str = ".processing";

/// 单个作业的目录
#[derive(Debug, Clone)]
pub struct JobDirs {
    pub id: Uuid,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// 作业目录布局
#[derive(Debug, Clone)]
pub struct JobLayout {
    upload_root: PathBuf,
    output_root: PathBuf,
}

impl JobLayout {
    pub fn new(upload_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            upload_root: upload_root.into(),
            output_root: output_root.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.upload_root, &config.output_root)
    }

    /// 创建新作业及其目录
    pub fn create_job(&self) -> AppResult<JobDirs> {
        let id = Uuid::new_v4();
        let dirs = JobDirs {
            id,
            upload_dir: self.upload_root.join(id.to_string()),
            output_dir: self.output_root.join(id.to_string()),
        };
        for dir in [&dirs.upload_dir, &dirs.output_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| AppError::create_dir_failed(dir.display().to_string(), e))?;
        }
        Ok(dirs)
    }

    /// 作业的输出目录
    pub fn output_dir(&self, job_id: &str) -> AppResult<PathBuf> {
        let id = parse_job_id(job_id)?;
        Ok(self.output_root.join(id.to_string()))
    }

    /// 查询作业状态
    pub fn status(&self, job_id: &str) -> AppResult<JobStatus> {
        let output_dir = self.output_dir(job_id)?;
        if !output_dir.exists() {
            return Ok(JobStatus::NotFound);
        }
        if output_dir.join(PROCESSING_MARKER).exists() {
            return Ok(JobStatus::Processing);
        }
        if ResultStore::path_for(&output_dir).exists() {
            return Ok(JobStatus::Completed {
                excel_file: STORE_FILE_NAME.to_string(),
            });
        }
        Ok(JobStatus::Processing)
    }

    /// 已完成作业的结果文件
    pub fn download(&self, job_id: &str) -> AppResult<Option<DownloadArtifact>> {
        match self.status(job_id)? {
            JobStatus::Completed { .. } => Ok(Some(DownloadArtifact {
                path: ResultStore::path_for(&self.output_dir(job_id)?),
                download_name: DOWNLOAD_NAME,
                mime: SPREADSHEET_MIME,
            })),
            _ => Ok(None),
        }
    }
}

fn parse_job_id(job_id: &str) -> AppResult<Uuid> {
    Uuid::parse_str(job_id).map_err(|_| {
        AppError::Job(JobError::InvalidId {
            job_id: job_id.to_string(),
        })
    })
}

/// 应用主结构
pub struct App<B> {
    layout: JobLayout,
    processor: BatchProcessor<B>,
}

impl App<LlmService> {
    /// 使用真实的 LLM 服务初始化应用
    pub fn initialize(config: Config) -> AppResult<Self> {
        let layout = JobLayout::from_config(&config);
        let processor = BatchProcessor::from_config(config)?;
        Ok(Self { layout, processor })
    }
}

impl<B: VisionBackend> App<B> {
    pub fn with_backend(config: Config, backend: B) -> Self {
        Self {
            layout: JobLayout::from_config(&config),
            processor: BatchProcessor::new(config, backend),
        }
    }

    pub fn processor(&self) -> &BatchProcessor<B> {
        &self.processor
    }

    /// 提交一个作业
    ///
    /// # 参数
    /// - `files`: 单个 zip 文件，或若干图片文件
    /// - `subject` / `audience`: 缺失或空白时使用默认值
    pub async fn submit(
        &self,
        files: &[PathBuf],
        subject: Option<&str>,
        audience: Option<&str>,
    ) -> AppResult<JobReceipt> {
        let config = self.processor.config();
        config.require_api_key()?;

        if files.is_empty() {
            return Err(JobError::NoValidImages.into());
        }

        let archive_input = match files {
            [single] if archive::is_archive(single) => Some(single.as_path()),
            _ => None,
        };

        let images: Vec<PathBuf> = if archive_input.is_some() {
            Vec::new()
        } else {
            let (kept, rejected): (Vec<PathBuf>, Vec<PathBuf>) = files
                .iter()
                .cloned()
                .partition(|path| archive::is_supported_image(path));
            for path in &rejected {
                warn!("⚠️ 跳过不支持的文件: {}", path.display());
            }
            if kept.is_empty() {
                return Err(JobError::NoValidImages.into());
            }
            kept
        };

        let (subject, audience) = config.resolve_context(subject, audience);
        let job = self.layout.create_job()?;
        info!("🆕 创建作业 {}", job.id);

        let marker = job.output_dir.join(PROCESSING_MARKER);
        std::fs::write(&marker, b"")
            .map_err(|e| AppError::file_write_failed(marker.display().to_string(), e))?;

        let result = self.run_job(&job, archive_input, images, &subject, &audience).await;

        if let Err(e) = std::fs::remove_file(&marker) {
            warn!("⚠️ 无法删除标记文件 {}: {}", marker.display(), e);
        }

        let summary = result?;
        Ok(JobReceipt {
            success: true,
            job_id: job.id,
            message: format!("Successfully processed {} images", summary.processed_count),
            total_images: summary.processed_count,
            failed_images: summary.failed_count,
            excel_file: STORE_FILE_NAME.to_string(),
        })
    }

    async fn run_job(
        &self,
        job: &JobDirs,
        archive_input: Option<&Path>,
        images: Vec<PathBuf>,
        subject: &str,
        audience: &str,
    ) -> AppResult<crate::models::RunSummary> {
        let images = match archive_input {
            Some(archive_path) => {
                let extract_dir = job.upload_dir.join("extracted");
                archive::unpack(archive_path, &extract_dir)?
            }
            None => images,
        };

        self.processor
            .run(&images, &job.output_dir, subject, audience)
            .await
    }

    /// 查询作业状态
    pub fn status(&self, job_id: &str) -> AppResult<JobStatus> {
        self.layout.status(job_id)
    }

    /// 已完成作业的结果文件
    pub fn download(&self, job_id: &str) -> AppResult<Option<DownloadArtifact>> {
        self.layout.download(job_id)
    }
}
