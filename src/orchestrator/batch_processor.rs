//! 批量描述处理器 - 编排层
//!
//! ## 职责
//!
//! 给定一组图片路径、一个结果目录和主题/受众，为每张尚未处理的图片生成描述，
//! 并在每张图片之后把整张结果表写回磁盘。
//!
//! ## 核心功能
//!
//! 1. **凭据检查**：每个作业只检查一次，缺失时立即失败，不写任何记录
//! 2. **续跑**：结果表中已有的文件名直接跳过，旧记录原样保留
//! 3. **逐张持久化**：第 N 张处理完后崩溃，不会丢失 1..N 的结果
//! 4. **错误隔离**：单张图片的失败只影响该行的 `Description`
//!
//! ## 设计特点
//!
//! - 严格顺序处理，同一时刻只有一张图片在内存中
//! - 同一结果目录不能被多个调用同时处理

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::ResultStore;
use crate::models::record::RunSummary;
use crate::services::{DescribeSettings, DescriptionService, LlmService, VisionBackend};
use crate::utils::logging::{log_image_start, log_job_start, print_job_stats};
use crate::workflow::{ImageCtx, ImageFlow};

/// 批量描述处理器
pub struct BatchProcessor<B> {
    config: Config,
    flow: ImageFlow<B>,
}

impl BatchProcessor<LlmService> {
    /// 使用真实的 LLM 服务创建处理器
    pub fn from_config(config: Config) -> AppResult<Self> {
        let backend = LlmService::new(&config)?;
        Ok(Self::new(config, backend))
    }
}

impl<B: VisionBackend> BatchProcessor<B> {
    /// 使用指定的后端创建处理器
    pub fn new(config: Config, backend: B) -> Self {
        let describer = DescriptionService::new(backend, DescribeSettings::from(&config));
        let flow = ImageFlow::new(describer, config.verbose_logging);
        Self { config, flow }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &B {
        self.flow.describer().backend()
    }

    /// 处理一批图片
    ///
    /// # 参数
    /// - `image_paths`: 图片路径（按此顺序处理）
    /// - `results_dir`: 结果目录，结果表固定为其中的 `descriptions.xlsx`
    /// - `subject` / `audience`: 本批次的上下文，空白时使用配置中的默认值
    ///
    /// # 返回
    /// 本次处理的数量和结果表路径
    pub async fn run(
        &self,
        image_paths: &[PathBuf],
        results_dir: &Path,
        subject: &str,
        audience: &str,
    ) -> AppResult<RunSummary> {
        self.config.require_api_key()?;

        let (subject, audience) = self.config.resolve_context(Some(subject), Some(audience));

        std::fs::create_dir_all(results_dir)
            .map_err(|e| AppError::create_dir_failed(results_dir.display().to_string(), e))?;

        let mut store = ResultStore::open(ResultStore::path_for(results_dir))?;
        log_job_start(image_paths.len(), store.len(), &subject, &audience);

        let total = image_paths.len();
        let mut processed = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;

        for (idx, path) in image_paths.iter().enumerate() {
            let ctx = ImageCtx::new(path, idx + 1, total);

            if store.contains(&ctx.filename) {
                debug!("{} ⏭️ 已有记录，跳过", ctx);
                skipped += 1;
                continue;
            }

            log_image_start(ctx.index, ctx.total, &ctx.filename);

            let record = self.flow.run(&ctx, &subject, &audience).await;
            if record.status.is_failure() {
                failed += 1;
            }
            store.push(record);
            processed += 1;

            // 每张图片之后都保存，保证中途退出时已完成的结果不丢失
            if let Err(e) = store.save() {
                error!("{} ❌ {}", ctx, e);
            }
        }

        if processed == 0 {
            info!("没有需要处理的新图片");
        }
        // 输入为空时也留下一张只有表头的结果表
        if !store.path().exists() {
            if let Err(e) = store.save() {
                warn!("⚠️ 无法写入空结果表: {}", e);
            }
        }

        print_job_stats(processed, failed, skipped, store.path());

        Ok(RunSummary {
            processed_count: processed,
            failed_count: failed,
            skipped_count: skipped,
            store_path: store.path().to_path_buf(),
        })
    }
}
