//! 描述服务 - 业务能力层
//!
//! 负责单张图片的"尝试 → 重试 → 放弃"状态机：
//!
//! ```text
//! ATTEMPT ──成功──▶ SUCCESS
//!    │
//!    └─失败─▶ 还有次数? ──是──▶ 等待 backoff，backoff 翻倍 ──▶ ATTEMPT
//!                     └─否──▶ EXHAUSTED（生成错误文本）
//! ```
//!
//! 所有失败都可以重试；放弃后返回错误文本，从不向上抛出。

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::TransportError;
use crate::models::record::{DescriptionStatus, TIMEOUT_PREFIX};
use crate::services::image_service;
use crate::services::llm_service::{VisionBackend, VisionRequest};

/// 描述服务的参数
#[derive(Debug, Clone)]
pub struct DescribeSettings {
    /// 最多尝试次数（包含第一次）
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub request_timeout: Duration,
    /// 单张图片的总时限
    pub image_deadline: Option<Duration>,
    pub max_pixel_area: u64,
    pub max_tokens: u32,
}

impl From<&Config> for DescribeSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_secs(config.initial_backoff_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            image_deadline: config.image_deadline_secs.map(Duration::from_secs),
            max_pixel_area: config.max_pixel_area,
            max_tokens: config.max_tokens,
        }
    }
}

impl Default for DescribeSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// 单张图片的描述结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionOutcome {
    /// 成功生成描述
    Described { text: String, attempts: u32 },
    /// 所有尝试都失败
    Exhausted { message: String, attempts: u32 },
    /// 超过单张图片的总时限
    TimedOut { message: String },
}

impl DescriptionOutcome {
    /// 写入表格的文本和内部状态
    pub fn into_parts(self) -> (String, DescriptionStatus) {
        match self {
            DescriptionOutcome::Described { text, .. } => (text, DescriptionStatus::Described),
            DescriptionOutcome::Exhausted { message, .. } => (message, DescriptionStatus::Failed),
            DescriptionOutcome::TimedOut { message } => (message, DescriptionStatus::TimedOut),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DescriptionOutcome::Described { .. })
    }
}

/// 描述服务
///
/// 职责：
/// - 为单张图片生成描述，负责重试、退避和超时
/// - 不写结果表
/// - 不关心批次和续跑
pub struct DescriptionService<B> {
    backend: B,
    settings: DescribeSettings,
}

impl<B: VisionBackend> DescriptionService<B> {
    pub fn new(backend: B, settings: DescribeSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// 为一张图片生成描述
    ///
    /// 配置了总时限时，超时会放弃正在进行的尝试并返回超时文本。
    pub async fn describe(&self, path: &Path, subject: &str, audience: &str) -> DescriptionOutcome {
        let Some(deadline) = self.settings.image_deadline else {
            return self.describe_with_retry(path, subject, audience).await;
        };

        match tokio::time::timeout(deadline, self.describe_with_retry(path, subject, audience)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("⏱️ 图片 {} 超过总时限 {:?}", path.display(), deadline);
                DescriptionOutcome::TimedOut {
                    message: format!("{} after {:?}", TIMEOUT_PREFIX, deadline),
                }
            }
        }
    }

    async fn describe_with_retry(
        &self,
        path: &Path,
        subject: &str,
        audience: &str,
    ) -> DescriptionOutcome {
        let max_attempts = self.settings.max_retries.max(1);
        let mut backoff = self.settings.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(path, subject, audience).await {
                Ok(text) => {
                    info!(
                        "✓ 已生成描述: {} (第 {} 次尝试)",
                        path.file_name().unwrap_or_default().to_string_lossy(),
                        attempt
                    );
                    return DescriptionOutcome::Described {
                        text,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                    warn!(
                        "⚠️ 第 {}/{} 次尝试失败 ({}): {}",
                        attempt,
                        max_attempts,
                        path.display(),
                        last_error
                    );
                    if attempt < max_attempts {
                        debug!("等待 {:?} 后重试", backoff);
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                    }
                }
            }
        }

        DescriptionOutcome::Exhausted {
            message: format!(
                "Error generating description after {} attempts: {}",
                max_attempts, last_error
            ),
            attempts: max_attempts,
        }
    }

    /// 一次完整的尝试：读图 → (缩小) → 编码 → 请求
    ///
    /// 缩小后的临时数据只存在于本次尝试内。
    async fn attempt(&self, path: &Path, subject: &str, audience: &str) -> Result<String> {
        let image_url = {
            let payload = image_service::prepare_for_transport(path, self.settings.max_pixel_area)?;
            if payload.downscaled {
                debug!("发送缩小后的图片: {:?}", payload.dimensions);
            }
            payload.data_url()
        };

        let request = VisionRequest::new(subject, audience, image_url, self.settings.max_tokens);
        debug!("请求模型 {}: {}", self.backend.model_name(), path.display());

        match tokio::time::timeout(self.settings.request_timeout, self.backend.describe(&request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                timeout: self.settings.request_timeout,
            }
            .into()),
        }
    }
}

/// 下一次等待时间（翻倍，溢出时停在上限）
fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2)
}
