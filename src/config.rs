use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::warn;

use crate::error::{AppError, AppResult, ConfigError};

/// 凭据对应的环境变量名
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// 程序配置
///
/// 显式传入各个组件，不依赖全局状态；测试中可以直接构造假的凭据和超时。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 描述接口配置 ---
    pub openai_api_key: Option<String>,
    pub api_base_url: String,
    pub model_name: String,
    /// 单次回复的最大 token 数
    pub max_tokens: u32,
    /// 每张图片最多尝试次数
    pub max_retries: u32,
    /// 第一次重试前的等待秒数，之后每次翻倍
    pub initial_backoff_secs: u64,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 单张图片的总时限（秒），为空表示不限制
    pub image_deadline_secs: Option<u64>,
    /// 超过该像素面积的图片会先缩小再发送
    pub max_pixel_area: u64,
    // --- 作业目录 ---
    pub upload_root: PathBuf,
    pub output_root: PathBuf,
    // --- 默认上下文 ---
    pub default_subject: String,
    pub default_audience: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            openai_api_key: None,
            api_base_url: "https://api.openai.com/v1".to_string(),
            model_name: "gpt-4o".to_string(),
            max_tokens: 300,
            max_retries: 3,
            initial_backoff_secs: 2,
            request_timeout_secs: 90,
            image_deadline_secs: None,
            max_pixel_area: 4_000_000,
            upload_root: tmp.join("image_descriptions"),
            output_root: tmp.join("image_descriptions_output"),
            default_subject: "General Subject".to_string(),
            default_audience: "Students".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 默认配置 + 环境变量
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载配置，未写出的字段取默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileLoadFailed {
            path: path.display().to_string(),
            source: Box::new(e),
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::FileLoadFailed {
            path: path.display().to_string(),
            source: Box::new(e),
        })?;
        Ok(config)
    }

    /// 用环境变量覆盖当前配置
    ///
    /// 数值无法解析时记录警告并保留当前值。
    pub fn with_env_overrides(self) -> Self {
        let current = self;
        Self {
            openai_api_key: std::env::var(API_KEY_ENV).ok().or(current.openai_api_key),
            api_base_url: std::env::var("OPENAI_API_BASE").unwrap_or(current.api_base_url),
            model_name: std::env::var("OPENAI_MODEL").unwrap_or(current.model_name),
            max_tokens: env_or("DESCRIPTION_MAX_TOKENS", current.max_tokens),
            max_retries: env_or("DESCRIPTION_MAX_RETRIES", current.max_retries),
            initial_backoff_secs: env_or("DESCRIPTION_BACKOFF_SECS", current.initial_backoff_secs),
            request_timeout_secs: env_or("DESCRIPTION_TIMEOUT_SECS", current.request_timeout_secs),
            image_deadline_secs: match std::env::var("IMAGE_DEADLINE_SECS") {
                Ok(_) => Some(env_or("IMAGE_DEADLINE_SECS", 0)).filter(|secs| *secs > 0),
                Err(_) => current.image_deadline_secs,
            },
            max_pixel_area: env_or("MAX_PIXEL_AREA", current.max_pixel_area),
            upload_root: std::env::var("UPLOAD_ROOT").map(PathBuf::from).unwrap_or(current.upload_root),
            output_root: std::env::var("OUTPUT_ROOT").map(PathBuf::from).unwrap_or(current.output_root),
            default_subject: std::env::var("DEFAULT_SUBJECT").unwrap_or(current.default_subject),
            default_audience: std::env::var("DEFAULT_AUDIENCE").unwrap_or(current.default_audience),
            verbose_logging: env_or("VERBOSE_LOGGING", current.verbose_logging),
        }
    }

    /// 返回已配置的凭据；缺失或为空时返回配置错误
    pub fn require_api_key(&self) -> AppResult<&str> {
        match self.openai_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(AppError::missing_credential(API_KEY_ENV)),
        }
    }

    /// 遮盖后的凭据，只露出前 5 位和后 4 位
    pub fn masked_api_key(&self) -> Option<String> {
        let key = self.openai_api_key.as_deref()?.trim();
        if key.is_empty() {
            return None;
        }
        let chars: Vec<char> = key.chars().collect();
        if chars.len() <= 9 {
            return Some("*".repeat(chars.len()));
        }
        let head: String = chars[..5].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        Some(format!("{}{}{}", head, "*".repeat(chars.len() - 9), tail))
    }

    /// 空白的主题/受众回落到默认值
    pub fn resolve_context(&self, subject: Option<&str>, audience: Option<&str>) -> (String, String) {
        let pick = |value: Option<&str>, default: &str| match value.map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => default.to_string(),
        };
        (
            pick(subject, &self.default_subject),
            pick(audience, &self.default_audience),
        )
    }
}

/// 读取并解析环境变量，未设置或无法解析时返回 `fallback`
fn env_or<T: FromStr>(var_name: &str, fallback: T) -> T {
    let Ok(value) = std::env::var(var_name) else {
        return fallback;
    };
    match parse_env_value(var_name, &value) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("⚠️ {}，使用当前值", e);
            fallback
        }
    }
}

fn parse_env_value<T: FromStr>(var_name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::EnvVarParseFailed {
        var_name: var_name.to_string(),
        value: value.to_string(),
        expected_type: std::any::type_name::<T>().to_string(),
    })
}
