use thiserror::Error;

/// 应用程序错误类型
///
/// 只有作业级别的前置条件（凭据缺失、压缩包无法解开、结果表无法读取）
/// 会以 `AppError` 的形式返回给调用方；单张图片的失败一律编码进该行的
/// `Description` 文本，不会冒泡到这里。
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 压缩包错误
    #[error("压缩包错误: {0}")]
    Archive(#[from] ArchiveError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 图片解码错误
    #[error("图片错误: {0}")]
    Image(#[from] ImageError),
    /// 描述接口传输错误
    #[error("传输错误: {0}")]
    Transport(#[from] TransportError),
    /// 结果表持久化错误
    #[error("持久化错误: {0}")]
    Persistence(#[from] PersistenceError),
    /// 作业相关错误
    #[error("作业错误: {0}")]
    Job(#[from] JobError),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 缺少必需的 API 凭据
    #[error("API key is not configured. Please set the {var_name} environment variable.")]
    MissingCredential { var_name: String },
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置文件加载失败
    #[error("配置文件加载失败 ({path}): {source}")]
    FileLoadFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// 压缩包错误
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// 不是有效的压缩包
    #[error("不是有效的压缩包 ({path}): {source}")]
    Invalid {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
    /// 解压失败
    #[error("解压失败 ({path}): {source}")]
    ExtractFailed {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 文件不存在
    #[error("文件不存在: {path}")]
    NotFound { path: String },
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 创建目录失败
    #[error("创建目录失败 ({path}): {source}")]
    CreateDirFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 图片错误
#[derive(Debug, Error)]
pub enum ImageError {
    /// 无法打开或解析图片
    #[error("无法解析图片 ({path}): {source}")]
    DecodeFailed {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// 描述接口传输错误
///
/// 所有变体都可以重试，直到达到 `max_retries`。
#[derive(Debug, Error)]
pub enum TransportError {
    /// 单次请求超时
    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: std::time::Duration },
    /// 接口调用失败（连接、状态码、接口返回错误）
    #[error("API call failed (model: {model}): {message}")]
    ApiCallFailed { model: String, message: String },
    /// 返回内容为空
    #[error("API returned no description (model: {model})")]
    EmptyContent { model: String },
}

/// 结果表持久化错误
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// 读取已有结果表失败
    #[error("无法读取结果表 ({path}): {message}")]
    LoadFailed { path: String, message: String },
    /// 结果表格式不符合约定
    #[error("结果表格式不正确 ({path}): {message}")]
    MalformedStore { path: String, message: String },
    /// 所有写入策略均失败
    #[error("保存结果表失败 ({path})，已尝试 {attempts} 次: {message}")]
    SaveFailed {
        path: String,
        attempts: usize,
        message: String,
    },
}

/// 作业相关错误
#[derive(Debug, Error)]
pub enum JobError {
    /// 作业 ID 格式不正确
    #[error("Invalid job ID format: {job_id}")]
    InvalidId { job_id: String },
    /// 没有可处理的图片
    #[error("No valid image files found")]
    NoValidImages,
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建凭据缺失错误
    pub fn missing_credential(var_name: impl Into<String>) -> Self {
        AppError::Config(ConfigError::MissingCredential {
            var_name: var_name.into(),
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建目录创建错误
    pub fn create_dir_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::CreateDirFailed {
            path: path.into(),
            source,
        })
    }

    /// 是否为配置错误（作业级别，立即失败）
    pub fn is_configuration(&self) -> bool {
        matches!(self, AppError::Config(_))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
