use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image_describer::config::Config;
use image_describer::infrastructure::archive;
use image_describer::orchestrator::{App, BatchProcessor, JobLayout};
use image_describer::logger;
use tracing::info;

/// 批量生成图片无障碍描述
#[derive(Debug, Parser)]
#[command(name = "image_describer", version, about)]
struct Cli {
    /// TOML 配置文件（环境变量优先级更高）
    #[arg(long, env = "DESCRIBER_CONFIG")]
    config: Option<PathBuf>,

    /// 显示详细日志
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 提交一个作业：单个 zip 文件或若干图片
    Submit {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        audience: Option<String>,
    },
    /// 直接处理图片，结果写入指定目录（可续跑）
    Describe {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[arg(long)]
        results_dir: PathBuf,
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long, default_value = "")]
        audience: String,
    },
    /// 解开压缩包并列出其中的图片
    Unpack { archive: PathBuf, destination: PathBuf },
    /// 查询作业状态
    Status { job_id: String },
    /// 复制已完成作业的结果文件
    Download {
        job_id: String,
        /// 目标路径，默认使用固定的下载文件名
        #[arg(long)]
        to: Option<PathBuf>,
    },
    /// 检查凭据和接口配置
    CheckEnv,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?.with_env_overrides(),
        None => Config::from_env(),
    };

    // 初始化日志
    logger::init_with_verbose(cli.verbose || config.verbose_logging);

    match cli.command {
        Command::Submit {
            files,
            subject,
            audience,
        } => {
            let app = App::initialize(config)?;
            let receipt = app
                .submit(&files, subject.as_deref(), audience.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Command::Describe {
            images,
            results_dir,
            subject,
            audience,
        } => {
            let processor = BatchProcessor::from_config(config)?;
            let summary = processor
                .run(&images, &results_dir, &subject, &audience)
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Unpack {
            archive: archive_path,
            destination,
        } => {
            let images = archive::unpack(&archive_path, &destination)?;
            for image in images {
                println!("{}", image.display());
            }
        }
        Command::Status { job_id } => {
            let status = JobLayout::from_config(&config).status(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Download { job_id, to } => {
            let layout = JobLayout::from_config(&config);
            match layout.download(&job_id)? {
                Some(artifact) => {
                    let target = to.unwrap_or_else(|| PathBuf::from(artifact.download_name));
                    std::fs::copy(&artifact.path, &target).with_context(|| {
                        format!("无法复制 {} 到 {}", artifact.path.display(), target.display())
                    })?;
                    info!("✓ 已保存至 {}", target.display());
                }
                None => {
                    let status = layout.status(&job_id)?;
                    anyhow::bail!("结果文件不可用，当前状态: {}", serde_json::to_string(&status)?);
                }
            }
        }
        Command::CheckEnv => {
            match config.masked_api_key() {
                Some(masked) => println!("API key is set: {}", masked),
                None => println!("API key is NOT set in environment variables"),
            }
            println!("API base: {}", config.api_base_url);
            println!("Model: {}", config.model_name);
            println!("Output root: {}", config.output_root.display());
        }
    }

    Ok(())
}
