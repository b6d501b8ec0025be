/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use std::path::Path;
use tracing::info;

/// 记录作业启动信息
///
/// # 参数
/// - `total`: 本次输入的图片数量
/// - `resumed`: 结果表中已存在的记录数
/// - `subject` / `audience`: 本批次的上下文
pub fn log_job_start(total: usize, resumed: usize, subject: &str, audience: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 开始生成图片描述");
    info!("📊 输入图片: {} 张，已有记录: {} 条", total, resumed);
    info!("📚 主题: {} | 👥 受众: {}", subject, audience);
    info!("{}", "=".repeat(60));
}

/// 记录单张图片开始处理
pub fn log_image_start(index: usize, total: usize, filename: &str) {
    info!("\n{}", "─".repeat(30));
    info!("[图片 {}/{}] 处理 {}", index, total, filename);
}

/// 打印作业统计信息
///
/// # 参数
/// - `processed`: 本次处理的图片数
/// - `failed`: 其中描述失败的数量
/// - `skipped`: 因已存在而跳过的数量
/// - `store_path`: 结果表路径
pub fn print_job_stats(processed: usize, failed: usize, skipped: usize, store_path: &Path) {
    info!("\n{}", "=".repeat(60));
    info!("📊 处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", processed - failed, processed);
    info!("❌ 失败: {}", failed);
    info!("⏭️ 跳过: {}", skipped);
    info!("{}", "=".repeat(60));
    info!("\n结果已保存至: {}", store_path.display());
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
