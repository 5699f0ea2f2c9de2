/// 日志工具模块
///
/// 负责初始化 tracing 订阅者，并提供日志格式化的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化日志
///
/// 优先使用 `RUST_LOG`，否则默认 info 级别
pub fn init() {
    init_with(false);
}

/// 初始化日志
///
/// # 参数
/// - `verbose`: 为 true 时默认 debug 级别
pub fn init_with(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 重复初始化（例如多个测试）时忽略错误
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 当前配置
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 作业安全问答模式");
    info!("🤖 模型: {}", config.llm_model_name);
    info!("📁 数据目录: {}", config.data_dir);
    info!(
        "🛡️ 摘录上限: {} 词 / 引用上限: {} 字符",
        config.protection.max_excerpt_words, config.protection.max_quote_chars
    );
    info!(
        "🔍 连续请求阈值: {} / 检测窗口: {} 秒",
        config.detection.sequential_threshold, config.detection.window_secs
    );
    match config.retention() {
        Some(retention) => info!("🗑️ 作业保留时长: {} 小时", retention.num_hours()),
        None => info!("🗑️ 作业保留时长: 不限"),
    }
    info!("{}", "=".repeat(60));
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
