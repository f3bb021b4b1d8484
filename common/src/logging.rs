use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

// 日志输出格式类型
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    // 普通文本格式
    Plain,
    // JSON格式，适合ELK等日志聚合系统
    Json,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Plain,
        }
    }
}

/// 初始化日志系统
///
/// # 示例
/// ```no_run
/// use common::logging;
///
/// fn main() -> anyhow::Result<()> {
///     logging::init()?;
///     tracing::info!("日志系统初始化成功");
///     Ok(())
/// }
/// ```
pub fn init() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(env_filter)
        .with_ansi(true) // 支持ANSI颜色
        .with_thread_names(true) // 显示线程名称
        .init();

    info!("日志系统初始化成功");
    Ok(())
}

/// 从配置初始化日志系统
///
/// # 参数
/// * `config` - 应用配置
///
/// # 示例
/// ```no_run
/// use common::config::AppConfig;
/// use common::logging;
///
/// fn main() -> anyhow::Result<()> {
///     let config = AppConfig::new()?;
///     logging::init_from_config(&config)?;
///     tracing::info!("日志系统从配置初始化成功");
///     Ok(())
/// }
/// ```
pub fn init_from_config(config: &crate::config::AppConfig) -> Result<()> {
    // 检查环境变量是否有覆盖设置
    let env_filter = if let Ok(env_filter) = std::env::var("RUST_LOG") {
        info!("使用环境变量 RUST_LOG={} 覆盖配置文件的日志级别", env_filter);
        EnvFilter::new(env_filter)
    } else {
        EnvFilter::new(config.log.level.clone())
    };

    // 确定日志格式
    let log_format = if let Some(format) = &config.log.format {
        LogFormat::from_str(format)
    } else {
        LogFormat::Plain
    };

    // 根据配置的输出格式选择日志输出方式
    match log_format {
        LogFormat::Plain => {
            fmt()
                .with_env_filter(env_filter)
                .with_ansi(true)
                .with_thread_names(true)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .with_env_filter(env_filter)
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_thread_names(true)
                .init();
        }
    }

    info!("日志系统从配置初始化成功，全局级别: {}", config.log.level);
    info!("日志格式: {:?}", log_format);

    Ok(())
}
