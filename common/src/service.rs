use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// 触发服务关闭的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C / SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl ShutdownReason {
    /// 进程退出码，沿用 128+signal 惯例
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Interrupt => 130,
            ShutdownReason::Terminate => 143,
        }
    }
}

/// 等待关闭信号
///
/// 监听 Ctrl+C，在Unix系统上同时监听 SIGTERM，返回先到达的信号。
pub async fn shutdown_signal() -> ShutdownReason {
    use tokio::signal;

    // 监听 Ctrl+C 信号
    let ctrl_c = async {
        signal::ctrl_c().await.expect("无法安装Ctrl+C处理器");
    };

    // 在Unix系统上监听 SIGTERM 信号
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("无法安装SIGTERM处理器")
            .recv()
            .await;
    };

    // 在非Unix系统上创建一个永不返回的future
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    // 等待任一信号
    let reason = tokio::select! {
        _ = ctrl_c => ShutdownReason::Interrupt,
        _ = terminate => ShutdownReason::Terminate,
    };

    info!("接收到关闭信号，准备优雅关闭...");
    reason
}

/// 在限定时间内执行清理动作
///
/// 清理超时不会阻塞进程退出，超时后记录告警并继续。
pub async fn cleanup_with_grace<F>(grace: Duration, cleanup: F)
where
    F: Future<Output = ()>,
{
    if tokio::time::timeout(grace, cleanup).await.is_err() {
        warn!("清理动作超过 {:?} 未完成，放弃等待", grace);
    } else {
        info!("服务关闭准备完成");
    }
}
