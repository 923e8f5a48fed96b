//! 优雅退出
//!
//! 监听 SIGINT / SIGTERM（Windows 下为 Ctrl+C），通知 HTTP 服务停止接收新连接，
//! 并在配置的超时时间内等待进行中的渲染完成。

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C / SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// 进程内主动触发
    Application,
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("信号处理器注册失败: {0}")]
    Signal(#[from] std::io::Error),
}

/// 退出协调器：可克隆，所有副本共享同一个退出状态。
#[derive(Debug, Clone)]
pub struct ShutdownManager {
    tx: watch::Sender<Option<ShutdownReason>>,
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// 触发退出，只有第一次调用生效
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        let first = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!("触发优雅退出: {:?}", reason);
        } else {
            debug!("重复的退出信号被忽略: {:?}", reason);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// 等待退出信号；已触发时立即返回
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Application),
            // 发送端与 self 同生命周期，不会提前关闭
            Err(_) => ShutdownReason::Application,
        }
    }

    /// 注册系统信号，收到后触发退出
    pub fn start_signal_handler(&self) -> Result<(), ShutdownError> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;
            let manager = self.clone();
            tokio::spawn(async move {
                let reason = tokio::select! {
                    _ = sigint.recv() => ShutdownReason::Interrupt,
                    _ = sigterm.recv() => ShutdownReason::Terminate,
                };
                manager.trigger_shutdown(reason);
            });
        }

        #[cfg(not(unix))]
        {
            let manager = self.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => manager.trigger_shutdown(ShutdownReason::Interrupt),
                    Err(e) => warn!("Ctrl+C 监听失败: {}", e),
                }
            });
        }

        info!("信号处理器已启动");
        Ok(())
    }
}

/// 在超时时间内等待收尾任务；超时返回 false
pub async fn drain_with_timeout<F>(timeout: Duration, fut: F) -> bool
where
    F: std::future::Future<Output = ()>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(()) => true,
        Err(_) => {
            warn!("优雅退出超时（{}s），强制退出", timeout.as_secs());
            false
        }
    }
}
