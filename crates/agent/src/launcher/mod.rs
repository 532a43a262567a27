/// 连接方式
///
/// Worker 与控制器之间的连接机制：执行命令启动 Agent，或等待 Agent 回连

pub mod command;
pub mod inbound;

#[cfg(test)]
pub mod testing;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use common::Result;

use crate::config::LauncherConfig;
use crate::worker::listener::TaskListener;

pub use command::CommandLauncher;
pub use inbound::InboundLauncher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherKind {
    /// 执行命令启动 Agent 进程
    Command,
    /// Agent 主动回连
    Inbound,
}

impl fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LauncherKind::Command => write!(f, "command"),
            LauncherKind::Inbound => write!(f, "inbound"),
        }
    }
}

/// 连接启动接口
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    fn kind(&self) -> LauncherKind;

    /// 是否能由本进程主动发起连接
    fn is_launch_supported(&self) -> bool;

    /// 建立 Worker 连接
    async fn launch(&self, worker: &str, listener: &dyn TaskListener) -> Result<()>;
}

/// 任务执行侧对 Worker 连接的控制
#[async_trait]
pub trait WorkerChannel: Send + Sync + 'static {
    /// 断开 Worker，返回时连接已经关闭
    async fn disconnect(&self, worker: &str, listener: &dyn TaskListener) -> Result<()>;

    /// 连接是否仍然存在
    async fn is_connected(&self) -> bool;
}

/// 按配置创建连接方式
pub fn build(config: &LauncherConfig) -> (Arc<dyn Launcher>, Arc<dyn WorkerChannel>) {
    match config {
        LauncherConfig::Command { command } => {
            let launcher = Arc::new(CommandLauncher::new(command.clone()));
            (
                launcher.clone() as Arc<dyn Launcher>,
                launcher as Arc<dyn WorkerChannel>,
            )
        }
        LauncherConfig::Inbound => {
            let launcher = Arc::new(InboundLauncher::new());
            (
                launcher.clone() as Arc<dyn Launcher>,
                launcher as Arc<dyn WorkerChannel>,
            )
        }
    }
}
